//! Context layers and the assembled context window.
//!
//! A window always holds exactly eleven layers in fixed order. The order is
//! semantic: broad background first, the user's query last. A layer that has
//! nothing to contribute is still present, marked `inactive` with an empty
//! payload.

use crate::context::builders::catalog::Example;
use crate::context::builders::query::QueryAnalysis;
use crate::context::compressor::CompressionReport;
use crate::context::token::estimate_tokens;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use strata_core::error::ContextError;
use strata_core::message::Role;
use strata_core::session::{Task, UserProfile};
use strata_core::tool::ToolDefinition;

/// Number of layers in every window.
pub const LAYER_COUNT: usize = 11;

// ── Identity ──────────────────────────────────────────────────────────────

/// Layer identifier, 1..=11. Serialized as its number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum LayerId {
    Instructions = 1,
    UserInfo = 2,
    Knowledge = 3,
    TaskState = 4,
    Memory = 5,
    Tools = 6,
    Examples = 7,
    ConversationContext = 8,
    Constraints = 9,
    OutputFormat = 10,
    UserQuery = 11,
}

impl LayerId {
    pub const ALL: [LayerId; LAYER_COUNT] = [
        LayerId::Instructions,
        LayerId::UserInfo,
        LayerId::Knowledge,
        LayerId::TaskState,
        LayerId::Memory,
        LayerId::Tools,
        LayerId::Examples,
        LayerId::ConversationContext,
        LayerId::Constraints,
        LayerId::OutputFormat,
        LayerId::UserQuery,
    ];

    /// Layers that compression may summarize but never drop.
    pub const MANDATORY: [LayerId; 3] =
        [LayerId::Instructions, LayerId::Constraints, LayerId::UserQuery];

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Result<Self, ContextError> {
        Self::ALL
            .get(usize::from(n).wrapping_sub(1))
            .copied()
            .ok_or(ContextError::UnknownLayer(n))
    }

    pub fn is_mandatory(self) -> bool {
        Self::MANDATORY.contains(&self)
    }

    /// snake_case name used in logs and events.
    pub fn name(self) -> &'static str {
        match self {
            Self::Instructions => "instructions",
            Self::UserInfo => "user_info",
            Self::Knowledge => "knowledge",
            Self::TaskState => "task_state",
            Self::Memory => "memory",
            Self::Tools => "tools",
            Self::Examples => "examples",
            Self::ConversationContext => "conversation_context",
            Self::Constraints => "constraints",
            Self::OutputFormat => "output_format",
            Self::UserQuery => "user_query",
        }
    }

    /// Heading used when the layer is rendered into a prompt.
    pub fn title(self) -> &'static str {
        match self {
            Self::Instructions => "Instructions",
            Self::UserInfo => "User Information",
            Self::Knowledge => "Knowledge",
            Self::TaskState => "Current Tasks",
            Self::Memory => "Memory",
            Self::Tools => "Available Tools",
            Self::Examples => "Examples",
            Self::ConversationContext => "Conversation",
            Self::Constraints => "Constraints",
            Self::OutputFormat => "Output Format",
            Self::UserQuery => "User Query",
        }
    }
}

impl From<LayerId> for u8 {
    fn from(id: LayerId) -> u8 {
        id.number()
    }
}

impl TryFrom<u8> for LayerId {
    type Error = ContextError;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Self::from_number(n)
    }
}

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.number(), self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerStatus {
    Active,
    Inactive,
    Processing,
}

// ── Payloads ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstructionsData {
    pub system_prompt: String,
    #[serde(default)]
    pub guidelines: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfoData {
    #[serde(default)]
    pub profile: Option<UserProfile>,
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
}

/// A document offered to the model as background knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    /// File name or knowledge-base source label
    pub source: String,
    pub content: String,
    /// Similarity to the query; 1.0 for attachments
    pub score: f32,
    pub from_attachment: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeData {
    pub documents: Vec<KnowledgeDocument>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskStateData {
    pub tasks: Vec<Task>,
}

/// Memory item as shown to the model. Scores stay out of the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnippet {
    pub id: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryData {
    pub short: Vec<MemorySnippet>,
    pub medium: Vec<MemorySnippet>,
    pub long: Vec<MemorySnippet>,
}

impl MemoryData {
    /// Ids of every item in the payload.
    pub fn ids(&self) -> Vec<String> {
        self.short
            .iter()
            .chain(&self.medium)
            .chain(&self.long)
            .map(|s| s.id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolsData {
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExamplesData {
    pub examples: Vec<Example>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationData {
    pub turns: Vec<Turn>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintsData {
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputFormatData {
    pub format: String,
    pub guidance: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryData {
    pub text: String,
    pub analysis: QueryAnalysis,
}

/// Variant-specific payload. The variant always matches the layer id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerData {
    Instructions(InstructionsData),
    UserInfo(UserInfoData),
    Knowledge(KnowledgeData),
    TaskState(TaskStateData),
    Memory(MemoryData),
    Tools(ToolsData),
    Examples(ExamplesData),
    ConversationContext(ConversationData),
    Constraints(ConstraintsData),
    OutputFormat(OutputFormatData),
    UserQuery(QueryData),
}

impl LayerData {
    pub fn id(&self) -> LayerId {
        match self {
            Self::Instructions(_) => LayerId::Instructions,
            Self::UserInfo(_) => LayerId::UserInfo,
            Self::Knowledge(_) => LayerId::Knowledge,
            Self::TaskState(_) => LayerId::TaskState,
            Self::Memory(_) => LayerId::Memory,
            Self::Tools(_) => LayerId::Tools,
            Self::Examples(_) => LayerId::Examples,
            Self::ConversationContext(_) => LayerId::ConversationContext,
            Self::Constraints(_) => LayerId::Constraints,
            Self::OutputFormat(_) => LayerId::OutputFormat,
            Self::UserQuery(_) => LayerId::UserQuery,
        }
    }

    /// The empty payload for a layer.
    pub fn empty(id: LayerId) -> Self {
        match id {
            LayerId::Instructions => Self::Instructions(Default::default()),
            LayerId::UserInfo => Self::UserInfo(Default::default()),
            LayerId::Knowledge => Self::Knowledge(Default::default()),
            LayerId::TaskState => Self::TaskState(Default::default()),
            LayerId::Memory => Self::Memory(Default::default()),
            LayerId::Tools => Self::Tools(Default::default()),
            LayerId::Examples => Self::Examples(Default::default()),
            LayerId::ConversationContext => Self::ConversationContext(Default::default()),
            LayerId::Constraints => Self::Constraints(Default::default()),
            LayerId::OutputFormat => Self::OutputFormat(Default::default()),
            LayerId::UserQuery => Self::UserQuery(Default::default()),
        }
    }

    /// Render the payload as prompt text. Empty payloads render as "".
    ///
    /// This is the serialization token counts are measured on.
    pub fn render(&self) -> String {
        let mut out = String::new();
        match self {
            Self::Instructions(d) => {
                out.push_str(&d.system_prompt);
                if !d.guidelines.is_empty() {
                    if !out.is_empty() {
                        out.push_str("\n\n");
                    }
                    out.push_str("Guidelines:");
                    for g in &d.guidelines {
                        let _ = write!(out, "\n- {g}");
                    }
                }
            }
            Self::UserInfo(d) => {
                let mut lines = Vec::new();
                if let Some(p) = &d.profile {
                    if let Some(name) = &p.display_name {
                        lines.push(format!("Name: {name}"));
                    }
                    if let Some(locale) = &p.locale {
                        lines.push(format!("Locale: {locale}"));
                    }
                    if let Some(expertise) = &p.expertise {
                        lines.push(format!("Expertise: {expertise}"));
                    }
                }
                for (k, v) in &d.preferences {
                    lines.push(format!("Preference {k}: {v}"));
                }
                out = lines.join("\n");
            }
            Self::Knowledge(d) => {
                let docs: Vec<String> = d
                    .documents
                    .iter()
                    .map(|doc| format!("[{}]\n{}", doc.source, doc.content))
                    .collect();
                out = docs.join("\n\n");
            }
            Self::TaskState(d) => {
                let lines: Vec<String> = d
                    .tasks
                    .iter()
                    .map(|t| format!("- [{}] {}", task_status_label(&t.status), t.description))
                    .collect();
                out = lines.join("\n");
            }
            Self::Memory(d) => {
                let sections = [
                    ("Recent", &d.short),
                    ("This session", &d.medium),
                    ("Long-term", &d.long),
                ];
                let mut blocks = Vec::new();
                for (label, items) in sections {
                    if items.is_empty() {
                        continue;
                    }
                    let mut block = format!("{label}:");
                    for s in items {
                        let _ = write!(block, "\n- {}", s.content);
                    }
                    blocks.push(block);
                }
                out = blocks.join("\n");
            }
            Self::Tools(d) => {
                let lines: Vec<String> = d
                    .tools
                    .iter()
                    .map(|t| format!("- {}: {}", t.name, t.description))
                    .collect();
                out = lines.join("\n");
            }
            Self::Examples(d) => {
                let blocks: Vec<String> = d
                    .examples
                    .iter()
                    .map(|e| format!("{}\nUser: {}\nAssistant: {}", e.title, e.prompt, e.response))
                    .collect();
                out = blocks.join("\n\n");
            }
            Self::ConversationContext(d) => {
                let lines: Vec<String> = d
                    .turns
                    .iter()
                    .map(|t| format!("{}: {}", role_label(t.role), t.content))
                    .collect();
                out = lines.join("\n");
            }
            Self::Constraints(d) => {
                let lines: Vec<String> = d.rules.iter().map(|r| format!("- {r}")).collect();
                out = lines.join("\n");
            }
            Self::OutputFormat(d) => {
                if !d.format.is_empty() {
                    out = format!("Format: {}", d.format);
                    if !d.guidance.is_empty() {
                        let _ = write!(out, "\n{}", d.guidance);
                    }
                }
            }
            Self::UserQuery(d) => out.push_str(&d.text),
        }
        out
    }

    /// Whether the payload carries nothing.
    pub fn is_empty(&self) -> bool {
        self.render().trim().is_empty()
    }
}

fn task_status_label(status: &strata_core::session::TaskStatus) -> &'static str {
    use strata_core::session::TaskStatus;
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::InProgress => "in progress",
        TaskStatus::Completed => "done",
        TaskStatus::Failed(_) => "failed",
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "User",
        Role::Assistant => "Assistant",
        Role::System => "System",
    }
}

// ── Layer ─────────────────────────────────────────────────────────────────

/// One section of the context window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextLayer {
    pub id: LayerId,
    pub status: LayerStatus,
    pub data: LayerData,
    pub token_count: usize,
    pub relevance_score: f32,
    /// Set when compression replaced the payload with a summary.
    #[serde(default)]
    pub summarized: bool,
}

impl ContextLayer {
    /// Placeholder for a layer whose builder has not reported yet.
    pub fn processing(id: LayerId) -> Self {
        Self {
            id,
            status: LayerStatus::Processing,
            data: LayerData::empty(id),
            token_count: 0,
            relevance_score: 0.0,
            summarized: false,
        }
    }

    pub fn active(data: LayerData, relevance: f32) -> Self {
        let token_count = estimate_tokens(&data.render());
        Self {
            id: data.id(),
            status: LayerStatus::Active,
            data,
            token_count,
            relevance_score: relevance.clamp(0.0, 1.0),
            summarized: false,
        }
    }

    /// An inactive layer with the empty payload.
    pub fn inactive(id: LayerId, relevance: f32) -> Self {
        Self {
            id,
            status: LayerStatus::Inactive,
            data: LayerData::empty(id),
            token_count: 0,
            relevance_score: relevance.clamp(0.0, 1.0),
            summarized: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == LayerStatus::Active
    }

    /// Swap the payload and recount tokens. The variant must match the id.
    pub fn replace_data(&mut self, data: LayerData) -> Result<(), ContextError> {
        if data.id() != self.id {
            return Err(ContextError::InvariantViolated(format!(
                "payload {} does not belong to layer {}",
                data.id(),
                self.id
            )));
        }
        self.token_count = estimate_tokens(&data.render());
        self.data = data;
        Ok(())
    }

    /// Replace with the empty payload and mark inactive.
    pub fn deactivate(&mut self, relevance: f32) {
        self.status = LayerStatus::Inactive;
        self.data = LayerData::empty(self.id);
        self.token_count = 0;
        self.relevance_score = relevance.clamp(0.0, 1.0);
        self.summarized = false;
    }
}

// ── Window ────────────────────────────────────────────────────────────────

/// The assembled artifact for one generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextWindow {
    pub session_id: String,
    /// Exactly eleven layers, ids 1..=11 in order.
    pub layers: Vec<ContextLayer>,
    pub active_layer_ids: Vec<LayerId>,
    pub total_tokens: usize,
    pub relevance_score: f32,
    /// Budget the window was assembled against
    pub budget: usize,
    pub built_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionReport>,
}

impl ContextWindow {
    /// Wrap built layers, recomputing the derived fields except relevance.
    pub fn new(session_id: impl Into<String>, layers: Vec<ContextLayer>, budget: usize) -> Self {
        let mut window = Self {
            session_id: session_id.into(),
            layers,
            active_layer_ids: Vec::new(),
            total_tokens: 0,
            relevance_score: 0.0,
            budget,
            built_at: Utc::now(),
            compression: None,
        };
        window.recount();
        window
    }

    pub fn layer(&self, id: LayerId) -> Option<&ContextLayer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut ContextLayer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    /// Recompute `active_layer_ids` and `total_tokens` from the layers.
    pub fn recount(&mut self) {
        self.active_layer_ids = self
            .layers
            .iter()
            .filter(|l| l.is_active())
            .map(|l| l.id)
            .collect();
        self.total_tokens = self.layers.iter().map(|l| l.token_count).sum();
    }

    pub fn is_over_budget(&self) -> bool {
        self.total_tokens > self.budget
    }

    /// Check the structural invariants of a finished window.
    pub fn validate(&self) -> Result<(), ContextError> {
        if self.layers.len() != LAYER_COUNT {
            return Err(ContextError::InvariantViolated(format!(
                "window has {} layers, expected {LAYER_COUNT}",
                self.layers.len()
            )));
        }
        for (layer, expected) in self.layers.iter().zip(LayerId::ALL) {
            if layer.id != expected {
                return Err(ContextError::InvariantViolated(format!(
                    "layer {} found where {} belongs",
                    layer.id, expected
                )));
            }
            if layer.data.id() != layer.id {
                return Err(ContextError::InvariantViolated(format!(
                    "layer {} carries a {} payload",
                    layer.id,
                    layer.data.id()
                )));
            }
            if layer.status == LayerStatus::Processing {
                return Err(ContextError::InvariantViolated(format!(
                    "layer {} is still processing",
                    layer.id
                )));
            }
            if !(0.0..=1.0).contains(&layer.relevance_score) {
                return Err(ContextError::InvariantViolated(format!(
                    "layer {} relevance {} outside [0,1]",
                    layer.id, layer.relevance_score
                )));
            }
        }
        let tokens: usize = self.layers.iter().map(|l| l.token_count).sum();
        if tokens != self.total_tokens {
            return Err(ContextError::InvariantViolated(format!(
                "total_tokens {} does not match layer sum {tokens}",
                self.total_tokens
            )));
        }
        Ok(())
    }
}
