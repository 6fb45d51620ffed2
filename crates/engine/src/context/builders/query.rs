//! Query analysis and the two layers derived from it (user query, output
//! format).
//!
//! The analysis is a cheap surface-cue classifier: no model call, no
//! tokenizer, just word lists. Both builders run it independently so neither
//! depends on the other's output.

use super::{BuildInput, LayerBuilder};
use crate::context::layer::{ContextLayer, LayerData, LayerId, OutputFormatData, QueryData};
use crate::context::scorer::RelevanceScorer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strata_core::Result;
use strata_core::tool::query_words;

const GREETINGS: &[&str] = &["hi", "hello", "hey", "thanks", "thank", "morning", "evening", "yo"];

const QUESTION_WORDS: &[&str] = &[
    "what", "why", "how", "when", "where", "who", "which", "is", "are", "can", "could", "does",
    "do", "should", "would", "will",
];

const COMMAND_VERBS: &[&str] = &[
    "summarize", "summarise", "write", "explain", "list", "show", "create", "generate", "fix",
    "translate", "find", "calculate", "compare", "describe", "give", "tell", "make", "run",
    "help", "please", "draft", "review",
];

const CODE_CUES: &[&str] = &["code", "function", "snippet", "script"];
const LIST_CUES: &[&str] = &["list", "bullet", "bullets", "steps"];
const EXPLANATION_CUES: &[&str] = &["explain", "explanation", "describe"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Greeting,
    Question,
    Command,
    #[default]
    Statement,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Simple,
    Medium,
    Complex,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Code,
    List,
    Explanation,
    #[default]
    Text,
}

impl ResponseType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::List => "list",
            Self::Explanation => "explanation",
            Self::Text => "text",
        }
    }
}

/// What the query looks like on the surface.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryAnalysis {
    pub intent: Intent,
    /// Proper nouns, file names and quoted phrases, in order of appearance
    pub entities: Vec<String>,
    pub complexity: Complexity,
    pub expected_response_type: ResponseType,
    pub word_count: usize,
}

impl QueryAnalysis {
    pub fn analyze(query: &str) -> Self {
        let words = query_words(query);
        // Whitespace-separated words, so "don't" or "v1.2" count once
        let word_count = query
            .split_whitespace()
            .filter(|w| w.chars().any(char::is_alphanumeric))
            .count();

        let complexity = match word_count {
            0..5 => Complexity::Simple,
            5..20 => Complexity::Medium,
            _ => Complexity::Complex,
        };

        Self {
            intent: classify_intent(query, &words, word_count),
            entities: extract_entities(query),
            complexity,
            expected_response_type: response_type(&words),
            word_count,
        }
    }
}

fn classify_intent(query: &str, words: &[String], word_count: usize) -> Intent {
    let Some(first) = words.first().map(String::as_str) else {
        return Intent::Statement;
    };
    if word_count <= 3 && GREETINGS.contains(&first) {
        Intent::Greeting
    } else if query.trim_end().ends_with('?') || QUESTION_WORDS.contains(&first) {
        Intent::Question
    } else if COMMAND_VERBS.contains(&first) {
        Intent::Command
    } else {
        Intent::Statement
    }
}

fn response_type(words: &[String]) -> ResponseType {
    let has = |cues: &[&str]| words.iter().any(|w| cues.contains(&w.as_str()));
    if has(CODE_CUES) {
        ResponseType::Code
    } else if has(LIST_CUES) {
        ResponseType::List
    } else if has(EXPLANATION_CUES) {
        ResponseType::Explanation
    } else {
        ResponseType::Text
    }
}

fn extract_entities(query: &str) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();
    let mut push = |e: &str| {
        if !e.is_empty() && !entities.iter().any(|x| x == e) {
            entities.push(e.to_string());
        }
    };

    // Quoted phrases
    for (i, part) in query.split('"').enumerate() {
        if i % 2 == 1 {
            push(part.trim());
        }
    }

    for (i, raw) in query.split_whitespace().enumerate() {
        let token = raw.trim_matches(|c: char| !c.is_alphanumeric() && c != '.' && c != '_');
        let token = token.trim_end_matches('.');
        if is_file_name(token) {
            push(token);
        } else if i > 0 && token.chars().next().is_some_and(char::is_uppercase) {
            push(token);
        }
    }
    entities
}

fn is_file_name(token: &str) -> bool {
    match token.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
                && ext.chars().any(|c| c.is_ascii_alphabetic())
        }
        None => false,
    }
}

// ── Layer 11: user query ──────────────────────────────────────────────────

pub struct UserQueryBuilder {
    scorer: RelevanceScorer,
}

impl UserQueryBuilder {
    pub fn new(scorer: RelevanceScorer) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl LayerBuilder for UserQueryBuilder {
    fn layer(&self) -> LayerId {
        LayerId::UserQuery
    }

    async fn build(&self, input: &BuildInput<'_>) -> Result<ContextLayer> {
        let text = input.query.trim().to_string();
        let analysis = QueryAnalysis::analyze(&text);
        Ok(ContextLayer::active(
            LayerData::UserQuery(QueryData { text, analysis }),
            self.scorer.active_relevance(LayerId::UserQuery),
        ))
    }
}

// ── Layer 10: output format ───────────────────────────────────────────────

pub struct OutputFormatBuilder {
    scorer: RelevanceScorer,
}

impl OutputFormatBuilder {
    pub fn new(scorer: RelevanceScorer) -> Self {
        Self { scorer }
    }
}

fn guidance_for(format: &str) -> String {
    match format {
        "code" => "Answer with a fenced code block, then a brief explanation.".into(),
        "list" => "Answer as a bulleted list, one item per line.".into(),
        "explanation" => "Explain step by step in short paragraphs.".into(),
        "text" => "Answer in plain prose.".into(),
        other => format!("Respond in {other} format."),
    }
}

#[async_trait]
impl LayerBuilder for OutputFormatBuilder {
    fn layer(&self) -> LayerId {
        LayerId::OutputFormat
    }

    async fn build(&self, input: &BuildInput<'_>) -> Result<ContextLayer> {
        let format = match input.session.output_format.as_deref().map(str::trim) {
            Some(pref) if !pref.is_empty() => pref.to_lowercase(),
            _ => QueryAnalysis::analyze(input.query)
                .expected_response_type
                .as_str()
                .to_string(),
        };
        let guidance = guidance_for(&format);
        Ok(ContextLayer::active(
            LayerData::OutputFormat(OutputFormatData { format, guidance }),
            self.scorer.active_relevance(LayerId::OutputFormat),
        ))
    }
}
