//! Tool catalog: the static registry the Tools layer matches queries against.
//!
//! The engine never executes tools; it only advertises the ones relevant to
//! the current query so the model knows what it may ask for.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A tool definition advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,

    /// Query words that make this tool relevant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        keywords: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    /// Number of distinct query words hitting this tool's name parts or keywords.
    fn hits(&self, words: &[String]) -> usize {
        let name_parts = self.name.split(['_', '-']).map(str::to_lowercase);
        let mut vocabulary: Vec<String> = name_parts.collect();
        vocabulary.extend(self.keywords.iter().map(|k| k.to_lowercase()));
        words.iter().filter(|w| vocabulary.contains(w)).count()
    }
}

/// A static registry of tool definitions, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: BTreeMap<String, ToolDefinition>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: ToolDefinition) {
        self.tools.insert(tool.name.clone(), tool);
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tools relevant to `query`, most hits first, ties by name.
    ///
    /// Pure function of the registry and the query.
    pub fn matches(&self, query: &str) -> Vec<ToolDefinition> {
        let words = query_words(query);
        if words.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(usize, &ToolDefinition)> = self
            .tools
            .values()
            .map(|t| (t.hits(&words), t))
            .filter(|(hits, _)| *hits > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));
        scored.into_iter().map(|(_, t)| t.clone()).collect()
    }

    /// The catalog shipped with the engine.
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.register(
            ToolDefinition::new(
                "web_search",
                "Search the web and return the top results with snippets",
                &["search", "web", "google", "latest", "news", "find", "lookup"],
            )
            .with_parameters(serde_json::json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            })),
        );
        catalog.register(
            ToolDefinition::new(
                "calculator",
                "Evaluate an arithmetic expression exactly",
                &["calculate", "compute", "math", "sum", "multiply", "divide", "percent"],
            )
            .with_parameters(serde_json::json!({
                "type": "object",
                "properties": {"expression": {"type": "string"}},
                "required": ["expression"]
            })),
        );
        catalog.register(
            ToolDefinition::new(
                "file_read",
                "Read the contents of a file from the user's workspace",
                &["file", "read", "open", "contents"],
            )
            .with_parameters(serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            })),
        );
        catalog.register(
            ToolDefinition::new(
                "code_runner",
                "Execute a short code snippet in a sandbox and return its output",
                &["run", "execute", "code", "script", "test"],
            )
            .with_parameters(serde_json::json!({
                "type": "object",
                "properties": {
                    "language": {"type": "string"},
                    "source": {"type": "string"}
                },
                "required": ["language", "source"]
            })),
        );
        catalog.register(
            ToolDefinition::new(
                "memory_search",
                "Search the user's long-term memory for previously stored facts",
                &["remember", "recall", "memory", "earlier", "previously"],
            )
            .with_parameters(serde_json::json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            })),
        );
        catalog
    }
}

/// Lowercased alphanumeric words of a query.
pub fn query_words(query: &str) -> Vec<String> {
    query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_matches_by_keyword() {
        let catalog = ToolCatalog::builtin();
        let matches = catalog.matches("Please calculate 15 percent of 80");
        assert_eq!(matches[0].name, "calculator");
    }

    #[test]
    fn name_parts_count_as_keywords() {
        let catalog = ToolCatalog::builtin();
        let matches = catalog.matches("do a web search");
        assert_eq!(matches[0].name, "web_search");
    }

    #[test]
    fn no_match_for_small_talk() {
        let catalog = ToolCatalog::builtin();
        assert!(catalog.matches("hi").is_empty());
        assert!(catalog.matches("").is_empty());
    }

    #[test]
    fn matching_is_deterministic() {
        let catalog = ToolCatalog::builtin();
        let a = catalog.matches("run code and read the file");
        let b = catalog.matches("run code and read the file");
        assert_eq!(a, b);
        assert!(a.len() >= 2);
    }

    #[test]
    fn query_words_strip_punctuation() {
        assert_eq!(query_words("Hello, World!"), vec!["hello", "world"]);
    }
}
