//! Static catalogs matched against the query: tools (layer 6) and few-shot
//! examples (layer 7).

use super::{BuildInput, LayerBuilder};
use crate::context::layer::{ContextLayer, ExamplesData, LayerData, LayerId, ToolsData};
use crate::context::scorer::RelevanceScorer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_core::Result;
use strata_core::tool::{ToolCatalog, query_words};

/// Most examples offered per query.
const MAX_EXAMPLES: usize = 2;

/// A worked example shown to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub title: String,
    pub prompt: String,
    pub response: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl Example {
    pub fn new(title: &str, prompt: &str, response: &str, keywords: &[&str]) -> Self {
        Self {
            title: title.into(),
            prompt: prompt.into(),
            response: response.into(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    fn hits(&self, words: &[String]) -> usize {
        words.iter().filter(|w| self.keywords.contains(w)).count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExampleCatalog {
    examples: Vec<Example>,
}

impl ExampleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, example: Example) {
        self.examples.push(example);
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Up to two examples sharing keywords with the query, most hits first.
    /// Ties keep catalog order.
    pub fn matches(&self, query: &str) -> Vec<Example> {
        let words = query_words(query);
        let mut scored: Vec<(usize, usize, &Example)> = self
            .examples
            .iter()
            .enumerate()
            .map(|(i, e)| (e.hits(&words), i, e))
            .filter(|(hits, _, _)| *hits > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        scored
            .into_iter()
            .take(MAX_EXAMPLES)
            .map(|(_, _, e)| e.clone())
            .collect()
    }

    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.add(Example::new(
            "Summarizing a document",
            "Summarize the attached meeting notes.",
            "Three decisions were made: the launch moves to May, QA gets two more \
             engineers, and the budget review happens weekly.",
            &["summarize", "summarise", "summary", "tldr", "recap"],
        ));
        catalog.add(Example::new(
            "Answering with code",
            "Write a function that reverses a string.",
            "```rust\nfn reverse(s: &str) -> String {\n    s.chars().rev().collect()\n}\n```\n\
             It iterates characters, so multi-byte text stays valid.",
            &["code", "function", "implement", "snippet", "script"],
        ));
        catalog.add(Example::new(
            "Producing a list",
            "List the steps to rotate an API key.",
            "- Create the new key\n- Deploy it alongside the old one\n- Switch clients over\n\
             - Revoke the old key",
            &["list", "steps", "checklist", "bullet"],
        ));
        catalog.add(Example::new(
            "Comparing options",
            "Compare SQLite and Postgres for a small app.",
            "SQLite needs no server and suits single-writer apps; Postgres handles \
             concurrent writers and richer types at the cost of running a service.",
            &["compare", "comparison", "versus", "vs", "difference", "differences"],
        ));
        catalog
    }
}

// ── Layer 6: tools ────────────────────────────────────────────────────────

pub struct ToolsBuilder {
    catalog: Arc<ToolCatalog>,
    scorer: RelevanceScorer,
}

impl ToolsBuilder {
    pub fn new(catalog: Arc<ToolCatalog>, scorer: RelevanceScorer) -> Self {
        Self { catalog, scorer }
    }
}

#[async_trait]
impl LayerBuilder for ToolsBuilder {
    fn layer(&self) -> LayerId {
        LayerId::Tools
    }

    async fn build(&self, input: &BuildInput<'_>) -> Result<ContextLayer> {
        let tools = self.catalog.matches(input.query);
        if tools.is_empty() {
            return Ok(ContextLayer::inactive(
                LayerId::Tools,
                self.scorer.inactive_relevance(LayerId::Tools),
            ));
        }
        Ok(ContextLayer::active(
            LayerData::Tools(ToolsData { tools }),
            self.scorer.active_relevance(LayerId::Tools),
        ))
    }
}

// ── Layer 7: examples ─────────────────────────────────────────────────────

pub struct ExamplesBuilder {
    catalog: Arc<ExampleCatalog>,
    scorer: RelevanceScorer,
}

impl ExamplesBuilder {
    pub fn new(catalog: Arc<ExampleCatalog>, scorer: RelevanceScorer) -> Self {
        Self { catalog, scorer }
    }
}

#[async_trait]
impl LayerBuilder for ExamplesBuilder {
    fn layer(&self) -> LayerId {
        LayerId::Examples
    }

    async fn build(&self, input: &BuildInput<'_>) -> Result<ContextLayer> {
        let examples = self.catalog.matches(input.query);
        if examples.is_empty() {
            return Ok(ContextLayer::inactive(
                LayerId::Examples,
                self.scorer.inactive_relevance(LayerId::Examples),
            ));
        }
        Ok(ContextLayer::active(
            LayerData::Examples(ExamplesData { examples }),
            self.scorer.active_relevance(LayerId::Examples),
        ))
    }
}
