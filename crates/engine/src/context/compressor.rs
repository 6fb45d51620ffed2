//! Budget compression.
//!
//! Runs only when a window exceeds its token budget.
//!
//! 1. **Drop.** Active, non-mandatory layers are emptied and marked inactive,
//!    lowest relevance first (ties: lower layer id first, so broad early
//!    context goes before late, specific context), until the window fits.
//! 2. **Summarize.** If it still does not fit, the mandatory layers
//!    (instructions, constraints, user query) are shrunk by a [`Summarizer`].
//!    Each keeps an essential core (the first instruction sentence, the first
//!    constraint, the full query text) and the spare budget above those cores
//!    is shared out evenly.
//!
//! If the cores alone exceed the budget the result is `BudgetInfeasible`;
//! mandatory layers are never dropped.

use crate::context::layer::{
    ConstraintsData, ContextLayer, ContextWindow, InstructionsData, LayerData, LayerId,
};
use crate::context::scorer::RelevanceScorer;
use crate::context::token::{estimate_tokens, truncate_to_tokens};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_core::error::ContextError;
use tracing::{debug, info};

/// What a compression run did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionReport {
    pub budget: usize,
    pub original_tokens: usize,
    pub final_tokens: usize,
    /// `final / original`; 1.0 when nothing was removed
    pub ratio: f32,
    pub dropped: Vec<LayerId>,
    pub summarized: Vec<LayerId>,
}

impl CompressionReport {
    fn new(budget: usize, original_tokens: usize) -> Self {
        Self {
            budget,
            original_tokens,
            final_tokens: original_tokens,
            ratio: 1.0,
            dropped: Vec::new(),
            summarized: Vec::new(),
        }
    }

    fn finish(&mut self, final_tokens: usize) {
        self.final_tokens = final_tokens;
        self.ratio = if self.original_tokens == 0 {
            1.0
        } else {
            final_tokens as f32 / self.original_tokens as f32
        };
    }

    /// Layers touched in any way.
    pub fn affected(&self) -> Vec<LayerId> {
        let mut ids: Vec<LayerId> = self.dropped.iter().chain(&self.summarized).copied().collect();
        ids.sort();
        ids
    }
}

/// Shrinks mandatory layer payloads.
pub trait Summarizer: Send + Sync {
    /// The smallest form of `data` that must survive compression.
    fn essential(&self, data: &LayerData) -> LayerData;

    /// Shrink `data` to at most `max_tokens`. When `max_tokens` is below the
    /// essential size, return the essential form.
    fn summarize(&self, data: &LayerData, max_tokens: usize) -> LayerData;
}

/// Truncation-based summarizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedSummarizer;

impl Summarizer for RuleBasedSummarizer {
    fn essential(&self, data: &LayerData) -> LayerData {
        match data {
            LayerData::Instructions(d) => LayerData::Instructions(InstructionsData {
                system_prompt: first_sentence(&d.system_prompt).to_string(),
                guidelines: Vec::new(),
            }),
            LayerData::Constraints(d) => LayerData::Constraints(ConstraintsData {
                rules: d.rules.iter().take(1).cloned().collect(),
            }),
            LayerData::UserQuery(_) => data.clone(),
            other => LayerData::empty(other.id()),
        }
    }

    fn summarize(&self, data: &LayerData, max_tokens: usize) -> LayerData {
        if tokens_of(data) <= max_tokens {
            return data.clone();
        }
        let essential = self.essential(data);
        let summary = match data {
            LayerData::Instructions(d) => {
                let prompt_only = LayerData::Instructions(InstructionsData {
                    system_prompt: d.system_prompt.clone(),
                    guidelines: Vec::new(),
                });
                if tokens_of(&prompt_only) <= max_tokens {
                    prompt_only
                } else {
                    let cut = truncate_to_tokens(&d.system_prompt, max_tokens);
                    LayerData::Instructions(InstructionsData {
                        system_prompt: cut,
                        guidelines: Vec::new(),
                    })
                }
            }
            LayerData::Constraints(d) => {
                let mut rules: Vec<String> = Vec::new();
                for rule in &d.rules {
                    rules.push(rule.clone());
                    let candidate = LayerData::Constraints(ConstraintsData { rules: rules.clone() });
                    if tokens_of(&candidate) > max_tokens {
                        rules.pop();
                        break;
                    }
                }
                LayerData::Constraints(ConstraintsData { rules })
            }
            _ => essential.clone(),
        };
        // Never go below the essential core
        if covers(&summary, &essential) {
            summary
        } else {
            essential
        }
    }
}

fn tokens_of(data: &LayerData) -> usize {
    estimate_tokens(&data.render())
}

/// Whether `summary` still carries everything in `essential`.
fn covers(summary: &LayerData, essential: &LayerData) -> bool {
    match (summary, essential) {
        (LayerData::Instructions(s), LayerData::Instructions(e)) => {
            let core = e.system_prompt.trim_end_matches("...");
            s.system_prompt.starts_with(core) && s.system_prompt.len() >= e.system_prompt.len()
        }
        (LayerData::Constraints(s), LayerData::Constraints(e)) => s.rules.starts_with(&e.rules),
        _ => true,
    }
}

/// Text up to and including the first sentence terminator.
fn first_sentence(text: &str) -> &str {
    let text = text.trim();
    let mut prev_terminal = false;
    for (i, c) in text.char_indices() {
        if c == '\n' {
            return text[..i].trim_end();
        }
        if prev_terminal && c.is_whitespace() {
            return &text[..i];
        }
        prev_terminal = matches!(c, '.' | '!' | '?');
    }
    text
}

/// Fits windows to a token budget.
pub struct BudgetCompressor {
    scorer: RelevanceScorer,
    summarizer: Arc<dyn Summarizer>,
}

impl BudgetCompressor {
    pub fn new(scorer: RelevanceScorer) -> Self {
        Self {
            scorer,
            summarizer: Arc::new(RuleBasedSummarizer),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = summarizer;
        self
    }

    /// Compress `window` in place to `budget` tokens.
    ///
    /// Layers in `preserve` are never dropped (mandatory layers never are).
    /// On success `window.total_tokens <= budget`, the window still has all
    /// eleven layers, and the report is also stored on the window.
    pub fn compress(
        &self,
        window: &mut ContextWindow,
        budget: usize,
        preserve: &[LayerId],
    ) -> Result<CompressionReport, ContextError> {
        window.recount();
        window.budget = budget;
        let mut report = CompressionReport::new(budget, window.total_tokens);
        if window.total_tokens <= budget {
            return Ok(report);
        }

        self.drop_pass(window, budget, preserve, &mut report);
        if window.total_tokens > budget {
            self.summarize_pass(window, budget, &mut report)?;
        }

        window.recount();
        window.relevance_score = self.scorer.aggregate(&window.layers);
        report.finish(window.total_tokens);
        window.compression = Some(report.clone());
        window.validate()?;

        info!(
            session_id = %window.session_id,
            original = report.original_tokens,
            tokens = report.final_tokens,
            budget,
            dropped = report.dropped.len(),
            summarized = report.summarized.len(),
            "Context window compressed"
        );
        Ok(report)
    }

    fn drop_pass(
        &self,
        window: &mut ContextWindow,
        budget: usize,
        preserve: &[LayerId],
        report: &mut CompressionReport,
    ) {
        let mut candidates: Vec<(f32, LayerId)> = window
            .layers
            .iter()
            .filter(|l| is_droppable(l, preserve))
            .map(|l| (l.relevance_score, l.id))
            .collect();
        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        for (_, id) in candidates {
            if window.total_tokens <= budget {
                break;
            }
            if let Some(layer) = window.layer_mut(id) {
                let freed = layer.token_count;
                layer.deactivate(self.scorer.inactive_relevance(id));
                report.dropped.push(id);
                debug!(layer = id.name(), freed, "Dropped layer to fit budget");
            }
            window.recount();
        }
    }

    fn summarize_pass(
        &self,
        window: &mut ContextWindow,
        budget: usize,
        report: &mut CompressionReport,
    ) -> Result<(), ContextError> {
        let fixed: usize = window
            .layers
            .iter()
            .filter(|l| !l.id.is_mandatory())
            .map(|l| l.token_count)
            .sum();

        // (id, essential payload, essential tokens, current tokens)
        let mandatory: Vec<(LayerId, LayerData, usize, usize)> = window
            .layers
            .iter()
            .filter(|l| l.id.is_mandatory())
            .map(|l| {
                let essential = self.summarizer.essential(&l.data);
                let tokens = tokens_of(&essential).min(l.token_count);
                (l.id, essential, tokens, l.token_count)
            })
            .collect();

        let required = fixed + mandatory.iter().map(|m| m.2).sum::<usize>();
        if required > budget {
            return Err(ContextError::BudgetInfeasible { required, budget });
        }

        let mut spare = budget - required;
        let mut needy: Vec<(LayerId, LayerData, usize, usize)> =
            mandatory.into_iter().filter(|m| m.3 > m.2).collect();
        needy.sort_by_key(|m| (m.3 - m.2, m.0));

        let mut remaining = needy.len();
        for (id, essential, essential_tokens, full_tokens) in needy {
            let share = spare / remaining.max(1);
            remaining -= 1;
            let need = full_tokens - essential_tokens;
            if need <= share {
                spare -= need;
                continue;
            }

            let allowance = essential_tokens + share;
            let Some(layer) = window.layer_mut(id) else {
                continue;
            };
            let mut summary = self.summarizer.summarize(&layer.data, allowance);
            if tokens_of(&summary) > allowance {
                summary = essential;
            }
            layer.replace_data(summary)?;
            layer.summarized = true;
            spare -= layer.token_count.saturating_sub(essential_tokens).min(spare);
            report.summarized.push(id);
            debug!(layer = id.name(), tokens = layer.token_count, allowance, "Summarized mandatory layer");
        }
        report.summarized.sort();
        window.recount();
        Ok(())
    }
}

fn is_droppable(layer: &ContextLayer, preserve: &[LayerId]) -> bool {
    layer.is_active() && !layer.id.is_mandatory() && !preserve.contains(&layer.id)
}
