//! `strata assemble`: Build a context window without calling a model.

use super::{load_config, read_attachments};
use std::fmt::Write;
use std::path::PathBuf;
use strata_engine::{ContextEngine, ContextWindow, LayerStatus};

pub async fn run(
    user: &str,
    session: &str,
    message: &str,
    attach: &[PathBuf],
    budget: Option<usize>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config()?;
    if let Some(budget) = budget {
        config.context.token_budget = budget;
    }
    let attachments = read_attachments(attach)?;
    let engine = ContextEngine::from_config(&config)?;

    let window = engine
        .build_context_window(user, session, message, &attachments)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&window)?);
    } else {
        print!("{}", summarize(&window));
    }
    Ok(())
}

/// Human-readable layer table.
pub(crate) fn summarize(window: &ContextWindow) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Context window for session {}", window.session_id);
    let _ = writeln!(out);
    let _ = writeln!(out, "  {:>2}  {:<22} {:<9} {:>7}  {:>9}", "#", "layer", "status", "tokens", "relevance");
    for layer in &window.layers {
        let status = match layer.status {
            LayerStatus::Active if layer.summarized => "summary",
            LayerStatus::Active => "active",
            LayerStatus::Inactive => "inactive",
            LayerStatus::Processing => "pending",
        };
        let _ = writeln!(
            out,
            "  {:>2}  {:<22} {:<9} {:>7}  {:>9.2}",
            layer.id.number(),
            layer.id.name(),
            status,
            layer.token_count,
            layer.relevance_score
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "  Tokens:    {} / {}",
        window.total_tokens, window.budget
    );
    let _ = writeln!(out, "  Active:    {} of 11", window.active_layer_ids.len());
    let _ = writeln!(out, "  Relevance: {:.2}", window.relevance_score);
    if let Some(report) = &window.compression {
        let _ = writeln!(
            out,
            "  Compressed {} -> {} tokens (ratio {:.2}), dropped {:?}, summarized {:?}",
            report.original_tokens,
            report.final_tokens,
            report.ratio,
            report.dropped.iter().map(|id| id.number()).collect::<Vec<_>>(),
            report.summarized.iter().map(|id| id.number()).collect::<Vec<_>>(),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_engine::{ContextLayer, LayerId};

    #[test]
    fn summary_lists_every_layer() {
        let layers = LayerId::ALL
            .iter()
            .map(|id| ContextLayer::inactive(*id, 0.0))
            .collect();
        let window = ContextWindow::new("cli", layers, 4096);
        let text = summarize(&window);
        assert!(text.contains("session cli"));
        assert!(text.contains("user_query"));
        assert!(text.contains("0 / 4096"));
        assert_eq!(text.matches("inactive").count(), 11);
        assert!(!text.contains("Compressed"));
    }
}
