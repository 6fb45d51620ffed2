//! `strata chat`: One full turn: assemble, generate, commit.

use super::{load_config, read_attachments};
use std::path::PathBuf;
use strata_engine::ContextEngine;

pub async fn run(
    user: &str,
    session: &str,
    message: &str,
    attach: &[PathBuf],
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;

    // Check for API key before attempting anything
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  No API key configured.");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    STRATA_API_KEY, ANTHROPIC_API_KEY or OPENAI_API_KEY");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", strata_config::AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let attachments = read_attachments(attach)?;
    let engine = ContextEngine::from_config(&config)?;

    eprint!("  Thinking...");
    let result = engine.process_turn(user, session, message, &attachments).await;
    eprint!("\r              \r");
    let turn = result?;

    println!("{}", turn.generation.text);
    eprintln!();
    eprintln!(
        "  [{} via {} | {} ms | confidence {:.2} | {} context tokens{}]",
        turn.generation.model,
        turn.generation.provider,
        turn.generation.latency_ms,
        turn.generation.confidence,
        turn.window.total_tokens,
        if turn.generation.context_available {
            ""
        } else {
            " | answered generically"
        }
    );
    Ok(())
}
