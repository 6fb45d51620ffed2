//! `strata memory`: Memory commands.

use super::load_config;
use strata_core::memory::MemoryTier;
use strata_engine::ContextEngine;

pub async fn search(
    user: &str,
    query: &str,
    tier: Option<&str>,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let tier: Option<MemoryTier> = tier.map(str::parse::<MemoryTier>).transpose()?;
    let config = load_config()?;
    if config.memory.backend == "in_memory" {
        eprintln!("  Note: memory.backend is in_memory, so nothing persists between runs.");
    }
    let engine = ContextEngine::from_config(&config)?;

    let results = engine.search_memory(user, query, tier, limit).await?;
    if results.is_empty() {
        println!("  No memories found for \"{query}\".");
        return Ok(());
    }
    for (i, hit) in results.iter().enumerate() {
        println!(
            "  {:>2}. [{:<6} score {:.2}] {}",
            i + 1,
            hit.item.tier,
            hit.score,
            preview(&hit.item.content, 80)
        );
        if !hit.item.tags.is_empty() {
            println!("      tags: {}", hit.item.tags.join(", "));
        }
    }
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let cut: String = line.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_cuts_on_char_boundaries() {
        assert_eq!(preview("short", 80), "short");
        assert_eq!(preview("first line\nsecond", 80), "first line");
        let long = "é".repeat(100);
        let cut = preview(&long, 10);
        assert_eq!(cut.chars().count(), 10);
        assert!(cut.ends_with("..."));
    }
}
