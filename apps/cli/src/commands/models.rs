//! Models command implementation.

use super::resolve_strategy;
use super::types::ModelsCommand;
use crate::context::{AppContext, GlobalOptions};
use anyhow::Result;
use colored::Colorize;
use relay_orchestrator::{ModelDescriptor, ModelFilter, ScoredModel};
use serde_json::json;

/// Execute the models command.
pub async fn execute(command: ModelsCommand, options: &GlobalOptions) -> Result<()> {
    let ctx = AppContext::build(options).await?;
    match command {
        ModelsCommand::List { free, min_context, json } => {
            let filter = ModelFilter { free_only: free, min_context_window: min_context, ..Default::default() };
            list_models(&ctx, &filter, json)
        }
        ModelsCommand::Rank { strategy, json } => rank_models(&ctx, strategy.as_deref(), json),
    }
}

fn list_models(ctx: &AppContext, filter: &ModelFilter, json_output: bool) -> Result<()> {
    let models = ctx.orchestrator.catalog().list(filter);

    if json_output {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Model Catalog ({})", models.len()).bold().cyan());
    println!();
    if models.is_empty() {
        println!("  {}", "No models match the given filters.".dimmed());
        return Ok(());
    }

    println!("{:<52} {:>9} {:>9} {:<10} {:>3} {:>3} {}", "ID", "Context", "$/1M", "Tier", "Q", "R", "Tools");
    println!("{}", "-".repeat(98));
    for model in &models {
        print_model_row(model);
    }
    println!();
    Ok(())
}

fn print_model_row(model: &ModelDescriptor) {
    let tier = if model.is_free() { model.tier.to_string().green() } else { model.tier.to_string().normal() };
    let tools = if model.supports_function_calling { "yes".green() } else { "no".dimmed() };
    println!(
        "{:<52} {:>9} {:>9.2} {:<10} {:>3} {:>3} {}",
        model.id.to_string().cyan(),
        model.context_window,
        model.cost_per_unit,
        tier,
        model.quality_score,
        model.reliability_score,
        tools
    );
}

fn rank_models(ctx: &AppContext, strategy: Option<&str>, json_output: bool) -> Result<()> {
    let strategy = resolve_strategy(strategy, ctx.orchestrator.settings().strategy)?;
    let ranked = ctx.orchestrator.rank(strategy)?;

    if json_output {
        let rows: Vec<_> = ranked
            .iter()
            .enumerate()
            .map(|(i, s)| {
                json!({
                    "rank": i + 1,
                    "model_id": s.model.id.to_string(),
                    "score": s.score,
                    "breakdown": s.breakdown,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&json!({ "strategy": strategy, "candidates": rows }))?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Candidates for strategy '{strategy}'").bold().cyan());
    println!();
    println!("{:>4}  {:<52} {:>8}  {}", "#", "Model", "Score", "quality/reliability/cost/tier/diversity/penalty");
    println!("{}", "-".repeat(110));
    for (i, scored) in ranked.iter().enumerate() {
        print_ranked_row(i + 1, scored);
    }
    println!();
    Ok(())
}

fn print_ranked_row(rank: usize, scored: &ScoredModel) {
    let b = &scored.breakdown;
    println!(
        "{:>4}  {:<52} {:>8.2}  {:.1}/{:.1}/{:.1}/{:.1}/{:.1}/{:.1}",
        rank,
        scored.model.id.to_string().cyan(),
        scored.score,
        b.quality,
        b.reliability,
        b.cost,
        b.tier,
        b.diversity,
        b.frequency_penalty
    );
}
