//! Task command implementation.

use super::resolve_strategy;
use super::types::TaskCommand;
use crate::context::{AppContext, GlobalOptions};
use anyhow::{Result, bail};
use colored::{ColoredString, Colorize};
use relay_core::{ArtifactKind, Role, Task, TaskState};

/// Execute the task command.
pub async fn execute(command: TaskCommand, options: &GlobalOptions) -> Result<()> {
    let ctx = AppContext::build(options).await?;
    match command {
        TaskCommand::Run { prompt, strategy, json } => run_task(&ctx, &prompt, strategy.as_deref(), json).await,
        TaskCommand::Show { id, json } => {
            let task = ctx.orchestrator.get(&id).await?;
            print_task(&task, json)
        }
        TaskCommand::List { json } => list_tasks(&ctx, json).await,
        TaskCommand::Cancel { id } => {
            let task = ctx.orchestrator.cancel(&id).await?;
            println!("{} {}", task.id.cyan(), state_label(task.state()));
            Ok(())
        }
    }
}

async fn run_task(ctx: &AppContext, prompt: &str, strategy: Option<&str>, json_output: bool) -> Result<()> {
    let strategy = resolve_strategy(strategy, ctx.orchestrator.settings().strategy)?;
    let task = ctx.orchestrator.submit_text(prompt).await?;
    let task = ctx.orchestrator.run(&task.id, strategy).await?;

    print_task(&task, json_output)?;
    match task.state() {
        TaskState::Completed => Ok(()),
        state => bail!(
            "task {} ended {}: {}",
            task.id,
            state,
            task.status.message.as_deref().unwrap_or("no details")
        ),
    }
}

async fn list_tasks(ctx: &AppContext, json_output: bool) -> Result<()> {
    let tasks = ctx.orchestrator.list().await?;
    if json_output {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }
    if tasks.is_empty() {
        println!("{}", "No tasks stored.".dimmed());
        return Ok(());
    }
    println!("{:<38} {:<16} {:<26} {}", "ID", "State", "Created", "Prompt");
    for task in &tasks {
        let prompt = task
            .history
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.text_content())
            .unwrap_or_default();
        println!(
            "{:<38} {:<16} {:<26} {}",
            task.id.cyan(),
            state_label(task.state()),
            task.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            truncate(&prompt, 48)
        );
    }
    Ok(())
}

fn print_task(task: &Task, json_output: bool) -> Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(task)?);
        return Ok(());
    }

    println!("{} {}", "Task".bold(), task.id.cyan());
    println!("  State:   {}", state_label(task.state()));
    if let Some(message) = &task.status.message {
        println!("  Status:  {message}");
    }
    for artifact in &task.artifacts {
        if let ArtifactKind::Completion { model_id, duration_ms, completion_tokens, attempts, .. } =
            &artifact.metadata.kind
        {
            println!(
                "  Model:   {} ({} attempt(s), {} tokens, {} ms)",
                model_id.green(),
                attempts,
                completion_tokens,
                duration_ms
            );
        }
    }
    println!();
    for message in &task.history {
        let who = match message.role {
            Role::User => "user".blue().bold(),
            Role::Agent => "agent".green().bold(),
        };
        println!("{who}: {}", message.text_content());
    }
    Ok(())
}

fn state_label(state: TaskState) -> ColoredString {
    let text = state.as_str();
    match state {
        TaskState::Completed => text.green(),
        TaskState::Failed | TaskState::Rejected => text.red(),
        TaskState::Canceled => text.yellow(),
        _ => text.normal(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    let first_line = text.lines().next().unwrap_or_default();
    if first_line.chars().count() <= max_chars {
        return first_line.to_string();
    }
    let cut: String = first_line.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{cut}...")
}
