//! Command type definitions shared between main.rs and the command modules.

use clap::Subcommand;

#[derive(Subcommand, Debug, Clone)]
pub enum ModelsCommand {
    /// List catalog models
    List {
        /// Only zero-cost models
        #[arg(long)]
        free: bool,

        /// Minimum context window in tokens
        #[arg(long, value_name = "TOKENS")]
        min_context: Option<u32>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show candidates in the order a task would try them
    Rank {
        /// Selection strategy (quality, speed, cost, balanced)
        #[arg(short, long)]
        strategy: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum TaskCommand {
    /// Submit a prompt and run it to completion
    Run {
        /// Prompt text
        prompt: String,

        /// Selection strategy (quality, speed, cost, balanced)
        #[arg(short, long)]
        strategy: Option<String>,

        /// Output the finished task as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a stored task
    Show {
        /// Task id
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List stored tasks, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Cancel a task that has not finished
    Cancel {
        /// Task id
        id: String,
    },
}
