use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "toolsmith")]
#[command(author, version, about = "Create, reuse and run generated tools", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process a single task, creating a tool for it if needed
    Run { task: String },

    /// Read tasks from stdin, one per line
    Interactive,

    /// Process tasks from a file in batch
    Batch {
        file: String,

        #[arg(short, long, default_value = "5")]
        concurrency: usize,
    },

    /// Create a tool with an explicit name
    Create { name: String, description: String },

    /// Execute an existing tool
    Exec {
        name: String,

        /// JSON parameters passed on stdin
        #[arg(short, long, default_value = "{}")]
        params: String,
    },

    /// List registered tools
    List,

    /// Find a tool whose description matches
    Find { description: String },
}
