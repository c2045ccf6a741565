use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::process::ExitCode;
use tokio::fs::File;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use toolsmith::cli::{Cli, Commands};
use toolsmith::{batch, utils, Acquisition, Manager, Settings, TaskOutcome};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    let settings = Settings::new().context("Failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let manager = Manager::new(&settings).await?;

    match cli.command {
        Commands::Run { task } => handle_run(&manager, &task).await,
        Commands::Interactive => handle_interactive(&manager).await,
        Commands::Batch { file, concurrency } => handle_batch(&manager, file, concurrency).await,
        Commands::Create { name, description } => {
            handle_create(&manager, &name, &description).await
        }
        Commands::Exec { name, params } => handle_exec(&manager, &name, &params).await,
        Commands::List => handle_list(&manager),
        Commands::Find { description } => handle_find(&manager, &description),
    }
}

fn report(outcome: &TaskOutcome) {
    if outcome.success {
        utils::print_success("Task completed");
        if let Some(result) = &outcome.result {
            utils::print_json(result);
        }
    } else {
        utils::print_error(&format!(
            "Task failed: {}",
            outcome.error.as_deref().unwrap_or("unknown error")
        ));
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn handle_run(manager: &Manager, task: &str) -> Result<ExitCode> {
    utils::print_info(&format!("Processing task: '{}'", task));
    let outcome = manager.process_task(task).await;
    report(&outcome);
    Ok(exit_code(outcome.success))
}

async fn handle_interactive(manager: &Manager) -> Result<ExitCode> {
    utils::print_header("Interactive Mode");
    utils::print_info("Describe a task per line ('exit' or Ctrl+D to quit)\n");

    let mut lines = BufReader::new(io::stdin()).lines();

    loop {
        utils::print_prompt("Task: ");
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let outcome = manager.process_task(input).await;
        report(&outcome);
        println!();
    }

    Ok(ExitCode::SUCCESS)
}

async fn handle_batch(manager: &Manager, file: String, concurrency: usize) -> Result<ExitCode> {
    utils::print_info(&format!(
        "Processing tasks from {} with concurrency {}",
        file, concurrency
    ));

    let file = File::open(&file)
        .await
        .with_context(|| format!("Failed to open task file {}", file))?;
    let mut lines = BufReader::new(file).lines();

    let mut tasks = vec![];
    while let Some(line) = lines.next_line().await? {
        if !line.trim().is_empty() {
            tasks.push(line.trim().to_string());
        }
    }

    let outcomes = batch::process_tasks(manager, tasks.clone(), concurrency).await;

    let mut all_ok = true;
    for (i, (task, outcome)) in tasks.iter().zip(&outcomes).enumerate() {
        utils::print_info(&format!("\nTask {}: {}", i + 1, task));
        report(outcome);
        all_ok &= outcome.success;
    }

    Ok(exit_code(all_ok))
}

async fn handle_create(manager: &Manager, name: &str, description: &str) -> Result<ExitCode> {
    match manager.lifecycle().ensure_tool(name, description).await {
        Ok(Acquisition::Created(name)) => {
            utils::print_success(&format!("Created tool '{}'", name));
            Ok(ExitCode::SUCCESS)
        }
        Ok(Acquisition::Found(name)) => {
            utils::print_info(&format!("Tool '{}' already exists", name));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            utils::print_error(&e.to_string());
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn handle_exec(manager: &Manager, name: &str, params: &str) -> Result<ExitCode> {
    let params: Value = serde_json::from_str(params).context("--params must be valid JSON")?;

    match manager.lifecycle().execute(name, &params).await {
        Ok(result) if result.success => {
            utils::print_success(&format!("Tool '{}' succeeded", name));
            utils::print_json(result.result.as_ref().unwrap_or(&Value::Null));
            Ok(ExitCode::SUCCESS)
        }
        Ok(result) => {
            utils::print_error(&format!(
                "Tool '{}' failed: {}",
                name,
                result.error.unwrap_or_default()
            ));
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            utils::print_error(&e.to_string());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn handle_list(manager: &Manager) -> Result<ExitCode> {
    let tools = manager.lifecycle().registry().list();
    utils::print_header(&format!("Registered tools ({})", tools.len()));
    for tool in &tools {
        utils::print_tool(tool);
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_find(manager: &Manager, description: &str) -> Result<ExitCode> {
    match manager.lifecycle().resolve_by_description(description) {
        Some(name) => {
            utils::print_success(&format!("Best match: {}", name));
            Ok(ExitCode::SUCCESS)
        }
        None => {
            utils::print_info("No tool matches that description");
            Ok(ExitCode::FAILURE)
        }
    }
}
