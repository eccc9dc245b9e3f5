//! Strategist CLI - command line interface for the overnight strategist server.

mod client;

use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use strategist_core::{
    Artifact, Category, DeliverableStatus, Run, RunId, RunIntake, RunMode, RunStatus,
};

use client::HttpClient;

/// Strategist CLI - overnight run management tool
#[derive(Parser)]
#[command(name = "strategist")]
#[command(about = "CLI for the overnight strategist server", long_about = None)]
struct Cli {
    /// Server address
    #[arg(short, long, default_value = "http://127.0.0.1:8080")]
    addr: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a new overnight run
    Submit {
        /// Client reference
        #[arg(short, long)]
        client: String,

        /// What the client wants to achieve
        #[arg(short, long)]
        goal: String,

        /// Primary KPI
        #[arg(long)]
        kpi: Option<String>,

        /// Timeframe, e.g. "90 days"
        #[arg(long)]
        timeframe: Option<String>,

        /// Budget posture: Flat, Up, Down
        #[arg(long)]
        budget: Option<String>,

        /// Channels in scope, comma separated
        #[arg(long)]
        channels: Option<String>,

        /// Brand voice
        #[arg(long)]
        voice: Option<String>,

        /// Recommendation stance
        #[arg(long)]
        stance: Option<String>,

        /// Analysis depth
        #[arg(long)]
        depth: Option<String>,

        /// Wait for the run to finish
        #[arg(short, long)]
        wait: bool,
    },

    /// Get run status
    Status {
        /// Run ID
        id: String,
    },

    /// Cancel a run
    Cancel {
        /// Run ID to cancel
        id: String,
    },

    /// Re-run a finished run under a new id
    Rerun {
        /// Run ID to re-run
        id: String,
    },

    /// Print the morning brief of a completed run
    Brief {
        /// Run ID
        id: String,
    },

    /// List the task catalog
    Catalog,

    /// Check server health
    Health,
}

#[derive(Deserialize)]
struct CreatedRun {
    run_id: RunId,
    status: RunStatus,
}

#[derive(Deserialize)]
struct CatalogEntry {
    id: String,
    name: String,
    category: Category,
    depends_on: Vec<String>,
    run_mode: RunMode,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let client = HttpClient::new(&cli.addr);

    match cli.command {
        Commands::Submit {
            client: client_ref,
            goal,
            kpi,
            timeframe,
            budget,
            channels,
            voice,
            stance,
            depth,
            wait,
        } => {
            let intake = RunIntake {
                client_ref: Some(client_ref),
                goal: Some(goal),
                kpi,
                timeframe,
                budget,
                channels,
                voice,
                stance,
                depth,
            };
            submit(&client, intake, wait).await?;
        }
        Commands::Status { id } => {
            let run: Run = client.get_json(&format!("/v1/runs/{id}")).await?;
            print_run(&run);
        }
        Commands::Cancel { id } => {
            let run: Run = client
                .post_json(&format!("/v1/runs/{id}/cancel"), &serde_json::json!({}))
                .await?;
            println!("Cancellation requested:");
            print_run(&run);
        }
        Commands::Rerun { id } => {
            let created: CreatedRun = client
                .post_json(&format!("/v1/runs/{id}/rerun"), &serde_json::json!({}))
                .await?;
            println!("Re-run scheduled: {} ({:?})", created.run_id, created.status);
        }
        Commands::Brief { id } => {
            brief(&client, &id).await?;
        }
        Commands::Catalog => {
            catalog(&client).await?;
        }
        Commands::Health => {
            if client.health().await? {
                println!("OK");
            } else {
                println!("UNHEALTHY");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

async fn submit(
    client: &HttpClient,
    intake: RunIntake,
    wait: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let created: CreatedRun = client.post_json("/v1/runs", &intake).await?;
    println!("Run scheduled: {} ({:?})", created.run_id, created.status);

    if !wait {
        return Ok(());
    }

    let path = format!("/v1/runs/{}", created.run_id);
    loop {
        let run: Run = client.get_json(&path).await?;
        if run.is_terminal() {
            print_run(&run);
            return Ok(());
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn brief(client: &HttpClient, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let artifacts: Vec<Artifact> = client.get_json(&format!("/v1/runs/{id}/artifacts")).await?;

    match artifacts.last() {
        Some(artifact) => {
            println!("{}", artifact.brief_markdown);
            println!(
                "Deliverables: {} ready, {} draft, {} blocked (generated {})",
                artifact.count(DeliverableStatus::Ready),
                artifact.count(DeliverableStatus::Draft),
                artifact.count(DeliverableStatus::Blocked),
                format_timestamp(&artifact.generated_at),
            );
        }
        None => println!("No artifact for run {id}"),
    }

    Ok(())
}

async fn catalog(client: &HttpClient) -> Result<(), Box<dyn std::error::Error>> {
    let entries: Vec<CatalogEntry> = client.get_json("/v1/catalog").await?;

    println!("Tasks ({}):", entries.len());
    println!("{:<26}  {:<12}  {:<10}  {}", "ID", "CATEGORY", "MODE", "DEPENDS ON");
    println!("{}", "-".repeat(80));

    for entry in entries {
        let deps = if entry.depends_on.is_empty() {
            "-".to_string()
        } else {
            entry.depends_on.join(", ")
        };
        println!(
            "{:<26}  {:<12}  {:<10}  {}",
            entry.id,
            entry.category.label(),
            format!("{:?}", entry.run_mode),
            deps
        );
        println!("  {}", entry.name);
    }

    Ok(())
}

fn print_run(run: &Run) {
    println!("  ID:         {}", run.id);
    println!("  Client:     {}", run.spec.client_ref());
    println!("  Goal:       {}", run.spec.goal());
    println!("  Status:     {:?}", run.status());
    println!("  Created:    {}", format_timestamp(&run.created_at));
    println!("  Updated:    {}", format_timestamp(&run.updated_at));
    if let Some(parent) = &run.parent_run {
        println!("  Re-run of:  {}", parent);
    }
    if let Some(confidence) = run.confidence {
        println!("  Confidence: {}", confidence.label());
    }
    if let Some(failure) = &run.failure {
        println!("  Failure:    {}", failure);
    }

    if !run.task_instances.is_empty() {
        println!("  Tasks:");
        for task in &run.task_instances {
            let state = format!("{:?}", task.state);
            println!(
                "    - {:<26}  {:<10}  attempts={}",
                task.task_id.as_str(),
                state,
                task.attempts
            );
            if let Some(err) = &task.last_error {
                println!("      Error: {}", err);
            }
        }
    }

    if !run.deliverables.is_empty() {
        println!("  Deliverables:");
        for deliverable in &run.deliverables {
            let status = format!("{:?}", deliverable.status);
            println!("    - {:<8}  {}", status, deliverable.title);
        }
    }
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_timestamp_matches_local_time() {
        let at = DateTime::parse_from_rfc3339("2026-03-01T06:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let expected = at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string();
        assert_eq!(format_timestamp(&at), expected);
        assert_eq!(format_timestamp(&at).len(), 19);
    }
}
