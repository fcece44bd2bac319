use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use contract_diff::engine::{Engine, EngineConfig};
use contract_diff::record::{truncate, AnalysisReport, ComparisonStatus};
use contract_diff::service::OpenAiClient;
use contract_diff::settings::Settings;

#[derive(Parser)]
#[command(
    name = "contract_diff",
    about = "Compare system configurations across two contract versions"
)]
struct Cli {
    /// Settings file (default: ./contract_diff.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, match and compare two plain-text documents
    Compare {
        /// Text of the first (older) version
        doc_a: PathBuf,
        /// Text of the second (newer) version
        doc_b: PathBuf,
        /// Model identifier passed to every call
        #[arg(short, long)]
        model: Option<String>,
        /// Concurrent comparison calls (clamped to the configured bounds)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
        /// Keep only systems whose name contains this (case-insensitive)
        #[arg(short, long)]
        filter: Option<String>,
    },
    /// Show the key field and compared fields in effect
    Fields,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;

    match cli.command {
        Commands::Fields => {
            println!("Key field: {}", settings.key_field);
            for (i, field) in settings.fields.iter().enumerate() {
                println!("{:>3}. {}", i + 1, field);
            }
            return Ok(());
        }
        Commands::Compare {
            doc_a,
            doc_b,
            model,
            workers,
            json,
            filter,
        } => {
            let text_a = std::fs::read_to_string(&doc_a)
                .with_context(|| format!("reading {}", doc_a.display()))?;
            let text_b = std::fs::read_to_string(&doc_b)
                .with_context(|| format!("reading {}", doc_b.display()))?;

            let client = Arc::new(OpenAiClient::from_settings(&settings)?);
            let engine = Engine::new(
                client.clone(),
                client,
                EngineConfig::from_settings(&settings),
            );
            let model = model.unwrap_or_else(|| settings.model.clone());
            let workers = workers.unwrap_or(settings.max_workers);

            let outcome = engine
                .run_analysis(&text_a, &text_b, &model, workers)
                .await?;

            for warning in &outcome.warnings {
                eprintln!("warning: {warning}");
            }

            let mut report = outcome.report.sorted();
            if let Some(needle) = filter.as_deref() {
                report = report.filter_keys(needle);
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
    }

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }
    Ok(())
}

fn print_report(report: &AnalysisReport) {
    if report.comparison_results.is_empty() {
        println!("No systems to show.");
        return;
    }

    println!(
        "{:>3} | {:<32} | {:<14} | {:>5}",
        "#", "System", "Status", "Diffs"
    );
    println!("{}", "-".repeat(64));
    for (i, r) in report.comparison_results.iter().enumerate() {
        println!(
            "{:>3} | {:<32} | {:<14} | {:>5}",
            i + 1,
            truncate(&r.key, 32),
            r.status,
            r.differences.len()
        );
    }

    for r in &report.comparison_results {
        if r.status == ComparisonStatus::Matched && r.differences.is_empty() {
            continue;
        }
        println!("\n--- {} ({}) ---", r.key, r.status);
        for d in &r.differences {
            println!(
                "  {}: {} -> {}",
                d.field_name,
                truncate(&d.value_a, 40),
                truncate(&d.value_b, 40)
            );
        }
        println!("  {}", r.analysis);
    }

    let s = report.summary();
    println!(
        "\n{} matched ({} with differences), {} only in {}, {} only in {} | model {}",
        s.matched,
        s.with_differences,
        s.only_in_first,
        report.record_set_a.label,
        s.only_in_second,
        report.record_set_b.label,
        report.model,
    );
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
