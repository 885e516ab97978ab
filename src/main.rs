mod assembler;
mod browser;
mod config;
mod crawler;
mod error;
mod finalize;
mod images;
mod loader;
mod models;
mod pipeline;
mod scraper;
mod tasks;
mod utils;
mod workbook;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::pipeline::Pipeline;
use crate::tasks::TaskSource;

#[derive(Parser)]
#[command(name = "market-harvest", about = "Marketplace analytics harvester", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run every stage enabled in pipeline.steps (crawl → scrape → finalize)
    Run,

    /// Walk ready categories into per-leaf link files
    Crawl,

    /// Scrape metrics and images into one spreadsheet per link file
    Scrape,

    /// Deduplicate and derive columns in every assembled spreadsheet
    Finalize,

    /// Show the task source with ready / completed flags
    Tasks,

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "market_harvest=info,warn",
        1 => "market_harvest=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;

    match cli.command {
        Command::Run => {
            let _t = utils::Timer::start("Full run");
            let stats = Pipeline::new(config).run().await?;
            info!("Done: {} stages, {} failures", stats.stages.len(), stats.failed());
        }

        Command::Crawl => {
            let _t = utils::Timer::start("Category crawl");
            let stats = Pipeline::new(config).crawl().await?;
            info!("{}", stats);
        }

        Command::Scrape => {
            let _t = utils::Timer::start("Metric scrape");
            let stats = Pipeline::new(config).scrape().await?;
            info!("{}", stats);
        }

        Command::Finalize => {
            let _t = utils::Timer::start("Post-processing");
            let stats = Pipeline::new(config).finalize()?;
            info!("{}", stats);
        }

        Command::Tasks => {
            let source = TaskSource::new(&config.paths.task_source);
            let tasks = source.load()?;
            let ready = tasks.iter().filter(|t| t.ready).count();
            let done = tasks.iter().filter(|t| t.completed).count();

            println!("─────────────────────────────────");
            println!("  Task source: {}", source.path().display());
            println!("─────────────────────────────────");
            for t in &tasks {
                let state = match (t.ready, t.completed) {
                    (_, true) => "done",
                    (true, false) => "ready",
                    (false, false) => "—",
                };
                println!("  {:>4}  {:<6} {}", t.row, state, t.name);
            }
            println!("─────────────────────────────────");
            println!(
                "  {} categories | {} ready | {} completed",
                utils::fmt_number(tasks.len()),
                utils::fmt_number(ready),
                utils::fmt_number(done)
            );
        }

        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
