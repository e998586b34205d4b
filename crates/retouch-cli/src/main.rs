use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use retouch_contracts::edits::{EditRequest, EditType, MAX_SEED};
use retouch_contracts::envelope::EditResponse;
use retouch_engine::{EditEngine, Settings};
use tracing_subscriber::EnvFilter;

mod server;

const DEFAULT_LOG_FILTER: &str = "retouch_cli=info,retouch_engine=info,tower_http=info";

#[derive(Debug, Parser)]
#[command(name = "retouch", version, about = "AI image edit ingestion service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve `POST /edit-image` over HTTP.
    Serve(ServeArgs),
    /// Run one edit from local files and print the result envelope.
    Edit(EditArgs),
}

#[derive(Debug, Parser)]
struct ServeArgs {
    #[arg(long, env = "RETOUCH_BIND_ADDR", default_value = "0.0.0.0:8000")]
    bind: String,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long, default_value = "enhance")]
    edit_type: String,
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long)]
    reference: Option<PathBuf>,
    #[arg(long)]
    negative_prompt: Option<String>,
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_SEED)))]
    seed: Option<u32>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("retouch error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();
    let settings = Settings::from_env();
    match cli.command {
        Command::Serve(args) => {
            let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
            runtime.block_on(server::serve(&args.bind, settings))?;
            Ok(0)
        }
        Command::Edit(args) => run_edit(args, &settings),
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run_edit(args: EditArgs, settings: &Settings) -> Result<i32> {
    let source = fs::read(&args.image)
        .with_context(|| format!("failed reading {}", args.image.display()))?;
    let reference = match args.reference.as_ref() {
        Some(path) => {
            Some(fs::read(path).with_context(|| format!("failed reading {}", path.display()))?)
        }
        None => None,
    };
    let request = EditRequest::new(
        source,
        &args.prompt,
        EditType::parse(&args.edit_type),
        reference,
        args.negative_prompt,
    )
    .with_seed(args.seed);

    let engine = EditEngine::from_settings(settings)?;
    let response = engine.run(&request)?;
    write_response(&mut io::stdout().lock(), &response)
}

/// An empty result list is a normal outcome and still exits 0.
fn write_response(out: &mut impl Write, response: &EditResponse) -> Result<i32> {
    serde_json::to_writer_pretty(&mut *out, response)?;
    writeln!(out)?;
    if response.output.results.is_empty() {
        tracing::info!("generation returned no image");
    }
    Ok(0)
}
