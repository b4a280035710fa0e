use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

mod caption;
mod config;
mod models;

use caption::{BatchMode, Captioner, RunOptions};
use config::Settings;
use models::{ItemOutcome, ItemStatus};

/// Caption images through a captioning API and write the result next to each image.
#[derive(Debug, Parser)]
#[command(name = "easy-caption", version)]
struct Cli {
    /// Image files to caption
    images: Vec<PathBuf>,

    /// Settings file (defaults to appsettings.json beside the executable)
    #[arg(short, long, env = "EASY_CAPTION_CONFIG")]
    config: Option<PathBuf>,

    /// Trigger word prepended to every caption; prompted for when omitted
    #[arg(long)]
    trigger_word: Option<String>,

    /// General theme of the images, passed to the chat API; prompted for when omitted
    #[arg(long)]
    theme: Option<String>,

    /// Stop at the first image that fails instead of continuing the batch
    #[arg(long)]
    stop_on_error: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let settings_path = cli.config.unwrap_or_else(config::default_settings_path);
    let settings = match Settings::load(&settings_path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if cli.images.is_empty() {
        println!("Please provide at least one image file path as an argument.");
        return ExitCode::SUCCESS;
    }

    let captioner = match Captioner::new(settings) {
        Ok(captioner) => captioner,
        Err(e) => {
            tracing::error!("failed to build HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let trigger_word = match cli.trigger_word {
        Some(word) => word,
        None => prompt_line("Enter a trigger word (optional): "),
    };
    let theme = match cli.theme {
        Some(theme) => theme,
        None => prompt_line("Enter the general theme of the images (optional): "),
    };
    let run = RunOptions::new(&trigger_word, &theme);

    let mode = if cli.stop_on_error {
        BatchMode::StopOnError
    } else {
        BatchMode::Continue
    };

    captioner
        .run_batch(&cli.images, &run, mode, print_outcome)
        .await;

    ExitCode::SUCCESS
}

fn print_outcome(outcome: &ItemOutcome) {
    match &outcome.status {
        ItemStatus::Saved { sidecar } => println!("Caption saved to {}", sidecar.display()),
        ItemStatus::Failed { kind } => {
            tracing::debug!(?kind, image = %outcome.image.display(), "item failed");
            println!("{}: {}", outcome.image.display(), outcome.message);
        }
    }
}

/// Reads one line from stdin; EOF or a read error counts as no answer.
fn prompt_line(question: &str) -> String {
    print!("{}", question);
    if let Err(e) = io::stdout().flush() {
        tracing::warn!("failed to flush stdout: {}", e);
    }

    let mut line = String::new();
    if let Err(e) = io::stdin().lock().read_line(&mut line) {
        tracing::warn!("failed to read from stdin: {}", e);
        line.clear();
    }
    line.trim_end_matches(['\r', '\n']).to_string()
}
