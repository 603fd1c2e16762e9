mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "judgebox-cli")]
#[command(about = "Judgebox CLI - Run submissions locally and manage fixtures", long_about = None)]
struct Cli {
    /// languages.json overriding the built-in profiles
    #[arg(short, long, global = true)]
    languages: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a source file once and print the outcome as JSON
    Run {
        /// Source file; language is taken from the extension
        file: PathBuf,

        /// File fed to the program's stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Wall-clock limit in seconds (language default if omitted)
        #[arg(short, long)]
        time_limit: Option<f64>,

        /// Memory limit in MB (language default if omitted)
        #[arg(short, long)]
        memory_limit: Option<u32>,
    },

    /// Grade a source file against a JSON array of test cases
    Test {
        file: PathBuf,

        /// JSON file: `[{"input": "...", "expectedOutput": "..."}]`
        #[arg(short, long)]
        cases: PathBuf,

        #[arg(short, long)]
        time_limit: Option<f64>,

        #[arg(short, long)]
        memory_limit: Option<u32>,
    },

    /// List configured languages
    Languages,

    /// Load code files and questions from a fixtures file into Redis
    Seed {
        fixtures: PathBuf,

        #[arg(long, default_value = "redis://127.0.0.1:6379")]
        redis_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let table = commands::load_languages(cli.languages.as_deref())?;

    match cli.command {
        Commands::Run {
            file,
            input,
            time_limit,
            memory_limit,
        } => {
            commands::run_file(&table, &file, input.as_deref(), time_limit, memory_limit).await?;
        }
        Commands::Test {
            file,
            cases,
            time_limit,
            memory_limit,
        } => {
            commands::test_file(table, &file, &cases, time_limit, memory_limit).await?;
        }
        Commands::Languages => {
            commands::list_languages(&table);
        }
        Commands::Seed {
            fixtures,
            redis_url,
        } => {
            commands::seed(&fixtures, &redis_url).await?;
        }
    }

    Ok(())
}
