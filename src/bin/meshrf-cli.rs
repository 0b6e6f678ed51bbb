//! Command-line entry point: runs one batch job read from a JSON file and writes the
//! JSON result, per the `meshrf-cli analyze` contract.

use std::path::PathBuf;
use std::process::exit;

use clap::{Parser, Subcommand};
use colored::Colorize;

use meshrf::job::{run_job, CancelToken, JobOutcome, JobRequest};
use meshrf::progress::{NullProgressSink, ProgressSink, StdoutProgressSink};
use meshrf::tile_store::{HttpTileSource, TileCacheConfig, TileStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Runs one batch coverage/link-analysis job and writes the JSON result.
    Analyze {
        /// Path to the batch job request JSON file.
        #[arg(long)]
        input: PathBuf,

        /// Path to write the batch job result JSON to.
        #[arg(long)]
        output: PathBuf,

        /// Terrain-RGB tile origin, `{z}`/`{x}`/`{y}` templated.
        #[arg(long, env = "MESHRF_TILE_URL", default_value = "https://tiles.example.com/{z}/{x}/{y}.png")]
        tile_url: String,

        /// Print each progress checkpoint to stdout as it is published.
        #[arg(long, default_value_t = false)]
        verbose: bool,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Analyze { input, output, tile_url, verbose } => run_analyze(&input, &output, &tile_url, verbose),
    }
}

fn run_analyze(input: &PathBuf, output: &PathBuf, tile_url: &str, verbose: bool) {
    let body = match std::fs::read_to_string(input) {
        Ok(b) => b,
        Err(e) => {
            eprintln!("{}: failed to read {}: {e}", "Error".red().bold(), input.display());
            exit(1);
        }
    };

    let request: JobRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{}: malformed job request: {e}", "Error".red().bold());
            exit(1);
        }
    };

    let config = TileCacheConfig::default();
    let source = HttpTileSource::new(tile_url, &config);
    let store = TileStore::new(Box::new(source), config);

    let sink: Box<dyn ProgressSink> = if verbose { Box::new(StdoutProgressSink) } else { Box::new(NullProgressSink) };
    let cancel = CancelToken::new();

    let outcome = match run_job(&request, &store, sink.as_ref(), &cancel) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("{}: {e}", "Job failed".red().bold());
            let error_body = serde_json::json!({ "status": "error", "cause": e.to_string() });
            if let Err(write_err) = std::fs::write(output, error_body.to_string()) {
                eprintln!("{}: could not write error result: {write_err}", "Error".red().bold());
            }
            exit(1);
        }
    };

    if matches!(outcome, JobOutcome::Canceled) {
        println!("{}", "Job canceled".yellow().bold());
    }

    let serialized = match serde_json::to_string_pretty(&outcome) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{}: failed to serialize result: {e}", "Error".red().bold());
            exit(1);
        }
    };

    if let Err(e) = std::fs::write(output, serialized) {
        eprintln!("{}: failed to write {}: {e}", "Error".red().bold(), output.display());
        exit(1);
    }

    println!("{} {}", "Wrote".green().bold(), output.display());
}
