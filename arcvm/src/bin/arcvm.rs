// ARCVM command-line runner
// Evaluates a source file or an inline expression and prints the last value.

use arcvm::{ArcvmConfig, Evaluator};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use std::process;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "arcvm")]
#[command(about = "Evaluate Arc-family Lisp programs on a continuation-passing evaluator")]
#[command(version = "0.1.0")]
struct Args {
    /// Source file to evaluate
    #[arg(value_name = "FILE", conflicts_with = "expr")]
    file: Option<PathBuf>,

    /// Inline expression(s) to evaluate
    #[arg(short = 'e', long = "expr")]
    expr: Option<String>,

    /// TOML configuration file
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Cap on trampoline iterations (overrides the config file)
    #[arg(long)]
    max_steps: Option<u64>,
}

fn main() {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match ArcvmConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("❌ {}", e);
                process::exit(1);
            }
        },
        None => ArcvmConfig::default(),
    };
    if let Some(max_steps) = args.max_steps {
        config.evaluator.max_steps = Some(max_steps);
    }

    let filter = EnvFilter::try_from_env("ARCVM_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let source = match (&args.file, &args.expr) {
        (Some(path), _) => match fs::read_to_string(path) {
            Ok(source) => source,
            Err(e) => {
                eprintln!("❌ Failed to read {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        (None, Some(expr)) => expr.clone(),
        (None, None) => {
            eprintln!("❌ Nothing to evaluate: pass a FILE or --expr");
            process::exit(2);
        }
    };

    let evaluator = match Evaluator::new(config.evaluator.clone()) {
        Ok(evaluator) => evaluator,
        Err(e) => {
            eprintln!("❌ {}", e);
            process::exit(1);
        }
    };
    debug!(max_steps = ?config.evaluator.max_steps, "evaluator ready");

    match evaluator.eval_source(&source) {
        Ok(value) => println!("{}", value),
        Err(e) => {
            error!(kind = e.kind(), "evaluation failed");
            eprintln!("❌ {}", e);
            process::exit(1);
        }
    }
}
