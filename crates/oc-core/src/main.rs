use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use oc_core::ask::{exit_code, run_ask, EXIT_FAILURE};
use oc_core::config::Config;
use oc_core::proxy::{self, AppState};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ollachat", version, about = "Chat with a local Ollama model")]
struct Cli {
    /// Config file to load instead of the default location.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Ask the backend for a single JSON body instead of a stream.
    #[arg(long, global = true)]
    no_stream: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send one prompt and print the answer.
    Ask {
        /// Prompt text. Read from stdin when omitted.
        prompt: Option<String>,
    },
    /// Run the HTTP proxy.
    Serve,
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config, String> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path).map_err(|e| e.to_string())?,
        None => Config::load_or_default(),
    };
    let mut config = config.with_env_overrides();
    if cli.no_stream {
        config.backend.stream = false;
    }
    Ok(config)
}

fn read_prompt(arg: Option<String>) -> Option<String> {
    if let Some(prompt) = arg.filter(|p| !p.trim().is_empty()) {
        return Some(prompt);
    }
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return None;
    }
    let mut buf = String::new();
    match stdin.lock().read_to_string(&mut buf) {
        Ok(_) if !buf.trim().is_empty() => Some(buf.trim().to_string()),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "failed to read prompt from stdin");
            None
        }
    }
}

async fn ask(config: Config, prompt: String) -> i32 {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupt received");
            on_interrupt.cancel();
        }
    });

    let client = config.backend.client();
    let stdout = io::stdout();
    let is_tty = stdout.is_terminal();
    let outcome = run_ask(&config, &client, &prompt, stdout, is_tty, cancel).await;
    exit_code(&outcome.state)
}

async fn serve(config: Config) -> i32 {
    let state = AppState {
        client: config.backend.client(),
        system: config.backend.system.clone(),
    };
    match proxy::serve(&config.server.address(), state).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("ollachat: server error: {e}");
            EXIT_FAILURE
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Load .env before the subscriber so it can supply RUST_LOG.
    let dotenv = dotenvy::dotenv();

    init_tracing(match cli.command {
        Command::Ask { .. } => "warn",
        Command::Serve => "info",
    });

    if let Err(e) = dotenv {
        if !e.not_found() {
            warn!(error = %e, "failed to load .env");
        }
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("ollachat: {e}");
            std::process::exit(EXIT_FAILURE);
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("ollachat: failed to create async runtime: {e}");
            std::process::exit(EXIT_FAILURE);
        }
    };

    let code = match cli.command {
        Command::Ask { prompt } => {
            let Some(prompt) = read_prompt(prompt) else {
                eprintln!("ollachat: no prompt given (pass one as an argument or pipe it on stdin)");
                std::process::exit(EXIT_FAILURE);
            };
            runtime.block_on(ask(config, prompt))
        }
        Command::Serve => runtime.block_on(serve(config)),
    };
    std::process::exit(code);
}
