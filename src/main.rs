// main.rs — Entry point for the HSK tutor.
// Supports CLI subcommands:
//   hsk-tutor          → start chatting
//   hsk-tutor setup    → interactive config wizard
//   hsk-tutor set-key  → update API key without full setup
//   hsk-tutor config   → print config file path

mod app;
mod config;
mod error;
mod network;
mod reply;
mod repl;
mod session;
mod tracking;

use anyhow::Result;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

fn print_usage() {
    eprintln!("Usage: hsk-tutor [command]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  (none)        Start a tutoring session");
    eprintln!("  setup         Run interactive setup wizard");
    eprintln!("  set-key       Update your OpenAI API key");
    eprintln!("  config        Show config file location");
    eprintln!("  help          Show this message");
    eprintln!();
    eprintln!("The API key is read from OPENAI_API_KEY (or .env) before the config file.");
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str());

    match command {
        Some("help") | Some("--help") | Some("-h") => {
            print_usage();
            return Ok(());
        }
        Some("config") => {
            match config::config_path() {
                Ok(p) => println!("{}", p.display()),
                Err(e) => {
                    eprintln!("❌ {e}");
                    std::process::exit(1);
                }
            }
            return Ok(());
        }
        Some("setup") => {
            let path = config::config_path()?;
            if let Err(e) = config::interactive_setup(&path).await {
                eprintln!("\n❌ Setup failed: {e}\n");
                std::process::exit(1);
            }
            return Ok(());
        }
        Some("set-key") => {
            match args.get(2) {
                Some(k) => {
                    if let Err(e) = config::set_api_key(k) {
                        eprintln!("\n❌ {e}\n");
                        std::process::exit(1);
                    }
                }
                None => {
                    eprintln!("Usage: hsk-tutor set-key <YOUR_API_KEY>");
                    std::process::exit(1);
                }
            }
            return Ok(());
        }
        Some(unknown) => {
            eprintln!("Unknown command: {}", unknown);
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
        None => {}
    }

    // ── Chat mode ──────────────────────────────────────────

    // Logs go to stderr so they never interleave with the transcript.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hsk_tutor=warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .compact()
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "HSK tutor starting");

    // No credential, no session.
    let cfg = match config::load() {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Configuration error");
            eprintln!("\n❌ {e}\n");
            std::process::exit(1);
        }
    };

    debug!(
        model = %cfg.model,
        hsk_level = cfg.hsk_level,
        api_base = %cfg.api_base,
        "Configuration loaded"
    );

    if let Err(e) = repl::run(cfg).await {
        error!(%e, "Fatal error in chat loop");
        eprintln!("\n❌ Fatal: {e}\n");
        std::process::exit(1);
    }

    Ok(())
}
