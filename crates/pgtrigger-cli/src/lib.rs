//! Management commands for pgtrigger.
//!
//! Triggers are registered by the host application, so the commands run
//! inside the host binary:
//!
//! ```ignore
//! #[tokio::main]
//! async fn main() {
//!     if let Err(e) = pgtrigger_cli::run(std::env::args().collect()).await {
//!         eprintln!("{e:#}");
//!         std::process::exit(1);
//!     }
//! }
//! ```

mod cli;
mod commands;
mod config;

use commands::Action;
use tracing_subscriber::EnvFilter;

pub async fn run(args: Vec<String>) -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cmd = cli::parse_args(&args)?;
    match cmd {
        cli::Command::Help(topic) => {
            cli::print_help(topic);
            Ok(())
        }
        cli::Command::Ls(args) => commands::run(Action::Ls, args).await,
        cli::Command::Install(args) => {
            let prune = !args.no_prune;
            commands::run(Action::Install { prune }, args).await
        }
        cli::Command::Uninstall(args) => {
            let prune = !args.no_prune;
            commands::run(Action::Uninstall { prune }, args).await
        }
        cli::Command::Enable(args) => commands::run(Action::Enable, args).await,
        cli::Command::Disable(args) => commands::run(Action::Disable, args).await,
        cli::Command::Prune(args) => commands::run(Action::Prune, args).await,
    }
}

/// Log `pgtrigger=info` (or `RUST_LOG`) to stderr unless the host already
/// installed a subscriber.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pgtrigger=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
