mod cli;

use anyhow::Result;
use clap::Parser;
use cli::commands::{self, Backend};
use cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so --json output stays clean
    let rust_log = std::env::var("RUST_LOG").ok();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter(cli.verbose, rust_log.as_deref()))
        .init();

    match &cli.command {
        Commands::Auth(cmd) => commands::handle_auth_command(cmd, cli.offline, cli.json).await?,
        command => {
            let backend = Backend::connect(cli.offline)?;
            tracing::debug!(offline = cli.offline, "backend ready");
            run(&backend, command, cli.json).await?;
        }
    }

    Ok(())
}

async fn run(backend: &Backend, command: &Commands, json: bool) -> Result<()> {
    match command {
        Commands::Auth(cmd) => commands::handle_auth_command(cmd, backend.is_offline(), json).await,
        Commands::Apps(cmd) => commands::handle_app_command(backend, cmd, json).await,
        Commands::Docs(cmd) => commands::handle_doc_command(backend, cmd, json).await,
        Commands::Faqs(cmd) => commands::handle_faq_command(backend, cmd, json).await,
        Commands::Projects(cmd) => commands::handle_project_command(backend, cmd, json).await,
        Commands::Watch { collection } => commands::watch(backend, *collection, json).await,
    }
}

/// `RUST_LOG` when set, warn otherwise; `-v` raises the default to debug
fn log_filter(verbose: bool, rust_log: Option<&str>) -> EnvFilter {
    let filter = match rust_log {
        Some(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new("warn"),
    };
    if verbose {
        filter.add_directive(tracing::Level::DEBUG.into())
    } else {
        filter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn rust_log_applies_without_verbose() {
        assert_eq!(
            log_filter(false, Some("debug")).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
        assert_eq!(
            log_filter(false, Some("info")).max_level_hint(),
            Some(LevelFilter::INFO)
        );
    }

    #[test]
    fn defaults_to_warn() {
        assert_eq!(log_filter(false, None).max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(log_filter(false, Some("  ")).max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn verbose_raises_to_debug() {
        assert_eq!(log_filter(true, None).max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
