use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod util;

#[derive(Parser)]
#[command(
    name = "sentinel",
    version,
    about = "Sentinel CLI: inspect and manage request admission"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "SENTINEL_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Admin token for /v1/admin routes
    #[arg(long, env = "SENTINEL_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,

    /// Include HTTP status and headers in the output
    #[arg(long, short = 'i', global = true)]
    include: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Show admission counters and table sizes (admin)
    Stats,
    /// Show limiter and block state for one identity (admin)
    Inspect {
        /// Caller identity, usually an IP address
        identity: String,
    },
    /// Clear all admission state for one identity, lifting any block (admin)
    Reset {
        /// Caller identity, usually an IP address
        identity: String,
    },
    /// Admission config utilities (offline)
    Config {
        #[command(subcommand)]
        command: commands::config::ConfigCommands,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let token = cli.admin_token.as_deref();

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url, cli.include).await,
        Commands::Stats => commands::admission::stats(&cli.api_url, token, cli.include).await,
        Commands::Inspect { identity } => {
            commands::admission::inspect(&cli.api_url, token, &identity, cli.include).await
        }
        Commands::Reset { identity } => {
            commands::admission::reset(&cli.api_url, token, &identity, cli.include).await
        }
        Commands::Config { command } => commands::config::run(command),
    };

    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_inspect_with_ipv6_identity() {
        let cli = Cli::try_parse_from(["sentinel", "--admin-token", "t", "inspect", "::1"]).unwrap();
        match cli.command {
            Commands::Inspect { identity } => assert_eq!(identity, "::1"),
            _ => panic!("expected inspect"),
        }
        assert_eq!(cli.admin_token.as_deref(), Some("t"));
    }

    #[test]
    fn parses_config_check() {
        let cli = Cli::try_parse_from(["sentinel", "config", "check", "engine.json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                command: commands::config::ConfigCommands::Check { .. }
            }
        ));
    }
}
