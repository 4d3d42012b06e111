mod auth_commands;
mod paste;
mod provider;
mod send_command;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tokenline_client::ClientError,
    tokenline_oauth::OAuthError,
    tracing::{debug, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "tokenline", about = "OAuth authorization code + PKCE token manager")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (toml, yaml or json). Defaults to $TOKENLINE_CONFIG or the
    /// user config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Provider section to use. Defaults to `default_provider`.
    #[arg(long, global = true, env = "TOKENLINE_PROVIDER")]
    provider: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Authentication management for OAuth providers.
    Auth {
        #[command(subcommand)]
        action: auth_commands::AuthAction,
    },
    /// Send one message to the provider's API with the stored token.
    Send {
        #[arg(short, long)]
        message: String,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        max_tokens: Option<u32>,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "tokenline starting");

    let result = run(cli).await;
    if let Err(err) = &result {
        debug!(error = %err, "command failed");
        if needs_login(err) {
            eprintln!("hint: run `tokenline auth login` to sign in again");
        }
    }
    result
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = tokenline_config::load(cli.config.as_deref())?;
    let selected = cli.provider.as_deref();

    match cli.command {
        Commands::Auth { action } => auth_commands::handle_auth(action, &config, selected).await,
        Commands::Send {
            message,
            model,
            max_tokens,
        } => {
            let provider = provider::Provider::open(&config, selected)?;
            let options = tokenline_client::SendOptions { model, max_tokens };
            send_command::send(&provider, &message, &options).await
        },
    }
}

fn needs_login(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if let Some(oauth) = cause.downcast_ref::<OAuthError>() {
            return oauth.requires_reauthorization();
        }
        matches!(
            cause.downcast_ref::<ClientError>(),
            Some(ClientError::Auth(oauth)) if oauth.requires_reauthorization()
        )
    })
}

#[cfg(test)]
mod tests {
    use {super::*, anyhow::Context};

    #[test]
    fn test_needs_login_for_oauth_errors() {
        let err = anyhow::Error::from(OAuthError::NotAuthenticated);
        assert!(needs_login(&err));

        let wrapped = Err::<(), _>(OAuthError::NoRefreshToken)
            .context("refreshing")
            .unwrap_err();
        assert!(needs_login(&wrapped));

        let client = anyhow::Error::from(ClientError::Auth(OAuthError::Refresh {
            status: 400,
            body: String::new(),
        }));
        assert!(needs_login(&client));
    }

    #[test]
    fn test_no_login_hint_for_transient_errors() {
        assert!(!needs_login(&anyhow::Error::from(OAuthError::Transport(
            "timeout".into()
        ))));
        assert!(!needs_login(&anyhow::Error::from(ClientError::Http {
            status: 500,
            body: String::new(),
        })));
        assert!(!needs_login(&anyhow::anyhow!("config missing")));
    }

    #[test]
    fn test_cli_parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "tokenline",
            "auth",
            "login",
            "--manual",
            "--provider",
            "example",
        ])
        .unwrap();
        assert_eq!(cli.provider.as_deref(), Some("example"));
        assert!(matches!(
            cli.command,
            Commands::Auth {
                action: auth_commands::AuthAction::Login {
                    manual: true,
                    no_browser: false
                }
            }
        ));
    }
}
