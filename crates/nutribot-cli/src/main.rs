use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use nutribot_channels::TelegramTransport;
use nutribot_config::{AppConfig, ConfigLoader};
use nutribot_gateway::GatewayServer;
use nutribot_gateway::commands::BOT_COMMANDS;
use nutribot_security::{RedactingWriter, mask_secret};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "nutribot", version, about = "NutriBot - nutrition tracking assistant")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to a YAML config file. Environment variables override its values.
    #[arg(short, long, global = true, env = "NUTRIBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook and HTTP API server (default).
    Serve,
    /// Manage the Telegram webhook registration.
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },
    /// Publish the bot's command list to Telegram.
    Commands,
}

#[derive(Subcommand)]
enum WebhookAction {
    /// Point Telegram at `<url>/webhook`.
    Set {
        /// Public base URL; defaults to gateway.public_url.
        #[arg(long)]
        url: Option<String>,
    },
    /// Remove the webhook registration.
    Delete,
}

fn init_telemetry(cli: &Cli, config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(config.log_level.as_deref().unwrap_or("info"))
    });
    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(RedactingWriter::stderr()),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(RedactingWriter::stderr()),
            )
            .init();
    }
}

fn telegram(config: &AppConfig) -> anyhow::Result<TelegramTransport> {
    match config.telegram.bot_token.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(token) => Ok(TelegramTransport::new(token)),
        None => bail!("TELEGRAM_BOT_TOKEN is not configured"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::load(cli.config.as_deref()).context("failed to load config")?;
    init_telemetry(&cli, &config);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            if let Some(key) = config.llm.api_key.as_deref() {
                info!(model = %config.llm.model, "using OpenAI key {}", mask_secret(key));
            }
            GatewayServer::new(config)
                .run()
                .await
                .context("gateway exited with an error")?;
        }
        Commands::Webhook { action } => {
            let transport = telegram(&config)?;
            match action {
                WebhookAction::Set { url } => {
                    let Some(base_url) = url.or_else(|| config.gateway.public_url.clone()) else {
                        bail!("pass --url or set gateway.public_url (PUBLIC_URL)");
                    };
                    let registered = transport
                        .set_webhook(&base_url, config.telegram.webhook_secret.as_deref())
                        .await
                        .context("failed to register webhook")?;
                    println!("Webhook registered at {registered}");
                }
                WebhookAction::Delete => {
                    transport
                        .delete_webhook()
                        .await
                        .context("failed to delete webhook")?;
                    println!("Webhook removed");
                }
            }
        }
        Commands::Commands => {
            telegram(&config)?
                .set_commands(BOT_COMMANDS)
                .await
                .context("failed to publish bot commands")?;
            println!("Published {} bot commands", BOT_COMMANDS.len());
        }
    }

    Ok(())
}
