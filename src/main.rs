use std::path::PathBuf;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use aisha_voice::VoiceConfig;
use aisha_voice::core::realtime::TokenClient;

/// AiSHA voice core - realtime session and wake word tooling
#[derive(Parser, Debug)]
#[command(name = "aisha-voice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the effective configuration
    Config,

    /// Request an ephemeral realtime token and print it masked
    Token {
        /// Tenant to scope the token to (defaults to the configured tenant)
        #[arg(short = 't', long = "tenant")]
        tenant: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        info!("Loading configuration from {}", config_path.display());
        VoiceConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        VoiceConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    match cli.command.unwrap_or(Commands::Config) {
        Commands::Config => print_config(&config)?,
        Commands::Token { tenant } => {
            let tenant = tenant.or_else(|| config.tenant_resolver().active_tenant());
            let client = TokenClient::new(reqwest::Client::new(), &config.realtime)?;
            let token = client.fetch(tenant.as_deref()).await?;
            println!("token:      {}", token.masked());
            match token.expires_at() {
                Some(expires_at) => println!("expires_at: {expires_at}"),
                None => println!("expires_at: unknown"),
            }
        }
    }

    Ok(())
}

fn print_config(config: &VoiceConfig) -> anyhow::Result<()> {
    println!("realtime:");
    print!("{}", indent(&serde_yaml::to_string(&config.realtime)?));

    let wake = &config.wake_word;
    println!("wake_word:");
    println!("  wake_phrases: {:?}", wake.wake_phrases);
    println!("  end_phrases: {:?}", wake.end_phrases);
    println!("  language: {}", wake.language);
    println!("  cooldown_ms: {}", wake.cooldown.as_millis());
    println!("  auto_sleep_ms: {}", wake.auto_sleep.as_millis());

    println!("voice:");
    println!(
        "  turn_taking_delay_ms: {}",
        config.voice.turn_taking_delay.as_millis()
    );

    println!("telemetry:");
    println!("  capacity: {}", config.telemetry.capacity);
    println!("  debug: {}", config.telemetry.debug);

    println!("tenant:");
    println!("  id: {}", config.tenant_id.as_deref().unwrap_or("-"));
    println!(
        "  file: {}",
        config
            .tenant_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("  user_id: {}", config.user_id.as_deref().unwrap_or("-"));
    Ok(())
}

fn indent(block: &str) -> String {
    block.lines().map(|line| format!("  {line}\n")).collect()
}
