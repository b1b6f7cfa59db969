use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use relaybot_core::config::{self, Config};
use relaybot_core::provider::openai_compat::OpenAiCompatProvider;
use relaybot_core::reply::ReplyGenerator;
use relaybot_core::service::http::{serve, AppState};

#[derive(Parser)]
#[command(
    name = "relaybot",
    about = "LINE webhook relay answering chat messages with a hosted LLM",
    version = relaybot_core::VERSION,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webhook server
    Serve {
        /// Bind address (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port (overrides config and PORT)
        #[arg(short, long)]
        port: Option<u16>,
        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },
    /// Generate a single reply from the terminal
    Ask {
        /// Message to send to the model
        #[arg(required = true)]
        message: Vec<String>,
    },
    /// Show relaybot configuration status
    Status,
    /// Write a default configuration file
    Init,
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let mut filter = EnvFilter::from_default_env();
    for target in ["relaybot", "relaybot_core", "tower_http"] {
        filter = filter.add_directive(format!("{target}={level}").parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let verbose = matches!(cli.command, Commands::Serve { verbose: true, .. });
    init_tracing(verbose)?;

    match cli.command {
        Commands::Serve { host, port, .. } => cmd_serve(host, port).await?,
        Commands::Ask { message } => cmd_ask(message.join(" ")).await?,
        Commands::Status => cmd_status(),
        Commands::Init => cmd_init()?,
    }

    Ok(())
}

// ====== Commands ======

async fn cmd_serve(host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut cfg = config::load_config_from_env();
    if let Some(host) = host {
        cfg.server.host = host;
    }
    if let Some(port) = port {
        cfg.server.port = port;
    }

    let tmp = config::static_tmp_path();
    std::fs::create_dir_all(&tmp)
        .with_context(|| format!("creating {}", tmp.display()))?;

    let state = Arc::new(AppState::from_config(&cfg)?);
    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    println!("Starting relaybot on {} (model {})...", addr, cfg.provider.model);

    serve(&addr, state).await?;
    Ok(())
}

async fn cmd_ask(message: String) -> Result<()> {
    let cfg = config::load_config_from_env();
    if cfg.provider.api_key.is_empty() {
        eprintln!("Error: No API key configured.");
        eprintln!("Set NVIDIA_API_KEY or provider.apiKey in {}", config::get_config_path().display());
        std::process::exit(1);
    }

    let client = relaybot_core::util::http::build_client(Duration::from_secs(
        cfg.provider.timeout_secs,
    ))?;
    let provider = OpenAiCompatProvider::new(
        client,
        cfg.provider.api_key.clone(),
        &cfg.provider.api_base,
    );
    let generator = ReplyGenerator::new(Arc::new(provider), cfg.generation_params());

    println!("{}", generator.generate(&message).await);
    Ok(())
}

fn cmd_status() {
    let config_path = config::get_config_path();
    let cfg = config::load_config_from_env();

    println!("relaybot {} status\n", relaybot_core::VERSION);
    println!(
        "Config: {} {}",
        config_path.display(),
        if config_path.exists() { "✓" } else { "✗" }
    );
    println!("Listen: {}:{}", cfg.server.host, cfg.server.port);
    println!("Model: {} via {}", cfg.provider.model, cfg.provider.api_base);
    println!("Channel secret: {}", set_or_not(&cfg.line.channel_secret));
    println!("Channel access token: {}", set_or_not(&cfg.line.channel_access_token));
    println!("Model API key: {}", set_or_not(&cfg.provider.api_key));

    match cfg.validate() {
        Ok(()) => println!("\nReady to serve."),
        Err(e) => println!("\nNot ready: {}", e),
    }
}

fn set_or_not(value: &str) -> &'static str {
    if value.is_empty() {
        "not set"
    } else {
        "✓"
    }
}

fn cmd_init() -> Result<()> {
    let path = config::get_config_path();
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }

    config::save_config(&Config::default(), Some(&path))?;
    println!("Wrote default config to {}", path.display());
    println!("Fill in line.channelSecret, line.channelAccessToken and provider.apiKey,");
    println!("or export CHANNEL_SECRET, CHANNEL_ACCESS_TOKEN and NVIDIA_API_KEY.");
    Ok(())
}
