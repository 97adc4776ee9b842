use account_steward::{
    generate_export, open_store, CooldownController, HttpAccountProvider, LinkQueue, Router,
    StewardConfig,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "account-steward", version, about = "Provision sessions and learn safe join cooldowns")]
struct Cli {
    /// Directory holding links.db, sessions/ and assist files
    #[arg(long, env = "STEWARD_DATA_DIR", default_value = ".")]
    data_dir: PathBuf,

    /// Auth-bridge sidecar base URL
    #[arg(long, env = "STEWARD_PROVIDER_URL", default_value = "http://127.0.0.1:8081")]
    provider_url: String,

    /// Initial cooldown recommendation in seconds
    #[arg(
        long,
        env = "STEWARD_DEFAULT_COOLDOWN",
        default_value_t = account_steward::DEFAULT_COOLDOWN,
        value_parser = account_steward::config::parse_positive_seconds
    )]
    default_cooldown: f64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Console gateway: each stdin line is a message from one operator
    Run {
        #[arg(long, default_value_t = 1)]
        operator: i64,
    },
    /// Import a newline-delimited links file
    Seed { file: PathBuf },
    /// List accounts and their cooldown estimates
    Accounts,
    /// Print the join-assist artifact for a session
    Export { session: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let config = StewardConfig::from_data_dir(&cli.data_dir)
        .with_default_cooldown(cli.default_cooldown)
        .with_provider_url(cli.provider_url.clone());

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create data dir {:?}", config.data_dir))?;
    let store = open_store(&config.db_file)
        .with_context(|| format!("Failed to open database {:?}", config.db_file))?;

    match cli.command.unwrap_or(Command::Run { operator: 1 }) {
        Command::Run { operator } => run_console(config, store, operator).await?,
        Command::Seed { file } => {
            let conn = account_steward::db::lock(&store)?;
            let added = LinkQueue::default().seed_from_file(&conn, &file)?;
            println!("✓ Seeded {} links from {}", added, file.display());
        }
        Command::Accounts => {
            let conn = account_steward::db::lock(&store)?;
            let accounts = account_steward::get_all_accounts(&conn)?;
            if accounts.is_empty() {
                println!("No saved sessions found.");
            }
            for account in accounts {
                println!(
                    "{}\towner={}\tcooldown={:.1}s",
                    account.session_name, account.owner_id, account.cooldown_estimate
                );
            }
        }
        Command::Export { session } => {
            let cooldown = CooldownController::with_alpha(config.default_cooldown, config.ema_alpha);
            match generate_export(&store, &LinkQueue::default(), &cooldown, &session)? {
                Some(artifact) => print!("{}", artifact.render()),
                None => eprintln!("No pending group links."),
            }
        }
    }

    Ok(())
}

async fn run_console(config: StewardConfig, store: account_steward::Store, operator: i64) -> Result<()> {
    let provider = Arc::new(HttpAccountProvider::new(config.provider_url.clone()));
    let router = Router::new(config, store, provider);

    info!(operator, "console gateway ready");
    println!("Type /start for help, Ctrl+D to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        for reply in router.handle(operator, &line).await {
            println!("{}", reply.text);
            if let Some(artifact) = reply.artifact {
                println!("----\n{}----", artifact);
            }
        }
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,account_steward=debug"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}
