use std::path::PathBuf;
use std::process::ExitCode;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

mod context;
mod server;

#[derive(Parser, Debug, Clone)]
#[command(name = "titan")]
#[command(author, version, about = "Titan - account pool for reporting and commending players")]
pub struct Args {
    /// Operator-managed list of accounts.
    #[arg(long, default_value = "accounts.json")]
    accounts_file: PathBuf,

    /// Persisted per-account state.
    #[arg(long, default_value = "index.json")]
    index_file: PathBuf,

    /// History of targeted players.
    #[arg(long, default_value = "victims.json")]
    victims_file: PathBuf,

    #[arg(long, default_value = "webcache.json")]
    web_cache_file: PathBuf,

    /// Newline-separated list of players that must never be targeted.
    #[arg(long, default_value = "blacklist.txt")]
    blacklist_file: PathBuf,

    /// Same as --blacklist-file, fetched over HTTP. Takes precedence.
    #[arg(long)]
    blacklist_url: Option<String>,

    /// Disables the blacklist entirely.
    #[arg(long, default_value = "false")]
    noblacklist: bool,

    /// Log in and act with simulated sessions; nothing is sent anywhere.
    #[arg(long, default_value = "false")]
    dummy: bool,

    #[arg(long, short = 'd', default_value = "false")]
    debug: bool,

    #[arg(long, default_value_t = 30)]
    action_timeout_secs: u64,

    #[arg(long, default_value_t = 30)]
    cooldown_mins: u64,

    #[arg(long, default_value_t = 15)]
    tracking_interval_mins: u64,

    #[arg(long, default_value_t = 30)]
    victim_retention_days: u64,

    #[arg(long, default_value_t = 60)]
    shutdown_timeout_secs: u64,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Report a player with every ready account (or --accounts N).
    Report(ReportArgs),
    /// Commend a player.
    Commend(CommendArgs),
    /// Idle in games (not available yet).
    Idle(IdleArgs),
    /// Only check whether a player may be targeted.
    Check {
        target: String,
    },
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ReportArgs {
    /// SteamID64, STEAM_X:Y:Z, [U:1:W] or profile URL.
    pub target: String,

    /// Match share code (CSGO-xxxxx-...).
    #[arg(long = "match")]
    pub match_code: Option<String>,

    #[arg(long)]
    pub abusive_text: bool,
    #[arg(long)]
    pub abusive_voice: bool,
    #[arg(long)]
    pub griefing: bool,
    #[arg(long)]
    pub aim_hacking: bool,
    #[arg(long)]
    pub wall_hacking: bool,
    #[arg(long)]
    pub other_hacking: bool,

    /// Use at most this many accounts.
    #[arg(long, value_parser = parse_account_count)]
    pub accounts: Option<usize>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CommendArgs {
    pub target: String,

    #[arg(long)]
    pub friendly: bool,
    #[arg(long)]
    pub leader: bool,
    #[arg(long)]
    pub teacher: bool,

    #[arg(long, value_parser = parse_account_count)]
    pub accounts: Option<usize>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct IdleArgs {
    #[arg(long = "game", default_value = "730")]
    pub app_ids: Vec<u32>,
}

fn parse_account_count(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn init_tracing(debug: bool) -> anyhow::Result<()> {
    tracing_log::LogTracer::init()?;
    let default = if debug { "titan=debug" } else { "titan=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let sub = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(sub)?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();
    if let Err(e) = init_tracing(args.debug) {
        eprintln!("Failed to set up logging: {e}");
        return ExitCode::FAILURE;
    }
    info!("Titan starting.");

    match server::run_server(args).await {
        Ok(()) => {
            info!("Goodbye!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
