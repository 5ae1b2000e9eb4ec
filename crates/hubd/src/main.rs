use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use hub_bots::weather::{DEFAULT_COUNTRY, DEFAULT_ZIP};
use hub_bots::{
    BotManager, BotOutcome, BotProfile, BotReport, HubConfig, MeteomaticsReporter, NostrConnector,
    RelayBot, RelayConnector, WeatherReporter,
};
use nostr_sdk::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod keys;

#[derive(Debug, Parser)]
#[command(name = "hubd")]
#[command(about = "SkateConnect hub relay bots")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the configured bots until interrupted or out of retries.
    Run(RunArgs),

    /// Print a bot identity, generating one if needed.
    Keygen {
        /// Identity file to load or create. Without it a throwaway key is printed.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Relay websocket URL, e.g. wss://relay.example.com
    #[arg(long, env = "HUB_RELAY")]
    relay: Option<String>,

    /// Bot secret key (nsec or hex).
    #[arg(long, env = "HUB_NSEC", hide_env_values = true)]
    nsec: Option<String>,

    /// Identity file used when no secret key is given (created if missing).
    #[arg(long, env = "HUB_IDENTITY")]
    identity: Option<PathBuf>,

    /// Expected bot public key; startup fails if it does not match the secret key.
    #[arg(long, env = "HUB_NPUB")]
    npub: Option<String>,

    /// Event id of the public channel the group bot serves and announces go to.
    #[arg(long, env = "HUB_CHANNEL_ID")]
    channel_id: Option<String>,

    /// Bots to run, comma separated (dm, group).
    #[arg(long, env = "HUB_BOTS", value_delimiter = ',', default_value = "dm,group")]
    bots: Vec<BotProfile>,

    /// Connection attempts per bot before giving up.
    #[arg(long, env = "HUB_MAX_RETRIES", default_value_t = 5)]
    max_retries: u32,

    #[arg(long, env = "HUB_RETRY_DELAY_SECS", default_value_t = 5)]
    retry_delay_secs: u64,

    /// Switches to exponential backoff capped at this many seconds.
    #[arg(long, env = "HUB_RETRY_MAX_DELAY_SECS")]
    retry_max_delay_secs: Option<u64>,

    /// A session that stayed live this long resets the retry count. 0 disables.
    #[arg(long, env = "HUB_RETRY_RESET_SECS", default_value_t = 60)]
    retry_reset_secs: u64,

    /// Live events handled concurrently per bot.
    #[arg(long, env = "HUB_MAX_IN_FLIGHT", default_value_t = 16)]
    max_in_flight: usize,

    /// Recently seen event ids remembered per bot. 0 disables deduplication.
    #[arg(long, env = "HUB_SEEN_CAPACITY", default_value_t = 2048)]
    seen_capacity: usize,

    #[arg(long, env = "HUB_CONNECT_TIMEOUT_SECS", default_value_t = 10)]
    connect_timeout_secs: u64,

    /// How often an idle subscription checks that its relay is still connected.
    #[arg(long, env = "HUB_LIVENESS_SECS", default_value_t = 5)]
    liveness_secs: u64,

    /// How long bots get to stop after an interrupt before they are aborted.
    #[arg(long, env = "HUB_SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    shutdown_grace_secs: u64,

    #[arg(long, env = "METEOMATICS_USERNAME", default_value = "")]
    weather_user: String,

    #[arg(
        long,
        env = "METEOMATICS_PASSWORD",
        default_value = "",
        hide_env_values = true
    )]
    weather_password: String,

    #[arg(long, env = "HUB_WEATHER_ZIP", default_value = DEFAULT_ZIP)]
    weather_zip: String,
}

impl RunArgs {
    fn hub_config(&self) -> anyhow::Result<HubConfig> {
        let secret_key = match (&self.nsec, &self.identity) {
            (Some(nsec), _) if !nsec.trim().is_empty() => nsec.clone(),
            (_, Some(path)) => keys::load_or_create_keys(path)?
                .secret_key()
                .to_secret_hex(),
            _ => String::new(),
        };
        Ok(HubConfig {
            relay_url: self.relay.clone().unwrap_or_default(),
            secret_key,
            public_key: self.npub.clone(),
            channel_id: self.channel_id.clone().unwrap_or_default(),
            bots: self.bots.clone(),
            max_retries: self.max_retries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            retry_max_delay: self.retry_max_delay_secs.map(Duration::from_secs),
            reset_after: (self.retry_reset_secs > 0)
                .then(|| Duration::from_secs(self.retry_reset_secs)),
            max_in_flight: self.max_in_flight,
            seen_capacity: self.seen_capacity,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // nostr-sdk pulls in ring; install it so rustls does not have to guess.
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Run(args) => run(args).await,
        Command::Keygen { out } => keygen(out),
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let configs = args
        .hub_config()?
        .validate()
        .context("invalid hub configuration")?;

    let connector: Arc<dyn RelayConnector> = Arc::new(NostrConnector::new(
        Duration::from_secs(args.connect_timeout_secs),
        Duration::from_secs(args.liveness_secs.max(1)),
    ));
    if args.weather_user.is_empty() {
        warn!("METEOMATICS_USERNAME is not set; weather requests will be rejected");
    }
    let weather: Arc<dyn WeatherReporter> = Arc::new(
        MeteomaticsReporter::new(&args.weather_user, &args.weather_password)
            .location(DEFAULT_COUNTRY, &args.weather_zip),
    );

    let mut manager = BotManager::new();
    for config in configs {
        info!(
            bot = %config.name,
            npub = %config.identity.npub(),
            relay = %config.identity.relay_url(),
            "configured bot"
        );
        manager.add(Arc::new(RelayBot::new(
            config,
            connector.clone(),
            weather.clone(),
        )));
    }
    manager.start_all();

    let reports = tokio::select! {
        reports = manager.wait_all() => reports,
        signal = tokio::signal::ctrl_c() => {
            signal.context("listen for ctrl-c")?;
            info!("interrupt received, stopping bots");
            manager
                .stop_all(Duration::from_secs(args.shutdown_grace_secs))
                .await
        }
    };
    summarize(&reports)
}

fn summarize(reports: &[BotReport]) -> anyhow::Result<()> {
    let failed: Vec<&str> = reports
        .iter()
        .filter(|r| {
            matches!(
                r.outcome,
                BotOutcome::Failed(_) | BotOutcome::Panicked(_) | BotOutcome::Aborted
            )
        })
        .map(|r| r.name.as_str())
        .collect();
    if !failed.is_empty() {
        bail!("bots ended abnormally: {}", failed.join(", "));
    }
    Ok(())
}

fn keygen(out: Option<PathBuf>) -> anyhow::Result<()> {
    let keys = match out {
        Some(path) => keys::load_or_create_keys(&path)?,
        None => Keys::generate(),
    };
    println!("nsec: {}", keys.secret_key().to_bech32()?);
    println!("npub: {}", keys.public_key().to_bech32()?);
    println!("hex:  {}", keys.public_key().to_hex());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_bots::{SessionError, SupervisorError};

    fn parse_run(args: &[&str]) -> RunArgs {
        let mut argv = vec!["hubd", "run"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().cmd {
            Command::Run(args) => args,
            other => panic!("expected run, got {other:?}"),
        }
    }

    #[test]
    fn run_flags_build_a_valid_config() {
        let keys = Keys::generate();
        let nsec = keys.secret_key().to_bech32().unwrap();
        let channel = "ab".repeat(32);
        let args = parse_run(&[
            "--relay",
            "wss://relay.example",
            "--nsec",
            &nsec,
            "--channel-id",
            &channel,
            "--bots",
            "group",
            "--retry-max-delay-secs",
            "40",
            "--retry-reset-secs",
            "0",
            "--liveness-secs",
            "2",
        ]);
        assert_eq!(args.liveness_secs, 2);

        let config = args.hub_config().unwrap();
        assert_eq!(config.bots, vec![BotProfile::Group]);
        assert_eq!(config.retry_max_delay, Some(Duration::from_secs(40)));
        assert_eq!(config.reset_after, None);

        let bots = config.validate().unwrap();
        assert_eq!(bots.len(), 1);
        assert_eq!(bots[0].name, "group-bot");
        assert_eq!(bots[0].identity.public_key(), keys.public_key());
    }

    #[test]
    fn identity_file_supplies_missing_secret() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        let path_arg = path.to_string_lossy().to_string();
        let args = parse_run(&["--identity", &path_arg]);
        assert_eq!(args.liveness_secs, 5);

        let config = args.hub_config().unwrap();
        let keys = keys::load_or_create_keys(&path).unwrap();
        assert_eq!(config.secret_key, keys.secret_key().to_secret_hex());
    }

    #[test]
    fn unknown_bot_profile_is_rejected_by_parser() {
        assert!(Cli::try_parse_from(["hubd", "run", "--bots", "dm,weather"]).is_err());
    }

    #[test]
    fn summary_fails_on_abnormal_outcomes() {
        let ok = BotReport {
            name: "dm-bot".to_string(),
            outcome: BotOutcome::Stopped,
        };
        assert!(summarize(std::slice::from_ref(&ok)).is_ok());

        let exhausted = BotReport {
            name: "group-bot".to_string(),
            outcome: BotOutcome::Failed(SupervisorError::RetriesExhausted {
                attempts: 5,
                last: SessionError::StreamEnded,
            }),
        };
        let err = summarize(&[ok, exhausted]).unwrap_err();
        assert!(err.to_string().contains("group-bot"));
    }
}
