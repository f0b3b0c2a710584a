use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use hover_fc::autodetect::autodetect_fc;
use hover_fc::mav::FcLink;
use hover_fc::{modes, FcConfig};
use hover_proto::TargetPose;
use hover_seq::{doctor as seq_doctor, SequenceConfig, SequenceError, Sequencer, Shutdown};

#[derive(Debug, Parser)]
#[command(name = "hover", version, about = "hover - guided takeoff and position hold over MAVLink")]
struct Cli {
    /// TOML config; built-in defaults when omitted.
    #[arg(long)]
    config: Option<String>,

    /// Override fc.endpoint (disables autodetect).
    #[arg(long)]
    endpoint: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config without touching the vehicle.
    Doctor,
    /// Connect, arm, take off and hold the target position.
    Run,
    Fc { #[command(subcommand)] cmd: FcCmd },
}

#[derive(Debug, Subcommand)]
enum FcCmd {
    /// Scan serial ports/bauds for MAVLink heartbeats.
    Autodetect,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct Config {
    fc: FcConfig,
    sequence: SequenceConfig,
    target: TargetPose,
}

fn load_config(path: Option<&str>) -> Result<Config> {
    let Some(path) = path else { return Ok(Config::default()); };
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    parse_config(&s)
}

fn parse_config(s: &str) -> Result<Config> {
    toml::from_str(s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let mut cfg = load_config(cli.config.as_deref())?;
    if let Some(endpoint) = cli.endpoint {
        cfg.fc.endpoint = endpoint;
        cfg.fc.autodetect = false;
    }

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(cfg).await?,
        Command::Fc { cmd } => fc_cmd(&cfg, cmd).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");
    cfg.fc.check()?;
    seq_doctor::check_sequence(&cfg.sequence)?;
    seq_doctor::check_target(&cfg.target)?;
    anyhow::ensure!(
        modes::custom_mode(&cfg.sequence.mode).is_some(),
        "sequence.mode {:?} is not a known flight mode",
        cfg.sequence.mode
    );
    if cfg.fc.autodetect {
        info!("doctor: fc autodetect enabled (OK)");
    }
    info!("doctor: OK");
    Ok(())
}

async fn fc_cmd(cfg: &Config, cmd: FcCmd) -> Result<()> {
    match cmd {
        FcCmd::Autodetect => {
            let res = autodetect_fc(&cfg.fc)?;
            if let Some((dev, baud)) = &res.chosen {
                println!("CHOSEN: {} @ {}", dev, baud);
            } else {
                println!("CHOSEN: none");
            }
            for p in res.attempts {
                println!("try dev={} baud={} hb={} {}ms note={}", p.dev, p.baud, p.hb_seen, p.elapsed_ms, p.note);
            }
            Ok(())
        }
    }
}

async fn run(cfg: Config) -> Result<()> {
    info!("run: starting at {}", time::OffsetDateTime::now_utc());
    doctor(&cfg)?;

    let shutdown = Shutdown::new();
    let stop = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            stop.request();
        }
    });

    // The sequencer blocks on link I/O and sleeps, so it gets its own thread.
    let outcome = tokio::task::spawn_blocking(move || -> Result<Result<(), SequenceError>> {
        let endpoint = resolve_endpoint(&cfg.fc)?;
        let link = FcLink::open(&endpoint, &cfg.fc).context("FC open")?;
        let mut seq = Sequencer::new(link, cfg.sequence, cfg.target, shutdown);
        Ok(seq.run())
    })
    .await
    .context("sequencer task failed")??;

    match outcome {
        Ok(()) => {
            info!("run: stopped");
            Ok(())
        }
        Err(e) => {
            let code = e.exit_code();
            error!("run: sequence aborted: {:#}", anyhow::Error::from(e));
            std::process::exit(code);
        }
    }
}

fn resolve_endpoint(fc: &FcConfig) -> Result<String> {
    if fc.autodetect {
        let res = autodetect_fc(fc)?;
        res.endpoint().context("fc autodetect failed: no heartbeat found")
    } else {
        Ok(fc.endpoint.clone())
    }
}
