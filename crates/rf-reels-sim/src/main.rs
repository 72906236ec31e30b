//! rf-reels-sim: run one spin headless
//!
//! Usage:
//!   rf-reels-sim -c demos/five_reels.yaml -s demos/strips.json -o demos/spin.json
//!   rf-reels-sim ... --output windows --pretty
//!   rf-reels-sim ... --profile turbo --slam

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use serde::Serialize;

use rf_reels::{
    EngineConfig, EngineEvent, NullPresenter, Outcome, ReelEngine, ReelId, StripLibrary,
    SymbolCache, TimingProfile,
};

#[derive(Parser)]
#[command(name = "rf-reels-sim", about = "Run one reel spin headless")]
struct Cli {
    /// Engine configuration (JSON or YAML)
    #[arg(short, long)]
    config: PathBuf,

    /// Strip definitions (JSON or YAML)
    #[arg(short, long)]
    strips: PathBuf,

    /// Spin outcome (JSON or YAML)
    #[arg(short, long)]
    outcome: PathBuf,

    /// Tick step in ms (defaults to the configured fixed step)
    #[arg(long)]
    step_ms: Option<f64>,

    /// Spin time before the outcome arrives (ms)
    #[arg(long, default_value_t = 0.0)]
    outcome_after_ms: f64,

    /// Give up after this much simulated time (ms)
    #[arg(long, default_value_t = 60_000.0)]
    max_ms: f64,

    /// Override the configured timing profile
    #[arg(long, value_enum)]
    profile: Option<Profile>,

    /// Slam stop as soon as the outcome is set
    #[arg(long)]
    slam: bool,

    /// What to print
    #[arg(long, value_enum, default_value_t = Output::Events)]
    output: Output,

    /// Pretty-print JSON
    #[arg(long)]
    pretty: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Profile {
    Normal,
    Turbo,
    Mobile,
    Studio,
    Instant,
}

impl From<Profile> for TimingProfile {
    fn from(profile: Profile) -> Self {
        match profile {
            Profile::Normal => TimingProfile::Normal,
            Profile::Turbo => TimingProfile::Turbo,
            Profile::Mobile => TimingProfile::Mobile,
            Profile::Studio => TimingProfile::Studio,
            Profile::Instant => TimingProfile::Instant,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Output {
    /// Timestamped event trace
    Events,
    /// Visible symbols of every reel after the spin
    Windows,
}

#[derive(Serialize)]
struct ReelWindow {
    reel: ReelId,
    position: usize,
    symbols: Vec<String>,
}

#[derive(Serialize)]
struct Report {
    duration_ms: f64,
    events: Vec<EngineEvent>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    if cli.step_ms.is_some_and(|step| step <= 0.0) {
        bail!("--step-ms must be positive");
    }

    let mut config: EngineConfig =
        load(&cli.config, EngineConfig::from_json, EngineConfig::from_yaml)
            .context("loading engine config")?;
    if let Some(profile) = cli.profile {
        config = config.with_profile(profile.into());
    }

    let cache = Arc::new(SymbolCache::new());
    let strips = load(
        &cli.strips,
        |s| StripLibrary::from_json(s, &cache),
        |s| StripLibrary::from_yaml(s, &cache),
    )
    .context("loading strips")?;
    let outcome: Outcome =
        load(&cli.outcome, Outcome::from_json, Outcome::from_yaml).context("loading outcome")?;

    log::info!(
        "simulating {} reels over {} strips",
        config.reels.len(),
        strips.len()
    );
    let mut engine = ReelEngine::initialize(config, strips, cache, NullPresenter)?;
    let report = simulate(&mut engine, outcome, &cli)?;

    let json = match cli.output {
        Output::Events => to_json(&report, cli.pretty)?,
        Output::Windows => to_json(&windows(&engine), cli.pretty)?,
    };
    println!("{json}");
    Ok(())
}

fn simulate(engine: &mut ReelEngine, outcome: Outcome, cli: &Cli) -> Result<Report> {
    let start = engine.clock_ms();
    engine.spin()?;
    while engine.clock_ms() - start < cli.outcome_after_ms {
        engine.tick(cli.step_ms)?;
    }

    engine.set_outcome(outcome)?;
    if cli.slam {
        engine.slam_stop();
    }

    let remaining = (cli.max_ms - (engine.clock_ms() - start)).max(0.0);
    if !engine.run_until_stopped(cli.step_ms, remaining)? {
        bail!(
            "spin still in {} after {}ms",
            engine.phase().name(),
            cli.max_ms
        );
    }

    Ok(Report {
        duration_ms: engine.clock_ms() - start,
        events: engine.drain_events(),
    })
}

fn windows(engine: &ReelEngine) -> Vec<ReelWindow> {
    engine
        .reels()
        .iter()
        .map(|reel| ReelWindow {
            reel: reel.id(),
            position: reel.position(),
            symbols: reel.visible_server_names(),
        })
        .collect()
}

/// Parse a file as YAML when its extension says so, JSON otherwise.
fn load<T, E>(
    path: &Path,
    from_json: impl FnOnce(&str) -> Result<T, E>,
    from_yaml: impl FnOnce(&str) -> Result<T, E>,
) -> Result<T>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml" | "yml")
    );
    let parsed = if is_yaml {
        from_yaml(&text)
    } else {
        from_json(&text)
    };
    parsed.with_context(|| format!("parsing {}", path.display()))
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(json)
}
