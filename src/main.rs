//! Staking TE engine - command line entry point
//! Reads a calculation request as JSON and prints the full analysis

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use staking_te_engine::{
    CalculationRequest, EngineConfig, Leg, RedemptionPattern, StakingRiskEngine,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Two-asset staking tracking-error engine
#[derive(Parser, Debug)]
#[command(name = "staking-te")]
#[command(about = "Tracking error and net benefit of staking two illiquid index holdings")]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(short, long, env = "STAKING_TE_CONFIG")]
    config: Option<PathBuf>,

    /// Print single-line JSON
    #[arg(long)]
    compact: bool,

    /// Analyze the standard redemption schedule for one leg (a or b) instead
    #[arg(long, value_parser = parse_leg)]
    schedule: Option<Leg>,

    /// Request file; stdin when absent or "-"
    request: Option<PathBuf>,
}

fn parse_leg(s: &str) -> Result<Leg, String> {
    match s.to_ascii_lowercase().as_str() {
        "a" => Ok(Leg::A),
        "b" => Ok(Leg::B),
        other => Err(format!("unknown leg {other}, expected a or b")),
    }
}

fn read_request(path: Option<&Path>) -> Result<CalculationRequest> {
    let json = match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("reading request {}", path.display()))?,
        _ => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading request from stdin")?;
            buf
        }
    };
    if json.trim().is_empty() {
        return Ok(CalculationRequest::default());
    }
    serde_json::from_str(&json).context("parsing calculation request")
}

fn print_json<T: Serialize>(value: &T, compact: bool) -> Result<()> {
    let out = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{out}");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading engine config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let request = read_request(cli.request.as_deref())?;
    let engine = StakingRiskEngine::new(config).context("building engine")?;

    if let Some(leg) = cli.schedule {
        let resolved = request.resolve().context("resolving request")?;
        let analysis = engine
            .episodic_analyzer(&resolved, leg)
            .and_then(|a| a.analyze_schedule(&RedemptionPattern::standard_schedule(), None))
            .context("schedule analysis failed")?;
        info!(%leg, tracking_error = analysis.tracking_error, "schedule analyzed");
        return print_json(&analysis, cli.compact);
    }

    let response = engine.calculate(&request).context("calculation failed")?;
    info!(
        tracking_error = response.decomposition.tracking_error,
        optimal_staking_level = response.optimal_staking_level,
        "done"
    );
    print_json(&response, cli.compact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flags_and_request() {
        let cli = Cli::try_parse_from(["staking-te", "--config", "engine.json", "--compact", "req.json"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("engine.json")));
        assert!(cli.compact);
        assert_eq!(cli.request, Some(PathBuf::from("req.json")));
        assert!(cli.schedule.is_none());

        let cli = Cli::try_parse_from(["staking-te", "-c", "engine.json", "--schedule", "B"]).unwrap();
        assert_eq!(cli.schedule, Some(Leg::B));
        assert!(cli.request.is_none());
    }

    #[test]
    fn test_rejects_bad_arguments() {
        assert!(Cli::try_parse_from(["staking-te", "--verbose"]).is_err());
        assert!(Cli::try_parse_from(["staking-te", "a.json", "b.json"]).is_err());
        assert!(Cli::try_parse_from(["staking-te", "--schedule", "c"]).is_err());
        assert!(Cli::try_parse_from(["staking-te", "--config"]).is_err());
    }
}
