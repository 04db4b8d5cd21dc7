use crate::{cli::actions::Action, collectors::COLLECTOR_NAMES};
use anyhow::{Result, anyhow};
use clap::ArgMatches;
use std::{path::PathBuf, time::Duration};
use tracing::info;

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    // Get the port or return an error
    let port = matches
        .get_one::<u16>("port")
        .copied()
        .ok_or_else(|| anyhow!("Port is required. Please provide it using the --port flag."))?;

    // Get the listen address (None means auto-detect)
    let listen = matches.get_one::<String>("listen").map(ToString::to_string);

    let config_file = matches
        .get_one::<String>("config.file")
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("Config file is required. Please provide it using the --config.file flag."))?;

    let telemetry_path = matches
        .get_one::<String>("web.telemetry-path")
        .map(|s| s.trim().to_string())
        .unwrap_or_default();

    if !telemetry_path.starts_with('/') {
        return Err(anyhow!(
            "Invalid telemetry path: '{telemetry_path}'. It must start with '/', e.g. /metrics"
        ));
    }

    if telemetry_path == "/health" {
        return Err(anyhow!("Invalid telemetry path: '/health' is reserved for the health check"));
    }

    let api_url = matches
        .get_one::<String>("api.url")
        .map(ToString::to_string)
        .ok_or_else(|| anyhow!("API URL is required. Please provide it using the --api.url flag."))?;

    let interval = Duration::from_secs(matches.get_one::<u64>("collect.interval").copied().unwrap_or_default());

    let prom_file = matches.get_one::<String>("metric.prom-file").map(PathBuf::from);

    let collectors = get_enabled_collectors(matches);

    info!(collectors = ?collectors, config_file = %config_file.display(), "parsed command line");

    Ok(Action::Run {
        port,
        listen,
        config_file,
        telemetry_path,
        api_url,
        interval,
        prom_file,
        collectors,
    })
}

pub fn get_enabled_collectors(matches: &ArgMatches) -> Vec<String> {
    COLLECTOR_NAMES
        .iter()
        .filter(|&name| {
            let enable_flag = format!("collector.{name}");
            let disable_flag = format!("no-collector.{name}");

            // If explicitly disabled, skip it
            if matches.get_flag(&disable_flag) {
                return false;
            }

            matches.get_flag(&enable_flag)
        })
        .map(|&name| name.to_string())
        .collect()
}
