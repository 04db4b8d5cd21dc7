pub mod run;

use std::{path::PathBuf, time::Duration};

#[derive(Debug)]
pub enum Action {
    Run {
        port: u16,
        listen: Option<String>,
        config_file: PathBuf,
        telemetry_path: String,
        api_url: String,
        interval: Duration,
        prom_file: Option<PathBuf>,
        collectors: Vec<String>,
    },
}
