use crate::cli::{actions::Action, commands, dispatch::handler, telemetry};
use crate::exporter::GIT_COMMIT_HASH;
use anyhow::Result;
use tracing::info;

/// Map the `-v` count to a tracing level; none means errors only
const fn get_verbosity_level(verbose_count: u8) -> Option<tracing::Level> {
    match verbose_count {
        0 => None,
        1 => Some(tracing::Level::INFO),
        2 => Some(tracing::Level::DEBUG),
        _ => Some(tracing::Level::TRACE),
    }
}

/// Parse the command line, start logging and return the action to run
///
/// # Errors
///
/// Returns an error if telemetry initialization or argument handling fails
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    telemetry::init(get_verbosity_level(matches.get_count("verbose")))?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = GIT_COMMIT_HASH,
        "starting {}",
        env!("CARGO_PKG_NAME")
    );

    handler(&matches)
}
