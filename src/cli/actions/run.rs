use crate::cli::actions::Action;
use crate::exporter::{Options, new};
use anyhow::Result;

/// Handle the run action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Run {
            port,
            listen,
            config_file,
            telemetry_path,
            api_url,
            interval,
            prom_file,
            collectors,
        } => {
            new(Options {
                port,
                listen,
                config_file,
                telemetry_path,
                api_url,
                interval,
                prom_file,
                collectors,
            })
            .await?;
        }
    }

    Ok(())
}
