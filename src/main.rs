use std::process::ExitCode;

use forward::{bootstrap, config::Config};
use tracing::{error, info, info_span, warn};

mod logging;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging system
    if let Err(e) = logging::init_logging_from_env() {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    let config = {
        let _span = info_span!("forward_startup").entered();

        info!("Starting forward proxy");

        match Config::from_env() {
            Ok((config, warnings)) => {
                for warning in &warnings {
                    warn!("{}", warning);
                }
                config
            }
            Err(errors) => {
                for warning in &errors.warnings {
                    warn!("{}", warning);
                }
                for e in errors.iter() {
                    error!("{}", e);
                }
                return ExitCode::FAILURE;
            }
        }
    };

    match bootstrap::run(config).await {
        Ok(()) => {
            info!("All listeners stopped, exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
