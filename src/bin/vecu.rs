use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{info, warn};

use vecu::cli::{self, Invocation};
use vecu::config::LauncherConfig;
use vecu::error::log_launch_error;
use vecu::logging;
use vecu::transport::PlatformCapability;
use vecu::{launch, shutdown_channel, LaunchError};

fn main() -> ExitCode {
    let invocation = match cli::parse_from(std::env::args_os()) {
        Ok(invocation) => invocation,
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(err.exit_code().clamp(0, u8::MAX as i32) as u8);
        }
    };

    match execute(invocation) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let status = match err.downcast_ref::<LaunchError>() {
                Some(launch_err) => {
                    log_launch_error(launch_err, "vecu");
                    launch_err.category().exit_code()
                }
                None => 1,
            };
            eprintln!("vecu error: {err:?}");
            ExitCode::from(status)
        }
    }
}

fn execute(invocation: Invocation) -> Result<()> {
    let (config, config_error) = match invocation.cli.config.as_deref() {
        Some(path) => match LauncherConfig::try_load(path) {
            Ok(config) => (config, None),
            Err(err) => (LauncherConfig::default(), Some(err)),
        },
        None => (LauncherConfig::default(), None),
    };

    logging::init_logging(
        invocation.cli.log_filter.as_deref(),
        config.log_filter.as_deref(),
    );
    if let Some(err) = config_error {
        warn!("{err}. Using defaults.");
    }

    let plan = invocation.into_plan(PlatformCapability::detect())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    runtime.block_on(async {
        let (trigger, shutdown) = shutdown_channel();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received; shutting down");
                trigger.fire();
            }
        });
        launch(plan, &config, shutdown).await
    })?;

    Ok(())
}
