use std::process::ExitCode;
use std::sync::atomic::Ordering;

use clap::Parser;
use webcam_monitor::prelude::*;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = MonitorConfig::from(Cli::parse());

    let mut monitor = match open_or_exit(config, MotionMonitor::open) {
        Ok(monitor) => monitor,
        Err(code) => return code,
    };

    let shutdown = monitor.shutdown_handle();
    if let Err(e) = ctrlc::set_handler(move || shutdown.store(true, Ordering::SeqCst)) {
        log::error!("could not install signal handler: {}", e);
        return ExitCode::FAILURE;
    }

    let result = monitor.run();
    monitor.close();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
