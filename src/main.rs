use clap::Parser;
use log::{error, info, warn};
use sockbench::configuration::config::Cli;
use sockbench::controller::controller_handler::Controller;
use sockbench::error_handling::types::BenchError;
use std::process::ExitCode;
use tokio::sync::watch;

fn fail(e: &BenchError) -> ExitCode {
    eprintln!("sockbench: error: {}: {}", e.category(), e);
    ExitCode::from(e.exit_code() as u8)
}

#[tokio::main]
async fn main() -> ExitCode {
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    // Prints usage and exits on --help, --version, a missing or unknown subcommand.
    let cli = Cli::parse();

    let controller = match Controller::new(cli) {
        Ok(controller) => controller,
        Err(e) => {
            error!("[!] Unable to create a controller instance: {}", e);
            return fail(&e);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping sessions");
            let _ = shutdown_tx.send(true);
        }
    });

    info!("[+] Spawning the controller");
    let result = match controller.run(shutdown_rx).await {
        Ok(result) => result,
        Err(e) => {
            error!("[!] Error occured in the controller process: {}", e);
            return fail(&e);
        }
    };

    if controller.json {
        match serde_json::to_string_pretty(&result.summary) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("[!] Unable to serialize the summary: {}", e),
        }
    }

    if result.interrupted {
        return fail(&BenchError::Interrupted);
    }
    if result.failures > 0 {
        eprintln!(
            "sockbench: error: session: {} session(s) failed",
            result.failures
        );
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
