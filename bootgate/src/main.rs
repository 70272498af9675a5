use bootgate::{
    Config,
    bootstrap::{self, report},
    config::{Args, Command},
    run_console, telemetry,
};
use clap::Parser;
use std::process::ExitCode;

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Install rustls crypto provider before anything else that might build a TLS client
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let args = Args::parse();
    let command = args.command.clone().unwrap_or(Command::Serve);

    let mut stdout = std::io::stdout();

    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(e) => return Ok(report(Err(e.into()), &mut stdout)),
    };

    if args.validate {
        if command == Command::Serve
            && let Err(e) = config.validate_for_serving()
        {
            return Ok(report(Err(e.into()), &mut stdout));
        }
        println!("Configuration is valid.");
        return Ok(ExitCode::SUCCESS);
    }

    telemetry::init_telemetry(config.enable_otel_export)?;
    tracing::debug!("{:?}", args);

    let code = match command {
        Command::Probe => report(bootstrap::run_probe(&config).await, &mut stdout),
        Command::Wait { deadline, interval } => {
            report(bootstrap::run_wait(&config, deadline, interval).await, &mut stdout)
        }
        Command::Provision => report(bootstrap::run_provision(&config).await.map(|_| ()), &mut stdout),
        Command::Serve => {
            // Run the application with graceful shutdown on SIGTERM/Ctrl+C
            run_console(config, shutdown_signal()).await?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    telemetry::shutdown_telemetry();
    Ok(code)
}
