use crate::commands::{init_logging, load_config};
use crate::error::{CliError, CliResult};
use clap::ArgMatches;
use std::sync::Arc;
use tradewatch::SystemMonitor;
use tradewatch::web_console::run_server;

pub async fn handle_run_command(matches: &ArgMatches) -> CliResult<()> {
    let config = load_config(matches)?;
    if let Err(errors) = config.validate() {
        return Err(CliError::InvalidConfiguration(errors));
    }
    init_logging(&config.logging)?;

    let monitor = Arc::new(SystemMonitor::new(config.clone()).await?);
    println!(
        "🚀 Starting tradewatch: {} channel(s), {} rule(s), {} component(s)",
        monitor.dispatcher().channel_names().await.len(),
        monitor.engine().rules().await.len(),
        monitor.health().components().await.len()
    );
    monitor.start();

    let (stop_tx, mut stop_rx) = tokio::sync::mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .map_err(|e| CliError::IoError(std::io::Error::other(e)))?;

    if config.server.enabled {
        println!(
            "🌐 Web console at http://{}:{}",
            config.server.host, config.server.port
        );
        tokio::select! {
            result = run_server(Arc::clone(&monitor), &config.server.host, config.server.port) => {
                monitor.shutdown().await;
                return result.map_err(CliError::from);
            }
            _ = stop_rx.recv() => {}
        }
    } else {
        stop_rx.recv().await;
    }

    println!("🛑 Received Ctrl-C, shutting down...");
    monitor.shutdown().await;
    println!("✅ tradewatch stopped");
    Ok(())
}
