use crate::commands::load_config;
use crate::error::{CliError, CliResult};
use clap::ArgMatches;

pub async fn handle_validate_command(matches: &ArgMatches) -> CliResult<()> {
    let config = load_config(matches)?;
    config.validate().map_err(CliError::InvalidConfiguration)?;

    println!("✅ Configuration is valid");
    println!(
        "   intervals: metrics {}s, health {}s, alerts {}s",
        config.intervals.metrics_collection_secs,
        config.intervals.health_check_secs,
        config.intervals.alert_evaluation_secs
    );
    println!(
        "   channels: {}",
        config
            .channels
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("   custom rules: {}", config.rules.len());
    Ok(())
}
