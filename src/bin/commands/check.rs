use crate::commands::load_config;
use crate::error::{CliError, CliResult};
use clap::ArgMatches;
use tradewatch::SystemMonitor;
use tradewatch::monitoring::HealthStatus;

fn status_icon(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "✅",
        HealthStatus::Degraded => "⚠️",
        HealthStatus::Critical => "❌",
        HealthStatus::Unknown => "❔",
    }
}

/// One sampling and probe cycle; fails when the overall status is critical
pub async fn handle_check_command(matches: &ArgMatches) -> CliResult<()> {
    let config = load_config(matches)?;
    if let Err(errors) = config.validate() {
        return Err(CliError::InvalidConfiguration(errors));
    }

    let monitor = SystemMonitor::new(config).await?;
    if let Err(e) = monitor.sample_now().await {
        println!("⚠️ Resource sampling failed: {}", e);
    }

    println!("🔍 Running health checks...");
    let components = monitor.force_health_check().await;
    if components.is_empty() {
        println!("No health checks configured");
    }
    for component in &components {
        println!(
            "{} {:<12} {:<9} {} ({}ms)",
            status_icon(component.status),
            component.component,
            component.status.to_string(),
            component.message,
            component.response_time_ms.unwrap_or(0)
        );
    }

    for alert in monitor.engine().evaluate(&monitor.evaluation_context().await).await {
        println!("🚨 [{}] {}: {}", alert.alert.severity, alert.alert.title, alert.alert.message);
    }

    let overall = monitor.get_system_status().await.overall_health;
    println!("Overall: {} {}", status_icon(overall), overall);
    if overall == HealthStatus::Critical {
        return Err(CliError::Unhealthy(overall.to_string()));
    }
    Ok(())
}
