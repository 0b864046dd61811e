//! Resource sampling and business latency recording
//!
//! Resource gauges are refreshed by [`PerformanceMonitor::sample`] on the
//! metrics loop. Trade and API recordings are plain synchronous calls made
//! from the trading path; they never fail, a rejected write is logged and
//! dropped.

use crate::error::{MonitorError, MonitorResult};
use crate::monitoring::metrics::{MetricKind, MetricMetadata, MetricRegistry};

use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use sysinfo::{Disks, Networks, System};

pub const CPU_USAGE: &str = "cpu_usage";
pub const MEMORY_USAGE: &str = "memory_usage";
pub const DISK_USAGE: &str = "disk_usage";
pub const NETWORK_RX_BYTES: &str = "network_rx_bytes";
pub const NETWORK_TX_BYTES: &str = "network_tx_bytes";
pub const TRADE_EXECUTION_MS: &str = "trade_execution_ms";
pub const TRADES_TOTAL: &str = "trades_total";
pub const TRADE_NOTIONAL_TOTAL: &str = "trade_notional_total";
pub const API_LATENCY_MS: &str = "api_latency_ms";
pub const API_CALLS_TOTAL: &str = "api_calls_total";
pub const API_ERRORS_TOTAL: &str = "api_errors_total";
pub const API_ERROR_RATE: &str = "api_error_rate";

/// One reading of host resources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

/// Source of resource readings. Called from a blocking thread.
pub trait SystemSampler: Send + Sync {
    fn sample(&self) -> MonitorResult<ResourceSample>;
}

/// Reads the host through `sysinfo`
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // prime the CPU counters so the first real sample has a baseline
        system.refresh_cpu_all();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemSampler for SysinfoSampler {
    fn sample(&self) -> MonitorResult<ResourceSample> {
        let (cpu_percent, memory_percent) = {
            let mut system = self.system.lock();
            system.refresh_cpu_all();
            system.refresh_memory();
            let total = system.total_memory();
            let memory = if total == 0 {
                0.0
            } else {
                system.used_memory() as f64 / total as f64 * 100.0
            };
            (system.global_cpu_usage() as f64, memory)
        };

        let disks = Disks::new_with_refreshed_list();
        let (total, available) = disks.iter().fold((0u64, 0u64), |(t, a), d| {
            (t + d.total_space(), a + d.available_space())
        });
        let disk_percent = if total == 0 {
            0.0
        } else {
            (total - available.min(total)) as f64 / total as f64 * 100.0
        };

        let networks = Networks::new_with_refreshed_list();
        let (network_rx_bytes, network_tx_bytes) = networks
            .iter()
            .fold((0u64, 0u64), |(rx, tx), (_name, data)| {
                (rx + data.total_received(), tx + data.total_transmitted())
            });

        Ok(ResourceSample {
            cpu_percent,
            memory_percent,
            disk_percent,
            network_rx_bytes,
            network_tx_bytes,
        })
    }
}

/// Sampler returning whatever was last stored in it
#[derive(Debug, Default)]
pub struct StaticSampler {
    sample: Mutex<ResourceSample>,
}

impl StaticSampler {
    pub fn new(sample: ResourceSample) -> Self {
        Self {
            sample: Mutex::new(sample),
        }
    }

    pub fn set(&self, sample: ResourceSample) {
        *self.sample.lock() = sample;
    }
}

impl SystemSampler for StaticSampler {
    fn sample(&self) -> MonitorResult<ResourceSample> {
        Ok(self.sample.lock().clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => write!(f, "buy"),
            TradeSide::Sell => write!(f, "sell"),
        }
    }
}

pub struct PerformanceMonitor {
    registry: Arc<MetricRegistry>,
    sampler: Arc<dyn SystemSampler>,
    rolling_window: usize,
}

impl PerformanceMonitor {
    /// Registers the fixed metric set; fails only if a name is already taken by another kind
    pub fn new(
        registry: Arc<MetricRegistry>,
        sampler: Arc<dyn SystemSampler>,
        rolling_window: usize,
    ) -> MonitorResult<Self> {
        let rolling = MetricKind::RollingAverage {
            window: rolling_window.max(1),
        };
        let fixed = [
            (CPU_USAGE, MetricKind::Gauge, MetricMetadata::new("system").with_unit("%")),
            (MEMORY_USAGE, MetricKind::Gauge, MetricMetadata::new("system").with_unit("%")),
            (DISK_USAGE, MetricKind::Gauge, MetricMetadata::new("system").with_unit("%")),
            (NETWORK_RX_BYTES, MetricKind::Gauge, MetricMetadata::new("network").with_unit("bytes")),
            (NETWORK_TX_BYTES, MetricKind::Gauge, MetricMetadata::new("network").with_unit("bytes")),
            (
                TRADE_EXECUTION_MS,
                rolling,
                MetricMetadata::new("trading")
                    .with_unit("ms")
                    .with_description("Order execution latency across all symbols"),
            ),
            (TRADES_TOTAL, MetricKind::Counter, MetricMetadata::new("trading")),
            (TRADE_NOTIONAL_TOTAL, MetricKind::Counter, MetricMetadata::new("trading")),
            (API_LATENCY_MS, rolling, MetricMetadata::new("api").with_unit("ms")),
            (API_CALLS_TOTAL, MetricKind::Counter, MetricMetadata::new("api")),
            (API_ERRORS_TOTAL, MetricKind::Counter, MetricMetadata::new("api")),
            (
                API_ERROR_RATE,
                rolling,
                MetricMetadata::new("api")
                    .with_unit("%")
                    .with_description("Share of failed calls over the last window"),
            ),
        ];
        for (name, kind, metadata) in fixed {
            registry.register(name, kind, metadata)?;
        }

        Ok(Self {
            registry,
            sampler,
            rolling_window: rolling_window.max(1),
        })
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    /// Take one resource reading and write it into the registry
    pub async fn sample(&self) -> MonitorResult<ResourceSample> {
        let sampler = Arc::clone(&self.sampler);
        let sample = tokio::task::spawn_blocking(move || sampler.sample())
            .await
            .map_err(|e| MonitorError::Io(format!("sampler task failed: {}", e)))??;

        self.record_quietly(CPU_USAGE, sample.cpu_percent, None);
        self.record_quietly(MEMORY_USAGE, sample.memory_percent, None);
        self.record_quietly(DISK_USAGE, sample.disk_percent, None);
        self.record_quietly(NETWORK_RX_BYTES, sample.network_rx_bytes as f64, None);
        self.record_quietly(NETWORK_TX_BYTES, sample.network_tx_bytes as f64, None);

        debug!(
            "Sampled cpu={:.1}% mem={:.1}% disk={:.1}%",
            sample.cpu_percent, sample.memory_percent, sample.disk_percent
        );
        Ok(sample)
    }

    pub fn record_trade_execution(
        &self,
        symbol: &str,
        side: TradeSide,
        quantity: f64,
        price: f64,
        duration_ms: f64,
    ) {
        debug!("Trade {} {} {} @ {} in {}ms", side, quantity, symbol, price, duration_ms);
        self.record_quietly(TRADE_EXECUTION_MS, duration_ms, None);
        self.record_quietly(TRADES_TOTAL, 1.0, None);
        self.record_quietly(TRADE_NOTIONAL_TOTAL, (quantity * price).abs(), None);

        let per_symbol = format!("{}.{}", TRADE_EXECUTION_MS, symbol);
        let registered = self.registry.register(
            &per_symbol,
            MetricKind::RollingAverage {
                window: self.rolling_window,
            },
            MetricMetadata::new("trading").with_unit("ms"),
        );
        match registered {
            Ok(()) => {
                let tags = HashMap::from([("symbol".to_string(), symbol.to_string())]);
                self.record_quietly(&per_symbol, duration_ms, Some(tags))
            }
            Err(e) => warn!("Dropped trade sample for {}: {}", symbol, e),
        }
    }

    pub fn record_api_call(&self, endpoint: &str, duration_ms: f64, status_code: u16) {
        self.record_quietly(API_LATENCY_MS, duration_ms, None);
        self.record_quietly(API_CALLS_TOTAL, 1.0, None);

        // 0 means the request never got a response
        let failed = status_code == 0 || status_code >= 400;
        if failed {
            debug!("API call to {} failed with status {}", endpoint, status_code);
            self.record_quietly(API_ERRORS_TOTAL, 1.0, None);
        }
        self.record_quietly(API_ERROR_RATE, if failed { 100.0 } else { 0.0 }, None);
    }

    fn record_quietly(&self, name: &str, value: f64, tags: Option<HashMap<String, String>>) {
        if let Err(e) = self.registry.record(name, value, tags) {
            warn!("Dropped sample for {}: {}", name, e);
        }
    }
}
