//! Metrics recorder initialization and configuration.

use anyhow::Result;
use tracing::info;

/// Handle to the metrics system, providing access to exported metrics.
#[derive(Clone)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        {
            self.prometheus_handle.render()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            String::new()
        }
    }
}

/// Configuration for the metrics system.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    pub enabled: bool,
    pub global_labels: Vec<(String, String)>,
}

/// Initialize the metrics system. Should be called once at process startup.
///
/// When the `prometheus` feature is enabled, installs a Prometheus recorder
/// and returns a handle able to render the `/metrics` endpoint body.
/// Otherwise the `metrics` crate's calls are no-ops.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<MetricsHandle> {
    if !config.enabled {
        info!("metrics collection disabled");
        return Ok(MetricsHandle {
            #[cfg(feature = "prometheus")]
            prometheus_handle: install_prometheus(Vec::new())?,
        });
    }

    #[cfg(feature = "prometheus")]
    {
        let handle = install_prometheus(config.global_labels)?;
        info!("prometheus metrics exporter initialized");
        Ok(MetricsHandle { prometheus_handle: handle })
    }

    #[cfg(not(feature = "prometheus"))]
    {
        info!("metrics feature not enabled at compile time");
        Ok(MetricsHandle {})
    }
}

#[cfg(feature = "prometheus")]
fn install_prometheus(global_labels: Vec<(String, String)>) -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

    let mut builder = PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Suffix("_duration_seconds".to_string()),
        &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
    )?;
    for (key, value) in global_labels {
        builder = builder.add_global_label(key, value);
    }
    Ok(builder.install_recorder()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_config_initializes_without_error() {
        let config = MetricsRecorderConfig { enabled: false, ..Default::default() };
        let handle = init_metrics(config).unwrap();
        let output = handle.render();
        assert!(output.is_empty() || output.contains('#'));
    }
}
