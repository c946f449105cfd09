use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;
use prometheus::{Gauge, IntCounter, Opts, Registry};
use sysinfo::{Networks, System};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Process-wide instance, set once by [`MetricsBuilder::install`].
static METRICS: OnceCell<Metrics> = OnceCell::new();

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics instance already initialized")]
    AlreadyInitialized,
    #[error("metrics instance not initialized")]
    NotInitialized,
    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),
    #[error("metrics server: {0}")]
    Io(#[from] std::io::Error),
}

/// Host gauges plus the counters and gauges an application registers.
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    cpu_usage: Gauge,
    memory_usage: Gauge,
    network_metrics: Vec<(String, Gauge, Gauge)>, // (Interface, RX, TX)
    counters: Arc<HashMap<String, IntCounter>>,
    gauges: Arc<HashMap<String, Gauge>>,
    system: Arc<Mutex<System>>,
    networks: Arc<Mutex<Networks>>,
}

#[derive(Default)]
pub struct MetricsBuilder {
    interfaces: Vec<String>,
    common_labels: Vec<(String, String)>,
    counters: Vec<(String, String)>,
    gauges: Vec<(String, String)>,
}

impl MetricsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a network interface to track.
    pub fn track_interface(mut self, interface: &str) -> Self {
        self.interfaces.push(interface.to_string());
        self
    }

    /// Add a common label to be applied to all metrics.
    pub fn add_label(mut self, key: &str, value: &str) -> Self {
        self.common_labels.push((key.to_string(), value.to_string()));
        self
    }

    pub fn add_counter(mut self, name: &str, description: &str) -> Self {
        self.counters.push((name.to_string(), description.to_string()));
        self
    }

    pub fn add_gauge(mut self, name: &str, description: &str) -> Self {
        self.gauges.push((name.to_string(), description.to_string()));
        self
    }

    /// Build a standalone instance with its own registry.
    #[instrument(skip_all)]
    pub fn build(self) -> Result<Metrics, MetricsError> {
        let registry = Registry::new();
        let labels = &self.common_labels;

        let cpu_usage = Gauge::with_opts(opts_with_labels("cpu_usage", "CPU usage percentage", labels))?;
        let memory_usage = Gauge::with_opts(opts_with_labels("memory_usage", "Memory usage in bytes", labels))?;
        registry.register(Box::new(cpu_usage.clone()))?;
        registry.register(Box::new(memory_usage.clone()))?;

        let mut network_metrics = Vec::new();
        for interface in self.interfaces {
            let sanitized = sanitize_name(&interface);
            let rx = Gauge::with_opts(opts_with_labels(
                &format!("{sanitized}_rx_bytes"),
                &format!("Received bytes for {interface}"),
                labels,
            ))?;
            let tx = Gauge::with_opts(opts_with_labels(
                &format!("{sanitized}_tx_bytes"),
                &format!("Transmitted bytes for {interface}"),
                labels,
            ))?;
            registry.register(Box::new(rx.clone()))?;
            registry.register(Box::new(tx.clone()))?;
            // sysinfo looks interfaces up by their original name
            network_metrics.push((interface, rx, tx));
        }

        let mut counters = HashMap::new();
        for (name, description) in &self.counters {
            let counter = IntCounter::with_opts(opts_with_labels(name, description, labels))?;
            registry.register(Box::new(counter.clone()))?;
            counters.insert(name.clone(), counter);
        }
        let mut gauges = HashMap::new();
        for (name, description) in &self.gauges {
            let gauge = Gauge::with_opts(opts_with_labels(name, description, labels))?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.insert(name.clone(), gauge);
        }

        debug!("Metrics built with {} counters and {} gauges", counters.len(), gauges.len());
        Ok(Metrics {
            registry,
            cpu_usage,
            memory_usage,
            network_metrics,
            counters: Arc::new(counters),
            gauges: Arc::new(gauges),
            system: Arc::new(Mutex::new(System::new())),
            networks: Arc::new(Mutex::new(Networks::new_with_refreshed_list())),
        })
    }

    /// Build and register as the process-wide instance returned by [`get_metrics`].
    pub fn install(self) -> Result<Metrics, MetricsError> {
        let metrics = self.build()?;
        METRICS
            .set(metrics.clone())
            .map_err(|_| MetricsError::AlreadyInitialized)?;
        Ok(metrics)
    }
}

/// Replace every non-alphanumeric character so the name is a valid metric name.
fn sanitize_name(name: &str) -> String {
    name.chars().map(|c| if c.is_alphanumeric() { c } else { '_' }).collect()
}

fn opts_with_labels(name: &str, help: &str, labels: &[(String, String)]) -> Opts {
    let mut opts = Opts::new(name, help);
    for (key, value) in labels {
        opts = opts.const_label(key.clone(), value.clone());
    }
    opts
}

/// The process-wide instance, if one was installed.
pub fn get_metrics() -> Result<Metrics, MetricsError> {
    METRICS.get().cloned().ok_or(MetricsError::NotInitialized)
}

impl Metrics {
    /// Refresh the host gauges.
    #[instrument(skip_all)]
    pub fn update(&self) {
        if let Ok(mut sys) = self.system.lock() {
            sys.refresh_all();
            self.cpu_usage.set(sys.global_cpu_usage() as f64);
            self.memory_usage.set(sys.used_memory() as f64);
        }

        if self.network_metrics.is_empty() {
            return;
        }
        let Ok(mut networks) = self.networks.lock() else {
            return;
        };
        networks.refresh(true);
        for (interface, rx, tx) in &self.network_metrics {
            if let Some(data) = networks.get(interface) {
                rx.set(data.total_received() as f64);
                tx.set(data.total_transmitted() as f64);
            }
        }
    }

    /// Adds `by` to a counter registered with [`MetricsBuilder::add_counter`].
    pub fn inc_counter(&self, name: &str, by: u64) {
        match self.counters.get(name) {
            Some(counter) => counter.inc_by(by),
            None => warn!("Unknown counter {name}"),
        }
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        match self.gauges.get(name) {
            Some(gauge) => gauge.set(value),
            None => warn!("Unknown gauge {name}"),
        }
    }

    pub fn add_gauge(&self, name: &str, delta: f64) {
        match self.gauges.get(name) {
            Some(gauge) => gauge.add(delta),
            None => warn!("Unknown gauge {name}"),
        }
    }

    pub fn counter_value(&self, name: &str) -> Option<u64> {
        self.counters.get(name).map(|c| c.get())
    }

    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).map(|g| g.get())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
