//! Monitoring sink
//!
//! The dispatcher publishes its statistics objects under deterministic names:
//!
//! ```text
//! seda.dispatcher:<context>               dispatcher aggregate
//! seda.stage:<context>-<stage>            stage stats
//! seda.stage:<context>-routing-<stage>    routing stats
//! ```
//!
//! What happens to them is up to the `Monitor` implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{IntGaugeVec, Opts, Registry};
use serde::Serialize;
use tracing::{debug, warn};

/// Prefix for dispatcher aggregate names
pub const DISPATCHER_PREFIX: &str = "seda.dispatcher:";

/// Prefix for per-stage names
pub const STAGE_PREFIX: &str = "seda.stage:";

pub fn dispatcher_name(context: &str) -> String {
    format!("{}{}", DISPATCHER_PREFIX, context)
}

pub fn stage_name(context: &str, stage: &str) -> String {
    format!("{}{}-{}", STAGE_PREFIX, context, stage)
}

pub fn routing_name(context: &str, stage: &str) -> String {
    format!("{}{}-routing-{}", STAGE_PREFIX, context, stage)
}

/// A single named value read from an observable object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub metric: &'static str,
    pub value: u64,
}

impl Sample {
    pub fn new(metric: &'static str, value: u64) -> Self {
        Self { metric, value }
    }
}

/// Statistics object that can be published to a monitor
pub trait Observable: Send + Sync {
    fn observe(&self) -> Vec<Sample>;
}

/// Registry of named observable objects
pub trait Monitor: Send + Sync {
    /// Register an object. An existing registration under the same name is replaced.
    fn register(&self, name: &str, object: Arc<dyn Observable>);

    /// Remove a registration. Unknown names are ignored.
    fn unregister(&self, name: &str);
}

/// Monitor that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl Monitor for NoopMonitor {
    fn register(&self, _name: &str, _object: Arc<dyn Observable>) {}

    fn unregister(&self, _name: &str) {}
}

/// In-process monitor keeping registrations in insertion order
#[derive(Default)]
pub struct MemoryMonitor {
    objects: RwLock<IndexMap<String, Arc<dyn Observable>>>,
}

impl MemoryMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Current samples of one object
    pub fn observe(&self, name: &str) -> Option<Vec<Sample>> {
        let object = self.objects.read().get(name).cloned()?;
        Some(object.observe())
    }

    /// Value of one metric of one object
    pub fn value(&self, name: &str, metric: &str) -> Option<u64> {
        self.observe(name)?
            .into_iter()
            .find(|s| s.metric == metric)
            .map(|s| s.value)
    }

    /// Samples of every registered object
    pub fn snapshot(&self) -> BTreeMap<String, BTreeMap<&'static str, u64>> {
        // Clone the handles so observers run without holding the lock
        let objects: Vec<(String, Arc<dyn Observable>)> = self
            .objects
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        objects
            .into_iter()
            .map(|(name, object)| {
                let values = object
                    .observe()
                    .into_iter()
                    .map(|s| (s.metric, s.value))
                    .collect();
                (name, values)
            })
            .collect()
    }
}

impl Monitor for MemoryMonitor {
    fn register(&self, name: &str, object: Arc<dyn Observable>) {
        debug!("Monitor: registering {}", name);
        if self.objects.write().insert(name.to_string(), object).is_some() {
            warn!("Monitor: replaced existing registration {}", name);
        }
    }

    fn unregister(&self, name: &str) {
        debug!("Monitor: unregistering {}", name);
        self.objects.write().shift_remove(name);
    }
}

/// Monitor exporting every registered object as Prometheus gauges
///
/// Each sample becomes `seda_observable{object="<name>",metric="<metric>"}`.
/// Registrations are also readable through [`PrometheusMonitor::memory`].
pub struct PrometheusMonitor {
    inner: Arc<MemoryMonitor>,
}

impl PrometheusMonitor {
    /// Create a monitor exporting into the given registry
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let inner = Arc::new(MemoryMonitor::new());
        registry.register(Box::new(ObservableCollector::new(inner.clone())?))?;
        Ok(Self { inner })
    }

    pub fn memory(&self) -> &Arc<MemoryMonitor> {
        &self.inner
    }
}

impl Monitor for PrometheusMonitor {
    fn register(&self, name: &str, object: Arc<dyn Observable>) {
        self.inner.register(name, object);
    }

    fn unregister(&self, name: &str) {
        self.inner.unregister(name);
    }
}

const OBSERVABLE_LABELS: [&str; 2] = ["object", "metric"];

fn observable_opts() -> Opts {
    Opts::new("seda_observable", "Statistics published by dispatchers and stages")
}

/// Builds gauges from the registered objects on every scrape
struct ObservableCollector {
    objects: Arc<MemoryMonitor>,
    template: IntGaugeVec,
}

impl ObservableCollector {
    fn new(objects: Arc<MemoryMonitor>) -> prometheus::Result<Self> {
        Ok(Self {
            objects,
            template: IntGaugeVec::new(observable_opts(), &OBSERVABLE_LABELS)?,
        })
    }
}

impl Collector for ObservableCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.template.desc()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let gauges = match IntGaugeVec::new(observable_opts(), &OBSERVABLE_LABELS) {
            Ok(g) => g,
            Err(e) => {
                warn!("Monitor: failed to build gauges: {}", e);
                return Vec::new();
            }
        };

        for (name, values) in self.objects.snapshot() {
            for (metric, value) in values {
                gauges
                    .with_label_values(&[name.as_str(), metric])
                    .set(i64::try_from(value).unwrap_or(i64::MAX));
            }
        }

        gauges.collect()
    }
}
