//! Engine counters and latency observers

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cryptex_core::Operation;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::cache::CacheStats;

#[derive(Default)]
pub struct EngineMetrics {
    sanitization_calls: AtomicU64,
    resolution_calls: AtomicU64,
    secrets_detected: AtomicU64,
    sanitization_nanos: AtomicU64,
    resolution_nanos: AtomicU64,
    performance_violations: AtomicU64,
}

impl EngineMetrics {
    pub fn record_sanitization(&self, elapsed: Duration, secrets: usize) {
        self.sanitization_calls.fetch_add(1, Ordering::Relaxed);
        self.secrets_detected.fetch_add(secrets as u64, Ordering::Relaxed);
        self.sanitization_nanos.fetch_add(nanos(elapsed), Ordering::Relaxed);
    }

    pub fn record_resolution(&self, elapsed: Duration) {
        self.resolution_calls.fetch_add(1, Ordering::Relaxed);
        self.resolution_nanos.fetch_add(nanos(elapsed), Ordering::Relaxed);
    }

    pub fn record_violation(&self) {
        self.performance_violations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for counter in [
            &self.sanitization_calls,
            &self.resolution_calls,
            &self.secrets_detected,
            &self.sanitization_nanos,
            &self.resolution_nanos,
            &self.performance_violations,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(
        &self,
        cache: CacheStats,
        patterns_loaded: usize,
        cleanup_active: bool,
    ) -> MetricsSnapshot {
        let sanitization_calls = self.sanitization_calls.load(Ordering::Relaxed);
        let resolution_calls = self.resolution_calls.load(Ordering::Relaxed);
        let secrets_detected = self.secrets_detected.load(Ordering::Relaxed);
        let violations = self.performance_violations.load(Ordering::Relaxed);
        let sanitization_ms = self.sanitization_nanos.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let resolution_ms = self.resolution_nanos.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let total_operations = sanitization_calls + resolution_calls;

        MetricsSnapshot {
            sanitization_calls,
            resolution_calls,
            secrets_detected,
            total_sanitization_ms: sanitization_ms,
            total_resolution_ms: resolution_ms,
            avg_sanitization_ms: ratio(sanitization_ms, sanitization_calls),
            avg_resolution_ms: ratio(resolution_ms, resolution_calls),
            performance_violations: violations,
            total_operations,
            performance_violation_rate: ratio(violations as f64, total_operations),
            avg_secrets_per_sanitization: ratio(secrets_detected as f64, sanitization_calls),
            cache_hits: cache.hits,
            cache_misses: cache.misses,
            cache_hit_rate: cache.hit_rate(),
            patterns_loaded,
            cleanup_active,
            cache,
        }
    }
}

fn nanos(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
}

fn ratio(numerator: f64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator / denominator as f64
    }
}

/// Point-in-time view of the engine counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub sanitization_calls: u64,
    pub resolution_calls: u64,
    pub secrets_detected: u64,
    pub total_sanitization_ms: f64,
    pub total_resolution_ms: f64,
    pub avg_sanitization_ms: f64,
    pub avg_resolution_ms: f64,
    pub performance_violations: u64,
    pub total_operations: u64,
    pub performance_violation_rate: f64,
    pub avg_secrets_per_sanitization: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub patterns_loaded: usize,
    pub cleanup_active: bool,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceEventKind {
    SanitizationTimeout,
    ResolutionTimeout,
}

impl From<Operation> for PerformanceEventKind {
    fn from(operation: Operation) -> Self {
        match operation {
            Operation::Sanitization => Self::SanitizationTimeout,
            Operation::Resolution => Self::ResolutionTimeout,
        }
    }
}

/// Emitted whenever an operation exceeds its latency ceiling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceEvent {
    pub kind: PerformanceEventKind,
    pub context_id: String,
    pub duration_ms: f64,
    pub threshold_ms: f64,
    /// Placeholders replaced, for resolution events
    pub resolved_count: Option<usize>,
}

/// Receives latency events; failures are logged and never reach the caller
#[async_trait]
pub trait PerformanceObserver: Send + Sync {
    async fn on_event(&self, event: &PerformanceEvent) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverId(u64);

#[derive(Default)]
pub struct Observers {
    next_id: AtomicU64,
    registered: RwLock<Vec<(ObserverId, Arc<dyn PerformanceObserver>)>>,
}

impl Observers {
    pub async fn add(&self, observer: Arc<dyn PerformanceObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registered.write().await.push((id, observer));
        id
    }

    pub async fn remove(&self, id: ObserverId) -> bool {
        let mut registered = self.registered.write().await;
        let before = registered.len();
        registered.retain(|(existing, _)| *existing != id);
        registered.len() < before
    }

    pub async fn len(&self) -> usize {
        self.registered.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.registered.read().await.is_empty()
    }

    pub async fn notify(&self, event: &PerformanceEvent) {
        // Snapshot so observers run without the lock held
        let observers: Vec<Arc<dyn PerformanceObserver>> = self
            .registered
            .read()
            .await
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        for observer in observers {
            if let Err(e) = observer.on_event(event).await {
                warn!(error = %e, kind = ?event.kind, "Performance observer failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<PerformanceEventKind>>);

    #[async_trait]
    impl PerformanceObserver for Recorder {
        async fn on_event(&self, event: &PerformanceEvent) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(event.kind);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl PerformanceObserver for Failing {
        async fn on_event(&self, _event: &PerformanceEvent) -> anyhow::Result<()> {
            anyhow::bail!("observer down")
        }
    }

    fn event(kind: PerformanceEventKind) -> PerformanceEvent {
        PerformanceEvent {
            kind,
            context_id: "ctx".into(),
            duration_ms: 12.0,
            threshold_ms: 5.0,
            resolved_count: None,
        }
    }

    #[test]
    fn test_snapshot_rates() {
        let metrics = EngineMetrics::default();
        metrics.record_sanitization(Duration::from_millis(2), 3);
        metrics.record_sanitization(Duration::from_millis(4), 1);
        metrics.record_resolution(Duration::from_millis(1));
        metrics.record_violation();

        let snapshot = metrics.snapshot(CacheStats::default(), 5, false);
        assert_eq!(snapshot.sanitization_calls, 2);
        assert_eq!(snapshot.resolution_calls, 1);
        assert_eq!(snapshot.secrets_detected, 4);
        assert_eq!(snapshot.avg_sanitization_ms, 3.0);
        assert_eq!(snapshot.avg_secrets_per_sanitization, 2.0);
        assert_eq!(snapshot.total_operations, 3);
        assert!((snapshot.performance_violation_rate - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(snapshot.patterns_loaded, 5);
    }

    #[test]
    fn test_reset() {
        let metrics = EngineMetrics::default();
        metrics.record_sanitization(Duration::from_millis(2), 3);
        metrics.reset();

        let snapshot = metrics.snapshot(CacheStats::default(), 0, false);
        assert_eq!(snapshot.sanitization_calls, 0);
        assert_eq!(snapshot.avg_sanitization_ms, 0.0);
        assert_eq!(snapshot.performance_violation_rate, 0.0);
    }

    #[test]
    fn test_event_kind_from_operation() {
        assert_eq!(
            PerformanceEventKind::from(Operation::Resolution),
            PerformanceEventKind::ResolutionTimeout
        );
        assert_eq!(
            serde_json::to_value(PerformanceEventKind::SanitizationTimeout).unwrap(),
            serde_json::json!("sanitization_timeout")
        );
    }

    #[tokio::test]
    async fn test_observers_notified_and_removed() {
        let observers = Observers::default();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let id = observers.add(recorder.clone()).await;
        observers.add(Arc::new(Failing)).await;

        // A failing observer does not stop the others
        observers
            .notify(&event(PerformanceEventKind::SanitizationTimeout))
            .await;
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![PerformanceEventKind::SanitizationTimeout]
        );

        assert!(observers.remove(id).await);
        assert!(!observers.remove(id).await);
        assert_eq!(observers.len().await, 1);

        observers
            .notify(&event(PerformanceEventKind::ResolutionTimeout))
            .await;
        assert_eq!(recorder.0.lock().unwrap().len(), 1);
    }
}
