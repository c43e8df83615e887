//! Temporal isolation engine
//!
//! Sanitizes payloads before they reach an AI model, resolves placeholders
//! back to real values right before execution, and scrubs anything flowing
//! back out. Placeholder mappings live only in the in-process context cache.

pub mod cache;
pub mod metrics;
pub mod traceback;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use cryptex_core::scrub::scrub_message;
use cryptex_core::{
    DetectedOccurrence, Error, Operation, Pattern, PlaceholderMap, ResolvedResult, Result,
    SanitizedSnapshot,
};
use cryptex_security::registry::PatternRegistry;
use cryptex_security::{detect, find_surviving, mask_real_values, resolve_placeholders, substitute};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use cache::{CacheConfig, CacheStats, ContextCache};
pub use metrics::{
    MetricsSnapshot, ObserverId, PerformanceEvent, PerformanceEventKind, PerformanceObserver,
};
pub use traceback::SanitizedError;

/// Default latency ceiling for sanitization
pub const DEFAULT_SANITIZATION_THRESHOLD: Duration = Duration::from_millis(5);
/// Default latency ceiling for resolution
pub const DEFAULT_RESOLUTION_THRESHOLD: Duration = Duration::from_millis(10);
pub const DEFAULT_MAX_DATA_SIZE: usize = 10 * 1024 * 1024;
pub const DEFAULT_MAX_STRING_LENGTH: usize = 1024 * 1024;

/// What happens when a latency ceiling or leak check fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementMode {
    /// Fail the call
    #[default]
    Strict,
    /// Log, count and notify observers, then return the result
    Permissive,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub sanitization_threshold: Duration,
    pub resolution_threshold: Duration,
    /// Approximate serialized size limit for one payload
    pub max_data_size: usize,
    /// Byte limit for any single string in a payload
    pub max_string_length: usize,
    pub enforcement: EnforcementMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            sanitization_threshold: DEFAULT_SANITIZATION_THRESHOLD,
            resolution_threshold: DEFAULT_RESOLUTION_THRESHOLD,
            max_data_size: DEFAULT_MAX_DATA_SIZE,
            max_string_length: DEFAULT_MAX_STRING_LENGTH,
            enforcement: EnforcementMode::Strict,
        }
    }
}

/// Orchestrates detection, substitution, the context cache and metrics
///
/// Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct TemporalIsolationEngine {
    config: Arc<EngineConfig>,
    registry: Arc<PatternRegistry>,
    cache: Arc<ContextCache>,
    metrics: Arc<metrics::EngineMetrics>,
    observers: Arc<metrics::Observers>,
    reaper: Arc<Mutex<Option<cache::ReaperHandle>>>,
}

impl TemporalIsolationEngine {
    /// Engine over a private registry seeded with the built-in patterns
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registry(config, Arc::new(PatternRegistry::new()))
    }

    /// Engine over a private registry seeded with `patterns` only
    pub fn with_patterns(config: EngineConfig, patterns: Vec<Pattern>) -> Result<Self> {
        Ok(Self::with_registry(config, Arc::new(PatternRegistry::with_patterns(patterns)?)))
    }

    /// Engine over a shared registry, e.g. [`cryptex_security::registry::global`]
    pub fn with_registry(config: EngineConfig, registry: Arc<PatternRegistry>) -> Self {
        info!(
            patterns = registry.len(),
            cache_size = config.cache.max_size,
            max_age_secs = config.cache.max_age.as_secs(),
            enforcement = ?config.enforcement,
            "Initialized temporal isolation engine"
        );
        Self {
            cache: Arc::new(ContextCache::new(config.cache.clone())),
            config: Arc::new(config),
            registry,
            metrics: Arc::new(metrics::EngineMetrics::default()),
            observers: Arc::new(metrics::Observers::default()),
            reaper: Arc::new(Mutex::new(None)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PatternRegistry> {
        &self.registry
    }

    /// Replace every detected secret with a placeholder and cache the mapping
    ///
    /// Generates a fresh context id unless one is supplied. Supplying an id
    /// that is already cached replaces that context.
    pub async fn sanitize_for_ai(
        &self,
        value: &Value,
        context_id: Option<&str>,
    ) -> Result<SanitizedSnapshot> {
        let start = Instant::now();
        let context_id = context_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        self.validate_input(value)?;
        self.sweep_if_idle().await;

        let (data, placeholders, occurrences) = self.sanitize_value(value);
        let secrets = occurrences.len();

        // Every detected value must be gone from the output
        let surviving = find_surviving(&data, &occurrences);
        if !surviving.is_empty() {
            warn!(
                context_id = %context_id,
                patterns = ?surviving,
                enforcement = ?self.config.enforcement,
                "Secret survived substitution"
            );
            if self.config.enforcement == EnforcementMode::Strict {
                return Err(Error::SecurityBreach {
                    breach: format!(
                        "detected value survived substitution for pattern(s): {}",
                        surviving.join(", ")
                    ),
                    context_id: Some(context_id),
                });
            }
        }

        let snapshot = SanitizedSnapshot::new(data, placeholders, context_id.clone());
        self.cache
            .store(context_id.clone(), Arc::new(snapshot.clone()))
            .await;

        let elapsed = start.elapsed();
        self.metrics.record_sanitization(elapsed, secrets);
        debug!(
            context_id = %context_id,
            secrets,
            elapsed_us = elapsed.as_micros() as u64,
            "Sanitized payload"
        );

        self.check_latency(Operation::Sanitization, elapsed, &context_id, None).await?;
        Ok(snapshot)
    }

    /// [`Self::sanitize_for_ai`] for any serializable value
    pub async fn sanitize_serializable<T: Serialize + ?Sized>(
        &self,
        value: &T,
        context_id: Option<&str>,
    ) -> Result<SanitizedSnapshot> {
        let value = serde_json::to_value(value)?;
        self.sanitize_for_ai(&value, context_id).await
    }

    /// Swap placeholders in `value` for the real values cached under `context_id`
    ///
    /// Placeholders from other contexts, or unknown ones, are left untouched.
    pub async fn resolve_for_execution(
        &self,
        value: &Value,
        context_id: &str,
    ) -> Result<ResolvedResult> {
        let start = Instant::now();
        self.sweep_if_idle().await;

        let snapshot = self
            .cache
            .get(context_id)
            .await
            .ok_or_else(|| Error::ContextNotFound(context_id.to_string()))?;

        let (data, resolved_count) = resolve_placeholders(value, &snapshot.placeholders);

        let elapsed = start.elapsed();
        self.metrics.record_resolution(elapsed);
        debug!(
            context_id,
            resolved_count,
            elapsed_us = elapsed.as_micros() as u64,
            "Resolved placeholders"
        );

        self.check_latency(
            Operation::Resolution,
            elapsed,
            context_id,
            Some(resolved_count),
        )
        .await?;
        Ok(ResolvedResult {
            data,
            resolved_count,
            context_id: context_id.to_string(),
        })
    }

    /// Scrub a response before it is shown to the AI
    ///
    /// With a live context, real values from that context are masked back to
    /// their placeholders. Otherwise the response is sanitized from scratch;
    /// nothing is cached in that case.
    pub async fn sanitize_response(&self, value: &Value, context_id: &str) -> Result<Value> {
        match self.cache.get(context_id).await {
            Some(snapshot) => Ok(mask_real_values(value, &snapshot.placeholders)),
            None => {
                debug!(
                    context_id,
                    "No live context; sanitizing response from scratch"
                );
                self.validate_input(value)?;
                let (data, _, _) = self.sanitize_value(value);
                Ok(data)
            }
        }
    }

    /// Sanitize free-form error text
    ///
    /// Secrets are replaced first, then line numbers, source locations and
    /// absolute directories are masked and local-variable dumps dropped.
    pub fn sanitize_error_text(&self, text: &str) -> Result<String> {
        let value = Value::String(text.to_string());
        self.validate_input(&value)?;

        let sanitized = match self.sanitize_value(&value).0 {
            Value::String(sanitized) => sanitized,
            _ => text.to_string(),
        };
        Ok(traceback::scrub_locations(&sanitized))
    }

    /// Rebuild an error with its message and cause chain sanitized
    pub fn sanitize_traceback<E>(&self, error: &E) -> Result<SanitizedError>
    where
        E: std::error::Error + ?Sized,
    {
        let clean = |text: String| -> Result<String> {
            Ok(scrub_message(&self.sanitize_error_text(&text)?))
        };

        let message = clean(error.to_string())?;
        let mut causes = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            causes.push(clean(cause.to_string())?);
            source = cause.source();
        }

        Ok(SanitizedError {
            kind: std::any::type_name::<E>().to_string(),
            message,
            causes,
        })
    }

    /// Drop one context; returns whether it existed
    pub async fn clear_context(&self, context_id: &str) -> bool {
        let removed = self.cache.clear(context_id).await;
        if removed {
            debug!(context_id, "Cleared context");
        }
        removed
    }

    /// Drop every context; returns how many were removed
    pub async fn clear_all_contexts(&self) -> usize {
        let removed = self.cache.clear_all().await;
        info!(removed, "Cleared all contexts");
        removed
    }

    /// Remove expired contexts now, regardless of the sweep schedule
    pub async fn evict_expired(&self) -> usize {
        self.cache.evict_expired(Instant::now()).await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(
            self.cache.stats().await,
            self.registry.len(),
            self.is_cleanup_active(),
        )
    }

    /// Zero every counter, including cache hits and misses
    pub fn reset_metrics(&self) {
        self.metrics.reset();
        self.cache.reset_counters();
    }

    pub async fn add_observer(&self, observer: Arc<dyn PerformanceObserver>) -> ObserverId {
        self.observers.add(observer).await
    }

    pub async fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.remove(id).await
    }

    /// Add a pattern to this engine's registry
    pub fn add_pattern(&self, pattern: Pattern) -> Result<()> {
        self.registry.insert(pattern)
    }

    pub fn remove_pattern(&self, name: &str) -> bool {
        self.registry.unregister(name)
    }

    /// Start the background reaper; returns false if one is already running
    /// or no tokio runtime is available
    pub fn start_background_cleanup(&self) -> bool {
        let mut reaper = self.reaper_slot();
        if reaper.as_ref().is_some_and(cache::ReaperHandle::is_active) {
            return false;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("No tokio runtime; background cleanup not started");
            return false;
        }
        *reaper = Some(self.cache.spawn_reaper(self.config.cache.sweep_interval()));
        true
    }

    /// Stop the background reaper; returns whether one was running
    pub fn stop_background_cleanup(&self) -> bool {
        match self.reaper_slot().take() {
            Some(handle) => {
                let was_active = handle.is_active();
                handle.stop();
                was_active
            }
            None => false,
        }
    }

    pub fn is_cleanup_active(&self) -> bool {
        self.reaper_slot()
            .as_ref()
            .is_some_and(cache::ReaperHandle::is_active)
    }

    fn reaper_slot(&self) -> MutexGuard<'_, Option<cache::ReaperHandle>> {
        self.reaper.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Without a reaper, expired contexts are swept from the request path
    async fn sweep_if_idle(&self) {
        if !self.is_cleanup_active() {
            self.cache
                .sweep_if_due(self.config.cache.sweep_interval())
                .await;
        }
    }

    fn sanitize_value(&self, value: &Value) -> (Value, PlaceholderMap, Vec<DetectedOccurrence>) {
        let patterns = self.registry.list_all();
        let occurrences = detect(value, &patterns);
        if occurrences.is_empty() {
            return (value.clone(), PlaceholderMap::new(), occurrences);
        }
        let (data, placeholders) = substitute(value, &occurrences);
        (data, placeholders, occurrences)
    }

    fn validate_input(&self, value: &Value) -> Result<()> {
        match payload_size(value, self.config.max_string_length) {
            Ok(size) if size > self.config.max_data_size => Err(Error::InputTooLarge {
                path: "root".to_string(),
                size,
                limit: self.config.max_data_size,
            }),
            Ok(_) => Ok(()),
            Err(oversized) => Err(Error::InputTooLarge {
                path: oversized.path(),
                size: oversized.size,
                limit: self.config.max_string_length,
            }),
        }
    }

    async fn check_latency(
        &self,
        operation: Operation,
        elapsed: Duration,
        context_id: &str,
        resolved_count: Option<usize>,
    ) -> Result<()> {
        let threshold = match operation {
            Operation::Sanitization => self.config.sanitization_threshold,
            Operation::Resolution => self.config.resolution_threshold,
        };
        if elapsed <= threshold {
            return Ok(());
        }

        self.metrics.record_violation();
        let event = PerformanceEvent {
            kind: operation.into(),
            context_id: context_id.to_string(),
            duration_ms: elapsed.as_nanos() as f64 / 1_000_000.0,
            threshold_ms: threshold.as_nanos() as f64 / 1_000_000.0,
            resolved_count,
        };
        warn!(
            operation = operation.as_str(),
            context_id,
            duration_ms = event.duration_ms,
            threshold_ms = event.threshold_ms,
            "Latency threshold exceeded"
        );
        self.observers.notify(&event).await;

        match self.config.enforcement {
            EnforcementMode::Strict => Err(Error::PerformanceViolation {
                operation,
                duration: elapsed,
                threshold,
                context_id: Some(context_id.to_string()),
            }),
            EnforcementMode::Permissive => Ok(()),
        }
    }
}

/// A string over the per-string limit, with its location
struct Oversized {
    /// Innermost segment first
    segments: Vec<String>,
    size: usize,
}

impl Oversized {
    fn path(&self) -> String {
        let mut path = String::from("root");
        for segment in self.segments.iter().rev() {
            path.push_str(segment);
        }
        path
    }
}

/// Approximate serialized size of `value`, failing on the first string longer
/// than `max_string`
fn payload_size(value: &Value, max_string: usize) -> std::result::Result<usize, Oversized> {
    match value {
        Value::String(text) => {
            if text.len() > max_string {
                return Err(Oversized {
                    segments: Vec::new(),
                    size: text.len(),
                });
            }
            Ok(text.len() + 2)
        }
        Value::Array(items) => {
            let mut total = 2;
            for (idx, item) in items.iter().enumerate() {
                total += payload_size(item, max_string).map_err(|mut e| {
                    e.segments.push(format!("[{}]", idx));
                    e
                })? + 1;
            }
            Ok(total)
        }
        Value::Object(map) => {
            let mut total = 2;
            for (key, item) in map {
                total += payload_size(item, max_string).map_err(|mut e| {
                    e.segments.push(format!(".{}", key));
                    e
                })? + key.len()
                    + 4;
            }
            Ok(total)
        }
        Value::Number(_) => Ok(8),
        Value::Bool(_) | Value::Null => Ok(4),
    }
}
