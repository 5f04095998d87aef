//! Rule-driven invalidation engine.
//!
//! A single-flight drain loop over the event queue: the first
//! [`InvalidationEngine::invalidate`] caller drives the drain to
//! completion, paying for every event enqueued during the pass, while
//! concurrent callers enqueue and return. Delayed rules run out-of-band on
//! their own timers, so they may complete after later non-delayed events;
//! that reordering is deliberate. A background tick re-drains the queue as
//! a safety net against events published in the window between the final
//! pop and the idle-flag reset.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use metrics::{counter, histogram};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::config::CacheSettings;
use crate::events::{EventQueue, InvalidationEvent};
use crate::lock::{rw_read, rw_write};
use crate::registry::{CacheNamespace, CacheRegistry};
use crate::rules::{InvalidationRule, Target, default_rules};
use crate::session::SessionManager;

const SOURCE: &str = "engine";

const METRIC_DRAIN_MS: &str = "praxis_cache_drain_ms";
const METRIC_EVENTS_PROCESSED: &str = "praxis_cache_events_processed";

const DAILY_SCHEDULE_TAG: &str = "daily-schedule";

/// Snapshot of engine state for dashboards and tests.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub rules_count: usize,
    pub queue_size: usize,
    pub processing: bool,
}

/// Maps domain mutation events to cache and session invalidation.
///
/// One instance per process, constructed at application startup and shared
/// by reference; there is no global state.
pub struct InvalidationEngine {
    rules: RwLock<Vec<InvalidationRule>>,
    queue: EventQueue,
    processing: AtomicBool,
    registry: Arc<CacheRegistry>,
    sessions: Arc<SessionManager>,
    drain_interval: std::time::Duration,
}

impl InvalidationEngine {
    /// Create an engine seeded with the default rule table.
    pub fn new(
        registry: Arc<CacheRegistry>,
        sessions: Arc<SessionManager>,
        settings: &CacheSettings,
    ) -> Self {
        Self {
            rules: RwLock::new(default_rules()),
            queue: EventQueue::new(),
            processing: AtomicBool::new(false),
            registry,
            sessions,
            drain_interval: settings.drain_interval(),
        }
    }

    pub fn add_rule(&self, rule: InvalidationRule) {
        debug!(trigger = %rule.trigger, targets = rule.targets.len(), "Invalidation rule added");
        rw_write(&self.rules, SOURCE, "add_rule").push(rule);
    }

    /// Remove every rule registered for `trigger`, returning how many were
    /// dropped.
    pub fn remove_rule(&self, trigger: &str) -> usize {
        let mut rules = rw_write(&self.rules, SOURCE, "remove_rule");
        let before = rules.len();
        rules.retain(|rule| rule.trigger != trigger);
        let removed = before - rules.len();
        debug!(trigger, removed, "Invalidation rules removed");
        removed
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            rules_count: rw_read(&self.rules, SOURCE, "stats").len(),
            queue_size: self.queue.len(),
            processing: self.processing.load(Ordering::SeqCst),
        }
    }

    /// Enqueue an event and, when no drain is in flight, drive the drain
    /// to completion before returning.
    #[instrument(skip(self, event), fields(trigger = %event.trigger))]
    pub async fn invalidate(&self, event: InvalidationEvent) {
        self.queue.publish(event);
        self.drain_if_idle().await;
    }

    /// Enqueue a batch, then drain once.
    pub async fn bulk_invalidate(&self, events: Vec<InvalidationEvent>) {
        for event in events {
            self.queue.publish(event);
        }
        self.drain_if_idle().await;
    }

    /// Sugar for `"<entity_type>:<operation>"` triggers.
    pub async fn smart_invalidate(
        &self,
        entity_type: &str,
        entity_id: Option<&str>,
        operation: &str,
    ) {
        let trigger = format!("{}:{operation}", entity_type.to_lowercase());
        let mut event = InvalidationEvent::new(trigger, entity_type);
        if let Some(entity_id) = entity_id {
            event = event.with_entity_id(entity_id);
        }
        self.invalidate(event).await;
    }

    /// Enqueue an event for `trigger` after `delay`. Fire-and-forget: the
    /// timer handle is dropped and the invalidation cannot be cancelled.
    pub fn schedule_invalidation(self: Arc<Self>, trigger: impl Into<String>, delay: std::time::Duration) {
        let trigger = trigger.into();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(trigger = %trigger, "Scheduled invalidation firing");
            let entity_type = trigger.split(':').next().unwrap_or_default().to_string();
            self.invalidate(InvalidationEvent::new(trigger, entity_type)).await;
        });
    }

    /// Spawn the periodic safety-net drain. The host application owns the
    /// handle and aborts it on shutdown.
    pub fn start_background_drain(self: Arc<Self>) -> JoinHandle<()> {
        let interval = self.drain_interval;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                if !self.queue.is_empty() {
                    self.drain_if_idle().await;
                }
            }
        })
    }

    async fn drain_if_idle(&self) {
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Another caller owns the drain; our event rides along.
            return;
        }
        let started_at = Instant::now();
        let mut processed = 0u64;
        while let Some(event) = self.queue.pop() {
            self.process_event(event).await;
            processed += 1;
        }
        self.processing.store(false, Ordering::SeqCst);
        // An event published between the final pop and the flag reset waits
        // for the next invalidate call or the background tick.

        histogram!(METRIC_DRAIN_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        counter!(METRIC_EVENTS_PROCESSED).increment(processed);
    }

    async fn process_event(&self, event: InvalidationEvent) {
        let matching: Vec<InvalidationRule> = rw_read(&self.rules, SOURCE, "process_event")
            .iter()
            .filter(|rule| rule.trigger == event.trigger)
            .cloned()
            .collect();
        if matching.is_empty() {
            debug!(trigger = %event.trigger, "No invalidation rule for trigger; ignoring");
            return;
        }

        for rule in matching {
            if let Some(condition) = &rule.condition
                && !condition(&event)
            {
                debug!(trigger = %event.trigger, "Rule condition rejected event");
                continue;
            }
            if let Some(delay) = rule.delay {
                let registry = Arc::clone(&self.registry);
                let sessions = Arc::clone(&self.sessions);
                let rule = rule.clone();
                let event = event.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    debug!(trigger = %event.trigger, "Delayed rule executing");
                    execute_rule(&registry, &sessions, &rule, &event).await;
                });
                continue;
            }
            execute_rule(&self.registry, &self.sessions, &rule, &event).await;
        }
    }
}

async fn execute_rule(
    registry: &CacheRegistry,
    sessions: &SessionManager,
    rule: &InvalidationRule,
    event: &InvalidationEvent,
) {
    for target in &rule.targets {
        apply_target(registry, target, event).await;
    }
    if rule.cascade && event.entity_id.is_some() {
        cascade(registry, sessions, event).await;
    }
}

async fn apply_target(registry: &CacheRegistry, target: &Target, event: &InvalidationEvent) {
    match target {
        Target::Model(model) => {
            let manager = registry.manager(CacheNamespace::for_model(model));
            manager.invalidate_tag(&format!("model:{model}")).await;
            if let Some(entity_id) = &event.entity_id {
                manager
                    .delete(&format!("{}:{entity_id}", model.to_lowercase()))
                    .await;
                manager.invalidate_tag(&format!("{model}:{entity_id}")).await;
            }
        }
        Target::NamespacedTag { namespace, tag } => {
            registry.manager(*namespace).invalidate_tag(tag).await;
        }
        Target::Tag(tag) => {
            for manager in registry.all_managers() {
                manager.invalidate_tag(tag).await;
            }
        }
    }
}

/// Entity-type-specific step after a cascading rule's targets. Failures
/// here degrade inside the cache layer and never abort the drain.
async fn cascade(registry: &CacheRegistry, sessions: &SessionManager, event: &InvalidationEvent) {
    let Some(entity_id) = &event.entity_id else {
        return;
    };
    match event.entity_type.as_str() {
        "Appointment" => {
            registry
                .manager(CacheNamespace::Analytics)
                .invalidate_tag(DAILY_SCHEDULE_TAG)
                .await;
        }
        "User" => {
            let destroyed = sessions.destroy_user_sessions(entity_id).await;
            info!(user_id = %entity_id, destroyed, "Cascade destroyed user sessions");
        }
        other => {
            debug!(entity_type = other, "No cascade handler for entity type");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::config::SessionSettings;
    use crate::manager::CacheOptions;
    use crate::store::MemoryStore;

    fn engine() -> Arc<InvalidationEngine> {
        let store = Arc::new(MemoryStore::new());
        let settings = CacheSettings::default();
        let registry = Arc::new(CacheRegistry::new(store, &settings));
        let sessions = Arc::new(SessionManager::new(
            registry.sessions().clone(),
            SessionSettings::default(),
        ));
        Arc::new(InvalidationEngine::new(registry, sessions, &settings))
    }

    #[tokio::test]
    async fn unknown_trigger_is_ignored() {
        let engine = engine();

        engine
            .invalidate(InvalidationEvent::new("nonexistent:event", "Nothing"))
            .await;

        let stats = engine.stats();
        assert_eq!(stats.queue_size, 0);
        assert!(!stats.processing);
    }

    #[tokio::test]
    async fn remove_rule_drops_every_rule_for_the_trigger() {
        let engine = engine();
        engine.add_rule(InvalidationRule::new(
            "receipt:issued",
            vec![Target::tag("receipts")],
        ));
        engine.add_rule(InvalidationRule::new(
            "receipt:issued",
            vec![Target::namespaced(CacheNamespace::Queries, "receipts")],
        ));

        assert_eq!(engine.remove_rule("receipt:issued"), 2);
        assert_eq!(engine.remove_rule("receipt:issued"), 0);
    }

    #[tokio::test]
    async fn stats_reflect_the_rule_table() {
        let engine = engine();
        let seeded = engine.stats().rules_count;

        engine.add_rule(InvalidationRule::new("x:y", vec![Target::tag("t")]));
        assert_eq!(engine.stats().rules_count, seeded + 1);
    }

    #[tokio::test]
    async fn condition_skips_non_matching_events() {
        let engine = engine();
        let queries = engine.registry.manager(CacheNamespace::Queries).clone();
        queries
            .set(
                "q1",
                &1u32,
                &CacheOptions::new().with_tags(["delinquency"]),
            )
            .await;

        engine.add_rule(
            InvalidationRule::new(
                "receipt:issued",
                vec![Target::namespaced(CacheNamespace::Queries, "delinquency")],
            )
            .with_condition(|event| event.entity_id.is_some()),
        );

        // Rejected: no entity id.
        engine
            .invalidate(InvalidationEvent::new("receipt:issued", "Receipt"))
            .await;
        assert_eq!(queries.get::<u32>("q1").await, Some(1));

        // Accepted.
        engine
            .invalidate(InvalidationEvent::new("receipt:issued", "Receipt").with_entity_id("r1"))
            .await;
        assert_eq!(queries.get::<u32>("q1").await, None);
    }

    #[tokio::test]
    async fn smart_invalidate_builds_the_trigger_from_the_operation() {
        let engine = engine();
        let queries = engine.registry.manager(CacheNamespace::Queries).clone();
        queries
            .set("w1", &1u32, &CacheOptions::new().with_tags(["widgets"]))
            .await;

        engine.add_rule(InvalidationRule::new(
            "widget:purged",
            vec![Target::namespaced(CacheNamespace::Queries, "widgets")],
        ));

        engine.smart_invalidate("Widget", Some("w1"), "purged").await;
        assert_eq!(queries.get::<u32>("w1").await, None);
    }

    #[tokio::test]
    async fn back_to_back_invalidations_process_fifo_exactly_once() {
        let engine = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        engine.add_rule(
            InvalidationRule::new("audit:appended", vec![Target::tag("audit")]).with_condition(
                move |event| {
                    recorder
                        .lock()
                        .expect("recorder lock")
                        .push(event.entity_id.clone().unwrap_or_default());
                    true
                },
            ),
        );

        for id in ["a", "b", "c"] {
            engine
                .invalidate(InvalidationEvent::new("audit:appended", "Audit").with_entity_id(id))
                .await;
        }

        assert_eq!(*seen.lock().expect("recorder lock"), vec!["a", "b", "c"]);
        assert_eq!(engine.stats().queue_size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn background_drain_stays_idle_between_events() {
        let engine = engine();
        let handle = engine.clone().start_background_drain();

        tokio::time::sleep(std::time::Duration::from_millis(2500)).await;
        tokio::task::yield_now().await;

        assert!(!engine.stats().processing);
        assert_eq!(engine.stats().queue_size, 0);
        handle.abort();
    }

    #[tokio::test]
    async fn bulk_invalidate_drains_the_whole_batch() {
        let engine = engine();
        let queries = engine.registry.manager(CacheNamespace::Queries).clone();
        for (key, tag) in [("a", "ta"), ("b", "tb"), ("c", "tc")] {
            queries
                .set(key, &1u32, &CacheOptions::new().with_tags([tag]))
                .await;
            engine.add_rule(InvalidationRule::new(
                format!("bulk:{key}"),
                vec![Target::namespaced(CacheNamespace::Queries, tag)],
            ));
        }

        engine
            .bulk_invalidate(vec![
                InvalidationEvent::new("bulk:a", "Bulk"),
                InvalidationEvent::new("bulk:b", "Bulk"),
                InvalidationEvent::new("bulk:c", "Bulk"),
            ])
            .await;

        for key in ["a", "b", "c"] {
            assert_eq!(queries.get::<u32>(key).await, None);
        }
    }
}
