//! Declarative trigger-to-target invalidation rules.
//!
//! Rules are process-lifetime configuration: the engine seeds the default
//! table at construction and callers may add or remove rules at runtime.
//! A rule is immutable once added; several rules may share one trigger and
//! all of them fire.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::events::InvalidationEvent;
use crate::registry::CacheNamespace;

const ANALYTICS_REFRESH_DELAY: Duration = Duration::from_millis(5000);

/// Predicate deciding whether a rule applies to a given event.
pub type RuleCondition = Arc<dyn Fn(&InvalidationEvent) -> bool + Send + Sync>;

/// Where a rule routes its invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A domain model's cached data, routed to its owning namespace: the
    /// `"model:<Name>"` collection tag always, plus the per-entity key and
    /// tag when the event carries an entity id.
    Model(String),
    /// A tag in one specific namespace.
    NamespacedTag {
        namespace: CacheNamespace,
        tag: String,
    },
    /// A cross-cutting tag, fanned out to every registered namespace.
    Tag(String),
}

impl Target {
    pub fn model(name: impl Into<String>) -> Self {
        Self::Model(name.into())
    }

    pub fn namespaced(namespace: CacheNamespace, tag: impl Into<String>) -> Self {
        Self::NamespacedTag {
            namespace,
            tag: tag.into(),
        }
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        Self::Tag(tag.into())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Model(name) => write!(f, "model:{name}"),
            Self::NamespacedTag { namespace, tag } => write!(f, "{namespace}:{tag}"),
            Self::Tag(tag) => f.write_str(tag),
        }
    }
}

/// A single trigger-to-targets rule.
#[derive(Clone)]
pub struct InvalidationRule {
    pub trigger: String,
    pub targets: Vec<Target>,
    /// Defer execution by this much; delayed rules run out-of-band and the
    /// drain loop does not wait for them.
    pub delay: Option<Duration>,
    /// Run the entity-type-specific cascade step after the targets.
    pub cascade: bool,
    pub condition: Option<RuleCondition>,
}

impl InvalidationRule {
    pub fn new(trigger: impl Into<String>, targets: Vec<Target>) -> Self {
        Self {
            trigger: trigger.into(),
            targets,
            delay: None,
            cascade: false,
            condition: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_cascade(mut self) -> Self {
        self.cascade = true;
        self
    }

    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&InvalidationEvent) -> bool + Send + Sync + 'static,
    {
        self.condition = Some(Arc::new(condition));
        self
    }
}

impl fmt::Debug for InvalidationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationRule")
            .field("trigger", &self.trigger)
            .field("targets", &self.targets)
            .field("delay", &self.delay)
            .field("cascade", &self.cascade)
            .field("condition", &self.condition.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

/// The rule table seeded at engine construction.
///
/// Patient, appointment, and user updates cascade; analytics refreshes are
/// deferred so bursts collapse into the freshest state.
pub fn default_rules() -> Vec<InvalidationRule> {
    let dashboard = || Target::namespaced(CacheNamespace::Analytics, "dashboard");

    vec![
        InvalidationRule::new(
            "patient:created",
            vec![Target::model("Patient"), dashboard()],
        )
        .with_cascade(),
        InvalidationRule::new(
            "patient:updated",
            vec![Target::model("Patient"), dashboard()],
        )
        .with_cascade(),
        InvalidationRule::new(
            "patient:deleted",
            vec![
                Target::model("Patient"),
                Target::model("Appointment"),
                Target::model("Report"),
                dashboard(),
            ],
        )
        .with_cascade(),
        InvalidationRule::new(
            "appointment:created",
            vec![
                Target::model("Appointment"),
                Target::tag("daily-schedule"),
                dashboard(),
            ],
        )
        .with_cascade(),
        InvalidationRule::new(
            "appointment:updated",
            vec![
                Target::model("Appointment"),
                Target::tag("daily-schedule"),
                dashboard(),
            ],
        )
        .with_cascade(),
        InvalidationRule::new(
            "appointment:cancelled",
            vec![
                Target::model("Appointment"),
                Target::tag("daily-schedule"),
                dashboard(),
            ],
        )
        .with_cascade(),
        InvalidationRule::new("report:created", vec![Target::model("Report"), dashboard()]),
        InvalidationRule::new("report:updated", vec![Target::model("Report"), dashboard()]),
        InvalidationRule::new("user:login", vec![dashboard()]),
        InvalidationRule::new("user:logout", vec![Target::tag("sessions")]),
        InvalidationRule::new(
            "user:updated",
            vec![Target::model("User"), Target::tag("sessions")],
        )
        .with_cascade(),
        InvalidationRule::new(
            "analytics:refresh",
            vec![dashboard(), Target::model("Analytics")],
        )
        .with_delay(ANALYTICS_REFRESH_DELAY),
        InvalidationRule::new(
            "schedule:daily_change",
            vec![Target::tag("daily-schedule"), Target::model("Appointment")],
        ),
    ]
}
