//! Typed entry points translating domain mutations into invalidation
//! events.
//!
//! Route handlers and auth callbacks call these instead of assembling
//! events from raw trigger strings:
//!
//! ```ignore
//! // After a successful cancellation:
//! triggers.appointment_cancelled(&appointment_id).await;
//! ```

use std::sync::Arc;

use serde_json::json;

use crate::engine::InvalidationEngine;
use crate::events::InvalidationEvent;

/// Convenience facade over the invalidation engine. Pure mapping, no
/// independent logic.
pub struct InvalidationTrigger {
    engine: Arc<InvalidationEngine>,
}

impl InvalidationTrigger {
    pub fn new(engine: Arc<InvalidationEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<InvalidationEngine> {
        &self.engine
    }

    pub async fn patient_created(&self, patient_id: &str) {
        self.engine
            .invalidate(InvalidationEvent::new("patient:created", "Patient").with_entity_id(patient_id))
            .await;
    }

    pub async fn patient_updated(&self, patient_id: &str) {
        self.engine
            .invalidate(InvalidationEvent::new("patient:updated", "Patient").with_entity_id(patient_id))
            .await;
    }

    pub async fn patient_deleted(&self, patient_id: &str) {
        self.engine
            .invalidate(InvalidationEvent::new("patient:deleted", "Patient").with_entity_id(patient_id))
            .await;
    }

    pub async fn appointment_created(&self, appointment_id: &str) {
        self.engine
            .invalidate(
                InvalidationEvent::new("appointment:created", "Appointment")
                    .with_entity_id(appointment_id),
            )
            .await;
    }

    pub async fn appointment_updated(&self, appointment_id: &str) {
        self.engine
            .invalidate(
                InvalidationEvent::new("appointment:updated", "Appointment")
                    .with_entity_id(appointment_id),
            )
            .await;
    }

    pub async fn appointment_cancelled(&self, appointment_id: &str) {
        self.engine
            .invalidate(
                InvalidationEvent::new("appointment:cancelled", "Appointment")
                    .with_entity_id(appointment_id),
            )
            .await;
    }

    pub async fn report_created(&self, report_id: &str) {
        self.engine
            .invalidate(InvalidationEvent::new("report:created", "Report").with_entity_id(report_id))
            .await;
    }

    pub async fn report_updated(&self, report_id: &str) {
        self.engine
            .invalidate(InvalidationEvent::new("report:updated", "Report").with_entity_id(report_id))
            .await;
    }

    pub async fn user_login(&self, user_id: &str) {
        self.engine
            .invalidate(
                InvalidationEvent::new("user:login", "User")
                    .with_entity_id(user_id)
                    .with_user_id(user_id),
            )
            .await;
    }

    pub async fn user_logout(&self, user_id: &str) {
        self.engine
            .invalidate(
                InvalidationEvent::new("user:logout", "User")
                    .with_entity_id(user_id)
                    .with_user_id(user_id),
            )
            .await;
    }

    /// Security-sensitive update (password or role change): the default
    /// rule set cascades this into destroying the user's sessions.
    pub async fn user_updated(&self, user_id: &str) {
        self.engine
            .invalidate(
                InvalidationEvent::new("user:updated", "User")
                    .with_entity_id(user_id)
                    .with_user_id(user_id),
            )
            .await;
    }

    pub async fn daily_schedule_changed(&self, date: &str) {
        self.engine
            .invalidate(
                InvalidationEvent::new("schedule:daily_change", "Schedule")
                    .with_metadata(json!({ "date": date })),
            )
            .await;
    }

    pub async fn refresh_analytics(&self) {
        self.engine
            .invalidate(InvalidationEvent::new("analytics:refresh", "Analytics"))
            .await;
    }
}
