//! Praxis cache core.
//!
//! Tag-based cache invalidation and distributed session management for
//! the Praxis clinic platform:
//!
//! - **Cache managers**: namespaced, tag-aware wrappers over a remote
//!   key-value store, one per entity family
//! - **Session manager**: cache-backed sessions with per-user
//!   enumeration, a concurrency cap, and cascading destruction
//! - **Invalidation engine**: a rule-driven event system mapping domain
//!   mutations to invalidation targets, with delay, condition, and
//!   cascade semantics
//!
//! ## Wiring
//!
//! The host application constructs one instance of each component at
//! startup and passes them by reference; nothing here is a global.
//!
//! ```ignore
//! let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
//! let registry = Arc::new(CacheRegistry::new(store, &cache_settings));
//! let sessions = Arc::new(SessionManager::new(
//!     registry.sessions().clone(),
//!     session_settings,
//! ));
//! let engine = Arc::new(InvalidationEngine::new(
//!     registry.clone(),
//!     sessions.clone(),
//!     &cache_settings,
//! ));
//! let drain = engine.clone().start_background_drain();
//! let triggers = InvalidationTrigger::new(engine);
//! ```

mod config;
mod engine;
mod error;
mod events;
mod lock;
mod manager;
mod registry;
mod rules;
mod session;
mod store;
mod trigger;

pub use config::{CacheSettings, SessionSettings};
pub use engine::{EngineStats, InvalidationEngine};
pub use error::StoreError;
pub use events::{EventQueue, InvalidationEvent};
pub use manager::{CacheManager, CacheOptions};
pub use registry::{CacheNamespace, CacheRegistry};
pub use rules::{InvalidationRule, RuleCondition, Target, default_rules};
pub use session::{NewSession, SessionManager, SessionPatch, SessionRecord};
pub use store::{KeyValueStore, MemoryStore};
pub use trigger::InvalidationTrigger;
