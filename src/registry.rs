//! Named cache namespaces and their managers.
//!
//! One [`CacheManager`] per entity family, all over the same shared store.
//! Invalidation targets route here: model targets to their owning
//! namespace, namespaced tags to one manager, generic tags to all of them.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use crate::config::CacheSettings;
use crate::manager::CacheManager;
use crate::store::KeyValueStore;

/// Entity families with a dedicated cache namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
    Patients,
    Appointments,
    Reports,
    Analytics,
    Sessions,
    Queries,
    Default,
}

impl CacheNamespace {
    /// Returns the key prefix used in the store.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Patients => "patients",
            Self::Appointments => "appointments",
            Self::Reports => "reports",
            Self::Analytics => "analytics",
            Self::Sessions => "sessions",
            Self::Queries => "queries",
            Self::Default => "cache",
        }
    }

    /// Returns all namespace variants for iteration.
    pub fn all() -> &'static [CacheNamespace] {
        &[
            Self::Patients,
            Self::Appointments,
            Self::Reports,
            Self::Analytics,
            Self::Sessions,
            Self::Queries,
            Self::Default,
        ]
    }

    /// Namespace owning a domain model's cached data. Models without a
    /// dedicated family land in the default namespace.
    pub fn for_model(model: &str) -> Self {
        match model {
            "Patient" => Self::Patients,
            "Appointment" => Self::Appointments,
            "Report" => Self::Reports,
            "Analytics" => Self::Analytics,
            _ => Self::Default,
        }
    }
}

impl Display for CacheNamespace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheNamespace {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patients" => Ok(Self::Patients),
            "appointments" => Ok(Self::Appointments),
            "reports" => Ok(Self::Reports),
            "analytics" => Ok(Self::Analytics),
            "sessions" => Ok(Self::Sessions),
            "queries" => Ok(Self::Queries),
            "cache" => Ok(Self::Default),
            _ => Err(()),
        }
    }
}

/// The process-wide set of cache managers, one per namespace.
pub struct CacheRegistry {
    managers: HashMap<CacheNamespace, Arc<CacheManager>>,
}

impl CacheRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, settings: &CacheSettings) -> Self {
        let managers = CacheNamespace::all()
            .iter()
            .map(|namespace| {
                let manager = CacheManager::new(
                    store.clone(),
                    namespace.as_str(),
                    settings.tag_ttl_slack(),
                );
                (*namespace, Arc::new(manager))
            })
            .collect();
        Self { managers }
    }

    pub fn manager(&self, namespace: CacheNamespace) -> &Arc<CacheManager> {
        self.managers
            .get(&namespace)
            .expect("every namespace is registered at construction")
    }

    /// The manager backing the session layer.
    pub fn sessions(&self) -> &Arc<CacheManager> {
        self.manager(CacheNamespace::Sessions)
    }

    pub fn all_managers(&self) -> impl Iterator<Item = &Arc<CacheManager>> {
        self.managers.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn namespace_slug_roundtrip() {
        for namespace in CacheNamespace::all() {
            assert_eq!(namespace.as_str().parse(), Ok(*namespace));
        }
        assert_eq!("bogus".parse::<CacheNamespace>(), Err(()));
    }

    #[test]
    fn model_routing() {
        assert_eq!(CacheNamespace::for_model("Patient"), CacheNamespace::Patients);
        assert_eq!(
            CacheNamespace::for_model("Appointment"),
            CacheNamespace::Appointments
        );
        assert_eq!(CacheNamespace::for_model("Report"), CacheNamespace::Reports);
        assert_eq!(CacheNamespace::for_model("Analytics"), CacheNamespace::Analytics);
        assert_eq!(CacheNamespace::for_model("User"), CacheNamespace::Default);
    }

    #[test]
    fn registry_covers_every_namespace() {
        let store = Arc::new(MemoryStore::new());
        let registry = CacheRegistry::new(store, &CacheSettings::default());

        assert_eq!(registry.all_managers().count(), CacheNamespace::all().len());
        for namespace in CacheNamespace::all() {
            assert_eq!(registry.manager(*namespace).namespace(), namespace.as_str());
        }
        assert_eq!(registry.sessions().namespace(), "sessions");
    }
}
