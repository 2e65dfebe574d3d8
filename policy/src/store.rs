use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use vspace_binder::Transaction;

/// Caller-supplied gate over a parsed transaction. Returning `false` rejects.
pub type TransactionFilter = Arc<dyn Fn(&Transaction) -> bool + Send + Sync>;

/// Outcome of policy evaluation for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Forward to the original syscall.
    Admit,
    /// Short-circuit with a rejection.
    Reject,
}

/// Essential system services admitted by the default seed.
pub const DEFAULT_ALLOWED: [&str; 6] = [
    "servicemanager",
    "package",
    "activity",
    "window",
    "input",
    "power",
];

/// Sensitive services blocked by the default seed.
pub const DEFAULT_BLOCKED: [&str; 3] = ["telephony.registry", "isms", "phone"];

/// The per-service allow/block table plus per-service predicates.
///
/// Mutation is serialized by the coordinator; readers on the interception hot
/// path take a short read-side critical section through the `RwLock` the
/// agent wraps this in.
pub struct PolicyStore {
    services: HashMap<String, bool>,
    filters: HashMap<String, TransactionFilter>,
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl PolicyStore {
    /// Empty store: everything admitted.
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
            filters: HashMap::new(),
        }
    }

    /// Store seeded with the default allow/block table.
    pub fn with_defaults() -> Self {
        let mut store = Self::new();
        store.seed_defaults();
        store
    }

    fn seed_defaults(&mut self) {
        for name in DEFAULT_ALLOWED {
            self.services.insert(name.to_string(), true);
        }
        for name in DEFAULT_BLOCKED {
            self.services.insert(name.to_string(), false);
        }
    }

    /// Allow bit for `service`. Absent entry means allow.
    pub fn allows(&self, service: &str) -> bool {
        self.services.get(service).copied().unwrap_or(true)
    }

    pub fn set_service(&mut self, service: &str, allow: bool) {
        debug!(
            "service filter: {service} -> {}",
            if allow { "allow" } else { "block" }
        );
        self.services.insert(service.to_string(), allow);
    }

    pub fn remove_service(&mut self, service: &str) -> bool {
        self.services.remove(service).is_some()
    }

    pub fn set_filter(&mut self, service: &str, filter: TransactionFilter) {
        debug!("transaction filter registered for {service}");
        self.filters.insert(service.to_string(), filter);
    }

    pub fn remove_filter(&mut self, service: &str) -> bool {
        self.filters.remove(service).is_some()
    }

    /// Drop every entry and restore the default seed.
    pub fn clear(&mut self) {
        self.services.clear();
        self.filters.clear();
        self.seed_defaults();
        debug!("service filters reset to defaults");
    }

    /// Evaluate a parsed transaction: the allow bit gates first, then the
    /// predicate (consulted only for its matching service).
    pub fn evaluate(&self, tx: &Transaction) -> Verdict {
        if !self.allows(&tx.service) {
            debug!("service blocked by filter: {}", tx.service);
            return Verdict::Reject;
        }

        if let Some(filter) = self.filters.get(&tx.service) {
            if !filter(tx) {
                debug!("transaction blocked by predicate: {}", tx.service);
                return Verdict::Reject;
            }
        }

        Verdict::Admit
    }
}
