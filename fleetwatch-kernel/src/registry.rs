use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::card::{CardRef, NotificationCard};

#[derive(Default)]
struct Indices {
    by_host: HashMap<String, CardRef>,
    by_correlation: HashMap<String, CardRef>,
}

/// Live cards, at most one per host, reachable by host id or correlation id.
/// Both indices sit behind one lock and always change together.
#[derive(Default)]
pub struct CardRegistry {
    indices: Mutex<Indices>,
}

impl CardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Retire the host's active card (if any) and register a fresh one.
    pub fn create_for(&self, host_id: &str, recurred: bool) -> CardRef {
        let correlation_id = Uuid::new_v4().to_string();
        let card: CardRef = Arc::new(Mutex::new(NotificationCard::new(
            correlation_id.clone(),
            host_id.to_string(),
            recurred,
        )));

        let mut idx = self.indices.lock();
        if let Some(old) = idx.by_host.insert(host_id.to_string(), Arc::clone(&card)) {
            let old_id = old.lock().correlation_id.clone();
            idx.by_correlation.remove(&old_id);
        }
        idx.by_correlation.insert(correlation_id, Arc::clone(&card));
        card
    }

    /// The active card for this correlation id. `None` is an ordinary answer:
    /// the episode was superseded or the process restarted since the card was sent.
    pub fn resolve(&self, correlation_id: &str) -> Option<CardRef> {
        self.indices.lock().by_correlation.get(correlation_id).cloned()
    }

    pub fn active_for(&self, host_id: &str) -> Option<CardRef> {
        self.indices.lock().by_host.get(host_id).cloned()
    }

    pub fn retire(&self, host_id: &str) -> Option<CardRef> {
        let mut idx = self.indices.lock();
        let old = idx.by_host.remove(host_id)?;
        let old_id = old.lock().correlation_id.clone();
        idx.by_correlation.remove(&old_id);
        Some(old)
    }

    pub fn len(&self) -> usize {
        self.indices.lock().by_host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
