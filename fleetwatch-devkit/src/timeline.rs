use parking_lot::Mutex;
use std::sync::Arc;

/// Ordered record of what the doubles saw, across all of them.
#[derive(Clone, Default)]
pub struct Timeline {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Index of the first entry starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e.starts_with(prefix))
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_follow_push_order() {
        let t = Timeline::new();
        t.push("update abc");
        t.push("run power-reset x");
        assert_eq!(t.position("update"), Some(0));
        assert_eq!(t.position("run power-reset"), Some(1));
        assert_eq!(t.position("post"), None);
        t.clear();
        assert!(t.entries().is_empty());
    }
}
