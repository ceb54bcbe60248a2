use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

/// Content ids that need no further work in this run: either handed to the
/// upload queue or confirmed present on the remote.
///
/// Clones share the same set. Membership only ever grows.
#[derive(Clone, Debug, Default)]
pub struct UploadedSet {
    inner: Arc<RwLock<HashSet<String>>>,
}

impl UploadedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the oid was not already present.
    pub fn add(&self, oid: &str) -> bool {
        if self.inner.read().contains(oid) {
            return false;
        }
        self.inner.write().insert(oid.to_string())
    }

    pub fn contains(&self, oid: &str) -> bool {
        self.inner.read().contains(oid)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn clones_share_membership() {
        let set = UploadedSet::new();
        let other = set.clone();
        assert!(set.add("a"));
        assert!(!other.add("a"));
        assert!(other.contains("a"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn concurrent_adds_are_all_visible() {
        let set = UploadedSet::new();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let set = set.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        set.add(&format!("{t}-{i}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(set.len(), 800);
        assert!(set.contains("7-99"));
    }
}
