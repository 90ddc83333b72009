//! Cluster readiness gate
//!
//! Readers consult it before exposing freshly committed data; role transitions
//! flip it. Shared as an `Arc<ClusterStatus>` handed to whoever needs it.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Whether this node is currently the primary for its series
#[derive(Debug)]
pub struct ClusterStatus {
    instance: String,
    primary: AtomicBool,
}

impl ClusterStatus {
    /// Create a status handle for `instance`
    pub fn new(instance: impl Into<String>, primary: bool) -> Self {
        Self {
            instance: instance.into(),
            primary: AtomicBool::new(primary),
        }
    }

    /// Instance name
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// Lock-free read on the query path
    #[inline]
    pub fn is_primary(&self) -> bool {
        self.primary.load(Ordering::Acquire)
    }

    /// Switch roles; returns the previous value
    pub fn set_primary(&self, primary: bool) -> bool {
        let previous = self.primary.swap(primary, Ordering::AcqRel);
        if previous != primary {
            info!(
                "Instance {} is now {}",
                self.instance,
                if primary { "primary" } else { "secondary" }
            );
        }
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_set_primary() {
        let status = ClusterStatus::new("default", false);
        assert_eq!(status.instance(), "default");
        assert!(!status.is_primary());

        assert!(!status.set_primary(true));
        assert!(status.is_primary());
        assert!(status.set_primary(true));
        assert!(status.set_primary(false));
        assert!(!status.is_primary());
    }

    #[test]
    fn test_visible_across_threads() {
        let status = Arc::new(ClusterStatus::new("default", false));

        let writer = {
            let status = status.clone();
            std::thread::spawn(move || {
                status.set_primary(true);
            })
        };
        writer.join().unwrap();

        assert!(status.is_primary());
    }
}
