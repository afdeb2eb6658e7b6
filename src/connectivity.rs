//! Connectivity oracle — reports whether the remote authority is reachable.
//!
//! Offline is a normal operating mode, not a fault: write paths consult the
//! oracle to decide whether to attempt the remote phase at all.

use std::sync::atomic::{AtomicBool, Ordering};

pub trait ConnectivityOracle: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Oracle backed by a flippable flag. Used in tests to force offline/online
/// and usable in production wired to a platform reachability callback.
#[derive(Debug)]
pub struct StaticConnectivity {
    online: AtomicBool,
}

impl StaticConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl ConnectivityOracle for StaticConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_connectivity_toggles() {
        let oracle = StaticConnectivity::new(true);
        assert!(oracle.is_online());
        oracle.set_online(false);
        assert!(!oracle.is_online());
    }
}
