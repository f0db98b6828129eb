use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop flag shared between the step loop, signal handlers and
/// the session. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct StopCondition {
    requested: Arc<AtomicBool>,
}

impl StopCondition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the simulation to stop at the next opportunity.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let stop = StopCondition::new();
        let handle = stop.clone();
        assert!(!stop.is_requested());

        handle.request();
        assert!(stop.is_requested());
    }

    #[test]
    fn test_request_from_other_thread() {
        let stop = StopCondition::new();
        let remote = stop.clone();
        std::thread::spawn(move || remote.request()).join().unwrap();
        assert!(stop.is_requested());
    }
}
