use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stopper tells every linked `StopCheck` to stop, either explicitly or when dropped.
pub(crate) struct Stopper {
    stop_signal: Arc<AtomicBool>,
}

#[derive(Clone)]
pub(crate) struct StopCheck {
    stop_signal: Arc<AtomicBool>,
}

impl Stopper {
    pub(crate) fn stop(&self) {
        self.stop_signal.store(true, Ordering::Release);
    }
}

impl Drop for Stopper {
    fn drop(&mut self) {
        self.stop();
    }
}

impl StopCheck {
    pub(crate) fn should_stop(&self) -> bool {
        self.stop_signal.load(Ordering::Acquire)
    }
}

pub(crate) fn new() -> (Stopper, StopCheck) {
    let stop_signal = Arc::new(AtomicBool::new(false));

    let stopper = Stopper {
        stop_signal: stop_signal.clone(),
    };
    let stop_check = StopCheck { stop_signal };

    (stopper, stop_check)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_reaches_every_check() {
        let (stopper, check) = new();
        let other = check.clone();
        assert!(!check.should_stop());

        stopper.stop();
        assert!(check.should_stop());
        assert!(other.should_stop());
    }

    #[test]
    fn drop_stops() {
        let (stopper, check) = new();
        drop(stopper);
        assert!(check.should_stop());
    }
}
