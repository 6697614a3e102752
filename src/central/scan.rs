use crate::error::CentralError;

/// Scan-session flag plus a generation counter used to discard stop events
/// from superseded sessions.
#[derive(Debug, Default)]
pub(crate) struct ScanController {
    active: bool,
    generation: u64,
}

impl ScanController {
    pub(crate) fn is_active(&self) -> bool {
        self.active
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Reserves the generation for a new session.
    pub(crate) fn reserve(&mut self) -> Result<u64, CentralError> {
        if self.active {
            return Err(CentralError::AlreadyScanning);
        }
        self.generation += 1;
        Ok(self.generation)
    }

    /// Marks the reserved session active once the radio accepted it.
    pub(crate) fn mark_active(&mut self, generation: u64) {
        if generation == self.generation {
            self.active = true;
        }
    }

    /// Applies a `scanStopped` event, returning whether it changed the flag.
    pub(crate) fn on_stopped(&mut self, generation: u64) -> bool {
        if generation != self.generation || !self.active {
            return false;
        }
        self.active = false;
        true
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;

    fn started() -> (ScanController, u64) {
        let mut controller = ScanController::default();
        let generation = controller
            .reserve()
            .expect("idle controller should reserve a session");
        controller.mark_active(generation);
        (controller, generation)
    }

    #[test]
    fn reserve_rejects_while_active() {
        let (mut controller, _generation) = started();
        assert_matches!(controller.reserve(), Err(CentralError::AlreadyScanning));
    }

    #[test]
    fn current_stop_clears_active_flag() {
        let (mut controller, generation) = started();

        assert!(controller.on_stopped(generation));
        assert!(!controller.is_active());
    }

    #[test]
    fn stale_stop_leaves_active_flag_unchanged() {
        let (mut controller, first) = started();
        assert!(controller.on_stopped(first));
        let second = controller.reserve().expect("idle controller should reserve");
        controller.mark_active(second);

        assert!(!controller.on_stopped(first));
        assert!(controller.is_active());
        assert_eq!(second, controller.generation());
    }

    #[test]
    fn generation_increases_even_when_session_never_started() {
        let mut controller = ScanController::default();
        let first = controller.reserve().expect("idle controller should reserve");
        let second = controller.reserve().expect("inactive controller should reserve");

        assert!(second > first);
        assert!(!controller.is_active());
    }
}
