//! Non-overlapping save arbitration.

use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveState {
    Idle,
    Running,
    /// A request arrived mid-flight; one more pass is owed.
    RunningWithPending,
}

/// Result of asking to start a save.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The caller owns the save and must call [`SaveCoalescer::finish`].
    Run,
    /// A save is in flight; it will run one more pass for this request.
    Deferred,
}

/// Guarantees saves never overlap and that any number of requests arriving
/// during a save collapse into exactly one trailing pass.
#[derive(Debug)]
pub struct SaveCoalescer {
    state: Mutex<SaveState>,
}

impl SaveCoalescer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SaveState::Idle),
        }
    }

    pub fn state(&self) -> SaveState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() != SaveState::Idle
    }

    pub fn request(&self) -> Admission {
        let mut state = self.state.lock();
        match *state {
            SaveState::Idle => {
                *state = SaveState::Running;
                Admission::Run
            }
            SaveState::Running | SaveState::RunningWithPending => {
                *state = SaveState::RunningWithPending;
                Admission::Deferred
            }
        }
    }

    /// Called by the owner after each pass. Returns true when another pass
    /// is owed; the state stays `Running` in that case.
    pub fn finish(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            SaveState::RunningWithPending => {
                *state = SaveState::Running;
                true
            }
            SaveState::Running | SaveState::Idle => {
                *state = SaveState::Idle;
                false
            }
        }
    }

    /// Return to `Idle` after a failed pass, dropping any owed pass.
    pub fn abort(&self) {
        *self.state.lock() = SaveState::Idle;
    }
}

impl Default for SaveCoalescer {
    fn default() -> Self {
        Self::new()
    }
}
