//! Exclusive access to the shared classifier.
//!
//! One coarse mutex covers every read and write of [`ModelState`]. Predictions
//! take it too: the adapter flips the mode to [`Mode::Train`] while it holds the
//! lock, and no caller may see that transient state.

use std::sync::Mutex;

use thiserror::Error;

use crate::model::{Classifier, Mode};

/// Raised when the guard can no longer hand out the model.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("model mutex was poisoned by a previous panic")]
    Poisoned,
}

/// Process-wide mutable model: parameters plus the mode they are used in.
#[derive(Debug)]
pub struct ModelState {
    classifier: Classifier,
    mode: Mode,
}

impl ModelState {
    /// Wraps a loaded classifier in evaluation mode.
    #[must_use]
    pub fn new(classifier: Classifier) -> Self {
        Self {
            classifier,
            mode: Mode::Eval,
        }
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switches mode, returning the previous one.
    pub fn set_mode(&mut self, mode: Mode) -> Mode {
        std::mem::replace(&mut self.mode, mode)
    }

    #[must_use]
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }
}

/// Serialises every access to the single [`ModelState`].
#[derive(Debug)]
pub struct InferenceGuard {
    state: Mutex<ModelState>,
}

impl InferenceGuard {
    #[must_use]
    pub fn new(state: ModelState) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Runs `f` while holding the lock; the lock is released when `f` returns,
    /// errors, or unwinds.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Poisoned`] (converted into `E`) if an earlier
    /// holder panicked, and otherwise whatever `f` returns.
    ///
    /// # Examples
    ///
    /// ```
    /// use candle_core::Device;
    /// use sketch_iq::guard::{GuardError, InferenceGuard, ModelState};
    /// use sketch_iq::model::{Classifier, Mode};
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let guard = InferenceGuard::new(ModelState::new(Classifier::new(&Device::Cpu)?));
    /// let mode = guard.with_exclusive_access(|state| Ok::<_, GuardError>(state.mode()))?;
    /// assert_eq!(mode, Mode::Eval);
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_exclusive_access<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut ModelState) -> Result<T, E>,
        E: From<GuardError>,
    {
        let mut state = self.state.lock().map_err(|_| GuardError::Poisoned)?;
        f(&mut state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use rstest::{fixture, rstest};
    use std::panic::{AssertUnwindSafe, catch_unwind};

    #[fixture]
    fn guard() -> InferenceGuard {
        let classifier =
            Classifier::new(&Device::Cpu).unwrap_or_else(|e| panic!("classifier: {e}"));
        InferenceGuard::new(ModelState::new(classifier))
    }

    #[rstest]
    fn set_mode_returns_previous(guard: InferenceGuard) {
        let previous = guard.with_exclusive_access(|state| {
            let first = state.set_mode(Mode::Train);
            let second = state.set_mode(Mode::Eval);
            Ok::<_, GuardError>((first, second))
        });
        assert_eq!(previous, Ok((Mode::Eval, Mode::Train)));
    }

    #[rstest]
    fn error_inside_closure_releases_lock(guard: InferenceGuard) {
        let failed: Result<(), GuardError> =
            guard.with_exclusive_access(|_| Err(GuardError::Poisoned));
        assert!(failed.is_err());
        let mode = guard.with_exclusive_access(|state| Ok::<_, GuardError>(state.mode()));
        assert_eq!(mode, Ok(Mode::Eval));
    }

    #[rstest]
    fn panic_inside_closure_poisons_guard(guard: InferenceGuard) {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let _: Result<(), GuardError> = guard.with_exclusive_access(|state| {
                state.set_mode(Mode::Train);
                panic!("simulated failure mid-update");
            });
        }));
        assert!(outcome.is_err());
        let after = guard.with_exclusive_access(|state| Ok::<_, GuardError>(state.mode()));
        assert_eq!(after, Err(GuardError::Poisoned));
    }
}
