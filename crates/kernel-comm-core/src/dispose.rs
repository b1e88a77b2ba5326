//! One-shot teardown callbacks.

use std::fmt;

/// A teardown callback that runs at most once.
///
/// Running consumes the value, so a second invocation cannot be expressed.
/// Dropping an unrun teardown discards it without calling it.
#[derive(Default)]
pub struct Teardown(Option<Box<dyn FnOnce() + Send>>);

impl Teardown {
    /// Wrap a teardown callback.
    #[must_use]
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// A teardown that does nothing.
    #[must_use]
    pub const fn noop() -> Self {
        Self(None)
    }

    /// Run the callback.
    pub fn run(self) {
        if let Some(f) = self.0 {
            f();
        }
    }
}

impl fmt::Debug for Teardown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Teardown")
            .field(&if self.0.is_some() { "set" } else { "noop" })
            .finish()
    }
}
