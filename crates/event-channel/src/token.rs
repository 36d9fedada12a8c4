//! Scoped unsubscription.

use std::fmt;

type Action = Box<dyn FnOnce() + Send>;

/// Unsubscribes its subscription when dropped.
///
/// A token runs its action at most once: on [`Token::release`] or on drop,
/// whichever comes first. It cannot be cloned. `std::mem::take` leaves an
/// empty token behind whose drop does nothing.
#[must_use = "dropping a Token unsubscribes immediately"]
#[derive(Default)]
pub struct Token {
    action: Option<Action>,
}

impl Token {
    /// Creates a token that runs `action` once.
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            action: Some(Box::new(action)),
        }
    }

    /// Runs the action now.
    pub fn release(mut self) {
        self.fire();
    }

    /// Discards the action without running it, keeping the subscription.
    pub fn detach(mut self) {
        self.action = None;
    }

    /// Returns true if the action has not run yet.
    pub fn is_armed(&self) -> bool {
        self.action.is_some()
    }

    fn fire(&mut self) {
        if let Some(action) = self.action.take() {
            action();
        }
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        self.fire();
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("armed", &self.is_armed())
            .finish()
    }
}
