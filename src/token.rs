use std::sync::atomic::{AtomicBool, Ordering};

/// A cancellation token shared between a controller and workers.
///
/// Workers poll [`is_set`](Token::is_set) at convenient boundaries and wind
/// down early when it fires, returning whatever partial result they hold.
#[derive(Debug, Default)]
pub struct Token(AtomicBool);

impl Token {
    /// Construct a new token in the unset state.
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Fire the token.
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Test if the token has fired.
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
