use serde::{Deserialize, Serialize};
use std::fmt;

/// The sign of an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sign {
    Plus,
    Minus,
    NoSign,
}

impl Sign {
    /// Test if the sign is absent.
    pub fn is_none(&self) -> bool {
        matches!(self, Sign::NoSign)
    }
}

impl Default for Sign {
    fn default() -> Self {
        Sign::NoSign
    }
}

impl fmt::Display for Sign {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sign::Plus => "+".fmt(fmt),
            Sign::Minus => "-".fmt(fmt),
            Sign::NoSign => Ok(()),
        }
    }
}
