#![forbid(unsafe_code)]

//! Error types shared by the core primitives.

use std::fmt;

/// A caller passed a value outside the range an operation accepts.
///
/// This is a programmer error. Constructors that validate their input return
/// it so the mistake surfaces at the boundary instead of deep inside the
/// algebra.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidArgument {
    /// Name of the offending argument.
    pub name: &'static str,
    /// The rejected value.
    pub value: u64,
    /// What the argument must satisfy.
    pub expected: &'static str,
}

impl InvalidArgument {
    pub(crate) const fn new(name: &'static str, value: u64, expected: &'static str) -> Self {
        Self {
            name,
            value,
            expected,
        }
    }
}

impl fmt::Display for InvalidArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid argument {}={} (expected {})",
            self.name, self.value, self.expected
        )
    }
}

impl std::error::Error for InvalidArgument {}
