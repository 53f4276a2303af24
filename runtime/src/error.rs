use std::fmt;

/// Errors raised while executing a lowered program's reference effects.
/// Every variant indicates a compiler bug: a well-formed effect schedule
/// never retains null, releases a dead cell, or stores a non-pointer into
/// a reference slot.
#[derive(Debug)]
pub enum RuntimeError {
    UnknownSlot(String),
    NullRetain(String),
    NullRelease(String),
    DeadCell(String),
    InvalidStore(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::UnknownSlot(place) => {
                write!(f, "no reference slot registered at {}", place)
            }
            RuntimeError::NullRetain(place) => {
                write!(f, "retain of a null reference at {}", place)
            }
            RuntimeError::NullRelease(place) => {
                write!(f, "release of a null reference at {}", place)
            }
            RuntimeError::DeadCell(place) => {
                write!(f, "use of an already-released cell through {}", place)
            }
            RuntimeError::InvalidStore(place) => {
                write!(f, "non-pointer store into reference slot {}", place)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}
