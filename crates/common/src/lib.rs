//! Error context helpers and the injectable clock shared by the pipebridge crates.

pub mod clock;
pub mod error;

pub use {
    clock::{Clock, ManualClock, SharedClock, SystemClock, unix_now},
    error::{FromMessage, with_cause},
};
