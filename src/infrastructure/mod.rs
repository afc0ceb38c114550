//! Scheduling primitives shared by the session layer.
pub mod timer;

pub use timer::Timer;
