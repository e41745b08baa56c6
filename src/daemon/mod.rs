//! The daemon's single-threaded cooperative tick loop.

mod paceloop;

pub use paceloop::Paceloop;
