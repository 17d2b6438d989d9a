//! Debounced autosave.
//!
//! - [`Debounce`] collapses bursts of changes into one deadline.
//! - [`SaveCoalescer`] keeps saves from overlapping and folds requests that
//!   arrive mid-save into a single trailing pass.
//! - [`Autosave`] is the worker thread that drives both from change events.

mod coalescer;
mod debounce;
mod worker;

pub use coalescer::{Admission, SaveCoalescer, SaveState};
pub use debounce::Debounce;
pub use worker::Autosave;
