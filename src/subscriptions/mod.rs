//! Subscription system for live project updates.
//!
//! This module provides in-process subscriptions to project events:
//! - Document changes, tagged with whether undo-tracked data changed
//! - Open, save and create lifecycle events
//!
//! Subscriptions use bounded buffers; a subscriber that falls behind is
//! dropped rather than blocking the project.
//!
//! # Example
//!
//! ```ignore
//! let handle = project.subscribe(SubscriptionFilter::changes());
//!
//! loop {
//!     match handle.recv() {
//!         Ok(ProjectEvent::Changed { revision, .. }) => println!("now at {revision}"),
//!         Ok(ProjectEvent::Dropped { .. }) | Err(_) => break,
//!         Ok(_) => {}
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    DropReason, ProjectEvent, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId,
};
