//! Subscription types for project events.

use serde::{Deserialize, Serialize};

/// Configuration for a subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping subscriber.
    /// Default: 1024
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: SubscriptionFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            filter: SubscriptionFilter::default(),
        }
    }
}

impl SubscriptionConfig {
    pub fn with_filter(filter: SubscriptionFilter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }
}

/// Filter criteria for subscriptions.
#[derive(Clone, Debug, Default)]
pub struct SubscriptionFilter {
    /// Include document change events.
    pub include_changes: bool,

    /// Only report changes that touched undo-tracked data.
    pub undoable_only: bool,

    /// Include open/save/create events.
    pub include_lifecycle: bool,
}

impl SubscriptionFilter {
    /// Subscribe to document changes.
    pub fn changes() -> Self {
        Self {
            include_changes: true,
            ..Default::default()
        }
    }

    /// Subscribe to changes of undo-tracked data only.
    pub fn undoable_changes() -> Self {
        Self {
            include_changes: true,
            undoable_only: true,
            ..Default::default()
        }
    }

    /// Subscribe to open/save/create events.
    pub fn lifecycle() -> Self {
        Self {
            include_lifecycle: true,
            ..Default::default()
        }
    }

    /// Subscribe to everything.
    pub fn all() -> Self {
        Self {
            include_changes: true,
            undoable_only: false,
            include_lifecycle: true,
        }
    }

    pub(crate) fn matches(&self, event: &ProjectEvent) -> bool {
        match event {
            ProjectEvent::Changed { undoable, .. } => {
                self.include_changes && (*undoable || !self.undoable_only)
            }
            ProjectEvent::Opened { .. }
            | ProjectEvent::Saved { .. }
            | ProjectEvent::Created { .. } => self.include_lifecycle,
            ProjectEvent::Dropped { .. } => true,
        }
    }
}

/// Events emitted by a project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProjectEvent {
    /// The document was mutated.
    Changed {
        /// Document revision after the change.
        revision: u64,
        /// Whether undo-tracked data changed.
        undoable: bool,
    },

    /// A project was loaded from a directory.
    Opened {
        directory: String,
    },

    /// A save pass completed.
    Saved {
        directory: String,
        /// Revision the written manifest reflects.
        revision: u64,
    },

    /// The document was reset to a new project.
    Created {
        /// Local directory the new project is bound to, if any.
        directory: Option<String>,
    },

    /// Subscription was dropped.
    Dropped {
        reason: DropReason,
    },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Handle to manage a subscription.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<ProjectEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<ProjectEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<ProjectEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<ProjectEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
