//! Bounded linear undo/redo.
//!
//! [`History`] keeps the last committed snapshot plus a bounded stack of
//! older ones. Committing discards the redo branch. Once the undo stack
//! exceeds its capacity the oldest entry is evicted.

use crate::document::{CaptureShot, Document, Koma, Marker};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::debug;

/// The undo-tracked projection of a [`Document`].
///
/// Session state such as camera configs and the viewport is deliberately
/// left out.
#[derive(Clone, Debug, PartialEq)]
pub struct UndoableData {
    pub capture_shot: CaptureShot,
    pub komas: Vec<Koma>,
    pub markers: Vec<Marker>,
    pub drawing: Option<Value>,
}

impl UndoableData {
    pub fn capture(document: &Document) -> Self {
        Self {
            capture_shot: document.capture_shot,
            komas: document.komas.clone(),
            markers: document.markers.clone(),
            drawing: document.timeline.drawing.clone(),
        }
    }

    /// Write the projection back into `document`.
    pub fn apply_to(self, document: &mut Document) {
        document.capture_shot = self.capture_shot;
        document.komas = self.komas;
        document.markers = self.markers;
        document.timeline.drawing = self.drawing;
        document.clamp_preview_range();
    }
}

pub struct History<T> {
    capacity: usize,
    /// Snapshot matching the current state.
    last: T,
    undo_stack: VecDeque<T>,
    redo_stack: Vec<T>,
    paused: bool,
}

impl<T: Clone> History<T> {
    pub fn new(capacity: usize, current: T) -> Self {
        Self {
            capacity,
            last: current,
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            paused: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Push `current` as a new entry, discarding the redo branch.
    pub fn commit(&mut self, current: T) {
        let previous = std::mem::replace(&mut self.last, current);
        self.undo_stack.push_back(previous);
        while self.undo_stack.len() > self.capacity {
            self.undo_stack.pop_front();
        }
        self.redo_stack.clear();
    }

    /// Like [`commit`](Self::commit), but ignored while paused.
    pub fn record(&mut self, current: T) -> bool {
        if self.paused {
            debug!("history paused, change not recorded");
            return false;
        }
        self.commit(current);
        true
    }

    /// Step back. Returns the snapshot to apply, or `None` at the boundary.
    pub fn undo(&mut self) -> Option<T> {
        let state = self.undo_stack.pop_back()?;
        let current = std::mem::replace(&mut self.last, state.clone());
        self.redo_stack.push(current);
        Some(state)
    }

    /// Step forward. Returns the snapshot to apply, or `None` at the boundary.
    pub fn redo(&mut self) -> Option<T> {
        let state = self.redo_stack.pop()?;
        let current = std::mem::replace(&mut self.last, state.clone());
        self.undo_stack.push_back(current);
        Some(state)
    }

    /// Drop every entry; `current` becomes the only state.
    pub fn clear(&mut self, current: T) {
        self.last = current;
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn last(&self) -> &T {
        &self.last
    }
}
