//! UI state container with generation-token writes.
//!
//! Every upload takes a ticket when it starts. Only the holder of the most
//! recently issued ticket may write a label or error, so a slow upload that
//! finishes after a newer one can never overwrite the newer result.

use emolens_core::{EmotionLabel, Preview};
use serde::Serialize;
use tokio::sync::watch;

/// What the user sees: the uploaded image and the predicted emotion.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UiState {
    /// Generation of the most recent upload (0 before the first).
    pub generation: u64,
    pub preview: Option<Preview>,
    pub label: Option<EmotionLabel>,
    /// Failure of the most recent upload, if it failed.
    pub error: Option<String>,
}

/// Generation token for one upload sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.0
    }
}

/// Single-writer store for [`UiState`].
pub struct StateStore {
    tx: watch::Sender<UiState>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(UiState::default());
        Self { tx }
    }

    /// Issue a new ticket and show the preview immediately.
    ///
    /// The label is left as is until this upload completes.
    pub fn begin(&self, preview: Preview) -> Ticket {
        let mut generation = 0;
        self.tx.send_modify(|state| {
            state.generation += 1;
            state.preview = Some(preview);
            state.error = None;
            generation = state.generation;
        });
        Ticket(generation)
    }

    /// Show `label` if `ticket` is still current. Returns whether it was applied.
    pub fn complete(&self, ticket: Ticket, label: EmotionLabel) -> bool {
        self.tx.send_if_modified(|state| {
            if state.generation != ticket.0 {
                return false;
            }
            state.label = Some(label);
            state.error = None;
            true
        })
    }

    /// Record a failure for `ticket` if it is still current. The label is kept.
    pub fn fail(&self, ticket: Ticket, message: String) -> bool {
        self.tx.send_if_modified(|state| {
            if state.generation != ticket.0 {
                return false;
            }
            state.error = Some(message);
            true
        })
    }

    pub fn snapshot(&self) -> UiState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<UiState> {
        self.tx.subscribe()
    }
}
