use crate::model::PresenceFeedState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Owner of the shared `PresenceFeedState`.
///
/// Every client writes through a [`FeedWriter`] stamped with the generation it
/// was created under. `invalidate` bumps the generation inside the watch write
/// lock, so a writer from a torn-down client can never land an update after
/// the reset.
pub struct FeedBoard {
    tx: Arc<watch::Sender<PresenceFeedState>>,
    generation: Arc<AtomicU64>,
}

impl FeedBoard {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PresenceFeedState::disconnected());
        Self {
            tx: Arc::new(tx),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PresenceFeedState> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> PresenceFeedState {
        self.tx.borrow().clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn writer(&self) -> FeedWriter {
        FeedWriter {
            tx: Arc::clone(&self.tx),
            live: Arc::clone(&self.generation),
            generation: self.generation(),
        }
    }

    /// Revokes every outstanding writer and installs `reset` as the new state.
    pub fn invalidate(&self, reset: PresenceFeedState) {
        self.tx.send_modify(|state| {
            self.generation.fetch_add(1, Ordering::SeqCst);
            *state = reset;
        });
    }
}

impl Default for FeedBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct FeedWriter {
    tx: Arc<watch::Sender<PresenceFeedState>>,
    live: Arc<AtomicU64>,
    generation: u64,
}

impl FeedWriter {
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst) == self.generation
    }

    /// Applies `f` atomically. Returns false when this writer was revoked.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut PresenceFeedState),
    {
        let mut applied = false;
        self.tx.send_if_modified(|state| {
            if self.live.load(Ordering::SeqCst) != self.generation {
                return false;
            }
            let before = state.clone();
            f(state);
            applied = true;
            *state != before
        });
        applied
    }

    pub fn snapshot(&self) -> PresenceFeedState {
        self.tx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::FeedBoard;
    use crate::model::{ConnectionStatus, PresenceFeedState};

    #[test]
    fn revoked_writer_cannot_overwrite() {
        let board = FeedBoard::new();
        let old = board.writer();
        assert!(old.update(|s| s.connection_status = ConnectionStatus::Connected));

        board.invalidate(PresenceFeedState::connecting());
        let fresh = board.writer();

        assert!(!old.is_live());
        assert!(!old.update(|s| s.last_error = Some("late".to_string())));
        assert_eq!(board.snapshot().last_error, None);
        assert_eq!(board.snapshot().connection_status, ConnectionStatus::Connecting);

        assert!(fresh.update(|s| s.connection_status = ConnectionStatus::Connected));
        assert_eq!(board.snapshot().connection_status, ConnectionStatus::Connected);
    }

    #[test]
    fn unchanged_state_does_not_notify() {
        let board = FeedBoard::new();
        let mut rx = board.subscribe();
        rx.borrow_and_update();
        let writer = board.writer();

        assert!(writer.update(|_| {}));
        assert!(!rx.has_changed().unwrap());

        writer.update(|s| s.is_playing = true);
        assert!(rx.has_changed().unwrap());
    }
}
