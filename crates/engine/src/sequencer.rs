use cobalt_core::{NowPlayingTrack, PresenceFeedState, TransitionConfig};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Exiting,
    Entering,
}

/// What display consumers render: the track on screen and how to animate it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayState {
    pub phase: Phase,
    pub track: Option<NowPlayingTrack>,
    pub is_playing: bool,
}

impl Default for DisplayState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            track: None,
            is_playing: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SequencerConfig {
    pub exit: Duration,
    pub enter: Duration,
}

impl SequencerConfig {
    pub fn from_transition_config(cfg: &TransitionConfig) -> Self {
        Self {
            exit: Duration::from_millis(cfg.exit_ms),
            enter: Duration::from_millis(cfg.enter_ms),
        }
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self::from_transition_config(&TransitionConfig::default())
    }
}

/// Identity used for change detection: "nothing" differs from a track with
/// an unknown id.
fn identity(track: Option<&NowPlayingTrack>) -> Option<Option<&str>> {
    track.map(|t| t.track_id.as_deref())
}

/// Idle -> Exiting -> Entering -> Idle, driven by a single deadline.
///
/// A newer update during a transition replaces the pending target and
/// re-arms the deadline, so a stale swap can never fire.
pub struct TransitionSequencer {
    cfg: SequencerConfig,
    display: DisplayState,
    pending: Option<NowPlayingTrack>,
    deadline: Option<Instant>,
}

impl TransitionSequencer {
    pub fn new(cfg: SequencerConfig) -> Self {
        Self {
            cfg,
            display: DisplayState::default(),
            pending: None,
            deadline: None,
        }
    }

    pub fn display(&self) -> &DisplayState {
        &self.display
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn on_update(&mut self, state: &PresenceFeedState, now: Instant) {
        self.display.is_playing = state.is_playing;
        let incoming = state.current.as_ref();
        let shown = identity(self.display.track.as_ref());
        let arriving = identity(incoming);

        if self.display.phase == Phase::Exiting {
            if arriving == identity(self.pending.as_ref()) {
                // Progress refresh of the track already queued.
                if let (Some(pending), Some(incoming)) = (self.pending.as_mut(), incoming) {
                    pending.merge_timestamps(incoming);
                }
                return;
            }
            if arriving == shown {
                debug!("transition target reverted; bringing the current track back");
                self.pending = None;
                if let (Some(track), Some(incoming)) = (self.display.track.as_mut(), incoming) {
                    track.merge_timestamps(incoming);
                }
                self.enter(now);
                return;
            }
            self.exit_towards(incoming.cloned(), now);
            return;
        }

        if arriving == shown {
            if let (Some(track), Some(incoming)) = (self.display.track.as_mut(), incoming) {
                track.merge_timestamps(incoming);
            }
            return;
        }

        if self.display.track.is_none() {
            // Cold start: nothing to animate out.
            self.display.track = incoming.cloned();
            self.display.phase = Phase::Idle;
            self.pending = None;
            self.deadline = None;
            return;
        }

        self.exit_towards(incoming.cloned(), now);
    }

    /// Fires every transition step whose deadline has passed. Returns whether
    /// the display changed.
    pub fn advance(&mut self, now: Instant) -> bool {
        let mut changed = false;
        while let Some(due) = self.deadline.filter(|due| *due <= now) {
            match self.display.phase {
                Phase::Exiting => {
                    self.display.track = self.pending.take();
                    self.display.phase = Phase::Entering;
                    self.deadline = Some(due + self.cfg.enter);
                }
                Phase::Entering => {
                    self.display.phase = Phase::Idle;
                    self.deadline = None;
                }
                Phase::Idle => self.deadline = None,
            }
            changed = true;
        }
        changed
    }

    fn exit_towards(&mut self, target: Option<NowPlayingTrack>, now: Instant) {
        self.pending = target;
        self.display.phase = Phase::Exiting;
        self.deadline = Some(now + self.cfg.exit);
    }

    fn enter(&mut self, now: Instant) {
        self.display.phase = Phase::Entering;
        self.deadline = Some(now + self.cfg.enter);
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

fn publish(tx: &watch::Sender<DisplayState>, display: &DisplayState) {
    tx.send_if_modified(|current| {
        if current == display {
            return false;
        }
        *current = display.clone();
        true
    });
}

/// Feeds presence updates into a sequencer and publishes its display state.
pub async fn run_sequencer(
    mut feed: watch::Receiver<PresenceFeedState>,
    tx: watch::Sender<DisplayState>,
    cfg: SequencerConfig,
    cancel: CancellationToken,
) {
    let mut seq = TransitionSequencer::new(cfg);
    let initial = feed.borrow_and_update().clone();
    seq.on_update(&initial, Instant::now());
    publish(&tx, seq.display());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = feed.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = feed.borrow_and_update().clone();
                seq.on_update(&state, Instant::now());
            }
            _ = sleep_until_deadline(seq.deadline()) => {
                seq.advance(Instant::now());
            }
        }
        publish(&tx, seq.display());
    }
}

#[cfg(test)]
mod tests {
    use super::{run_sequencer, DisplayState, Phase, SequencerConfig, TransitionSequencer};
    use cobalt_core::{FeedBoard, NowPlayingTrack, PresenceFeedState};
    use std::time::Duration;
    use tokio::sync::watch;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn track(id: &str, start: i64) -> NowPlayingTrack {
        NowPlayingTrack {
            track_id: Some(id.to_string()),
            title: format!("song {id}"),
            start_timestamp_ms: start,
            end_timestamp_ms: start + 180_000,
            ..Default::default()
        }
    }

    fn playing(t: NowPlayingTrack) -> PresenceFeedState {
        let mut state = PresenceFeedState::connecting();
        state.set_playback(Some(t), true);
        state
    }

    fn shown_id(seq: &TransitionSequencer) -> Option<&str> {
        seq.display().track.as_ref().and_then(|t| t.track_id.as_deref())
    }

    #[test]
    fn cold_start_displays_immediately() {
        let mut seq = TransitionSequencer::new(SequencerConfig::default());
        seq.on_update(&playing(track("A", 0)), Instant::now());

        assert_eq!(seq.display().phase, Phase::Idle);
        assert_eq!(shown_id(&seq), Some("A"));
        assert!(seq.deadline().is_none());
    }

    #[test]
    fn same_track_only_merges_timestamps() {
        let t0 = Instant::now();
        let mut seq = TransitionSequencer::new(SequencerConfig::default());
        seq.on_update(&playing(track("A", 0)), t0);

        let mut refreshed = track("A", 5_000);
        refreshed.title = "ignored".to_string();
        seq.on_update(&playing(refreshed), t0 + ms(2_000));

        let shown = seq.display().track.as_ref().unwrap();
        assert_eq!(seq.display().phase, Phase::Idle);
        assert_eq!(shown.start_timestamp_ms, 5_000);
        assert_eq!(shown.end_timestamp_ms, 185_000);
        assert_eq!(shown.title, "song A");
        assert!(seq.deadline().is_none());
    }

    #[test]
    fn track_change_exits_then_enters() {
        let t0 = Instant::now();
        let mut seq = TransitionSequencer::new(SequencerConfig::default());
        seq.on_update(&playing(track("A", 0)), t0);

        let t1 = t0 + ms(700);
        seq.on_update(&playing(track("B", 700)), t1);
        assert_eq!(seq.display().phase, Phase::Exiting);
        assert_eq!(shown_id(&seq), Some("A"));

        assert!(!seq.advance(t1 + ms(599)));
        assert!(seq.advance(t1 + ms(600)));
        assert_eq!(seq.display().phase, Phase::Entering);
        assert_eq!(shown_id(&seq), Some("B"));

        assert!(seq.advance(t1 + ms(1_200)));
        assert_eq!(seq.display().phase, Phase::Idle);
        assert_eq!(shown_id(&seq), Some("B"));
    }

    #[test]
    fn newer_update_mid_exit_replaces_target() {
        let t0 = Instant::now();
        let mut seq = TransitionSequencer::new(SequencerConfig::default());
        seq.on_update(&playing(track("A", 0)), t0);
        seq.on_update(&playing(track("B", 0)), t0 + ms(100));
        seq.on_update(&playing(track("C", 0)), t0 + ms(400));

        // B's swap would have fired at 700ms; the deadline moved to 1000ms.
        assert!(!seq.advance(t0 + ms(700)));
        assert_eq!(shown_id(&seq), Some("A"));
        seq.advance(t0 + ms(1_000));
        assert_eq!(shown_id(&seq), Some("C"));
    }

    #[test]
    fn pending_refresh_does_not_restart_exit() {
        let t0 = Instant::now();
        let mut seq = TransitionSequencer::new(SequencerConfig::default());
        seq.on_update(&playing(track("A", 0)), t0);
        seq.on_update(&playing(track("B", 0)), t0 + ms(100));
        seq.on_update(&playing(track("B", 50)), t0 + ms(500));

        assert!(seq.advance(t0 + ms(700)));
        assert_eq!(seq.display().track.as_ref().unwrap().start_timestamp_ms, 50);
    }

    #[test]
    fn reverting_to_shown_track_cancels_swap() {
        let t0 = Instant::now();
        let mut seq = TransitionSequencer::new(SequencerConfig::default());
        seq.on_update(&playing(track("A", 0)), t0);
        seq.on_update(&playing(track("B", 0)), t0 + ms(100));
        seq.on_update(&playing(track("A", 10)), t0 + ms(300));

        assert_eq!(seq.display().phase, Phase::Entering);
        seq.advance(t0 + ms(2_000));
        assert_eq!(seq.display().phase, Phase::Idle);
        assert_eq!(shown_id(&seq), Some("A"));
    }

    #[test]
    fn stopping_playback_animates_out() {
        let t0 = Instant::now();
        let mut seq = TransitionSequencer::new(SequencerConfig::default());
        seq.on_update(&playing(track("A", 0)), t0);
        seq.on_update(&PresenceFeedState::connecting(), t0 + ms(100));

        assert_eq!(seq.display().phase, Phase::Exiting);
        assert!(!seq.display().is_playing);
        assert_eq!(shown_id(&seq), Some("A"));

        seq.advance(t0 + ms(700));
        assert!(seq.display().track.is_none());
        assert_eq!(seq.display().phase, Phase::Entering);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_follows_feed_timeline() {
        let board = FeedBoard::new();
        let writer = board.writer();
        let (tx, mut rx) = watch::channel(DisplayState::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_sequencer(
            board.subscribe(),
            tx,
            SequencerConfig::default(),
            cancel.clone(),
        ));

        writer.update(|s| s.set_playback(Some(track("A", 0)), true));
        tokio::time::sleep(ms(700)).await;
        assert_eq!(rx.borrow_and_update().track.as_ref().unwrap().track_id.as_deref(), Some("A"));

        writer.update(|s| s.set_playback(Some(track("B", 0)), true));
        tokio::time::sleep(ms(10)).await;
        assert_eq!(rx.borrow().phase, Phase::Exiting);

        tokio::time::sleep(ms(600)).await;
        {
            let display = rx.borrow();
            assert_eq!(display.phase, Phase::Entering);
            assert_eq!(display.track.as_ref().unwrap().track_id.as_deref(), Some("B"));
        }

        tokio::time::sleep(ms(600)).await;
        assert_eq!(rx.borrow().phase, Phase::Idle);

        cancel.cancel();
        task.await.unwrap();
    }
}
