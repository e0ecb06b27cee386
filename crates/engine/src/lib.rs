//! The presence feed: provider selection over the relay and streaming
//! clients, and the track transition sequencer display consumers follow.

pub mod feed;
pub mod sequencer;

pub use feed::{FeedServices, PresenceFeed};
pub use sequencer::{
    run_sequencer, DisplayState, Phase, SequencerConfig, TransitionSequencer,
};
