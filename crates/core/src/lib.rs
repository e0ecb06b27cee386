pub mod config;
pub mod error;
pub mod feed;
pub mod model;
pub mod urls;

pub use config::{
    AppConfig, ConfigIntervals, FeedConfig, FeedKey, RelayConfig, StreamingConfig,
    TransitionConfig,
};
pub use error::FeedError;
pub use feed::{FeedBoard, FeedWriter};
pub use model::{
    join_artists, now_ms, ConnectionMode, ConnectionStatus, CredentialStore, MusicProvider, NowPlayingTrack,
    PresenceFeedState, TokenUpdate,
};
