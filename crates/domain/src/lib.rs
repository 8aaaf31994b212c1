pub mod cancel;
pub mod config;
pub mod error;
pub mod model;
pub mod trace;

pub use cancel::CancelToken;
pub use config::Config;
pub use error::{Error, Result};
pub use model::{
    Chunk, ChunkState, Event, EventType, QualityDimensions, QualityVerdict, ShadowArtifact, Task,
    TaskStatus, TranscriptMeta, WordPair,
};
pub use trace::TraceEvent;
