pub mod chunk_pipeline;
pub mod chunker;
pub mod orchestrator;

pub use chunk_pipeline::process_chunk;
pub use chunker::{chunk_transcript, split_sentences};
pub use orchestrator::{run, OrchestratorResult, ProgressSink};
