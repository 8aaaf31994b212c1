//! Core data types shared by the chunker, chunk pipeline, orchestrator,
//! task store, and event bus.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transcript / Chunk
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptMeta {
    pub title: Option<String>,
    pub speaker: Option<String>,
    pub source_url: Option<String>,
}

/// A dense-numbered, size-bounded slice of the transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: u32,
    pub text: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ShadowArtifact
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An ordered pair of (original token/phrase, imitation token/phrase).
pub type WordPair = (String, String);

/// The structured output of one chunk, once it has passed (or been
/// corrected to pass) quality. `map` keys are category labels the LLM
/// invents itself — never a closed set, so this stays an open mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowArtifact {
    pub original: String,
    pub imitation: String,
    pub map: BTreeMap<String, WordPair>,
    pub paragraph: String,
    pub quality_score: f64,
}

impl ShadowArtifact {
    pub fn imitation_word_count(&self) -> usize {
        self.imitation.split_whitespace().count()
    }

    /// Structural invariants checked at the validate stage (§4.5): both
    /// sentences present, at least one map entry, each entry non-empty.
    pub fn is_structurally_valid(&self, min_words: usize, min_map_entries: usize) -> bool {
        !self.original.trim().is_empty()
            && !self.imitation.trim().is_empty()
            && self.imitation_word_count() >= min_words
            && self.map.len() >= min_map_entries
            && self
                .map
                .values()
                .all(|(a, b)| !a.trim().is_empty() && !b.trim().is_empty())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// QualityVerdict
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityDimensions {
    pub grammar: f64,
    pub content: f64,
    pub logic: f64,
    pub topic: f64,
    pub learning: f64,
}

impl QualityDimensions {
    pub fn total(&self) -> f64 {
        self.grammar + self.content + self.logic + self.topic + self.learning
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityVerdict {
    pub dimensions: QualityDimensions,
    pub issues: Vec<String>,
    /// The rubric's own `pass` field, advisory only — code enforces the
    /// actual rule below rather than trusting the LLM's self-assessment.
    pub llm_pass: bool,
}

impl QualityVerdict {
    pub fn total(&self) -> f64 {
        self.dimensions.total()
    }

    /// Pass iff `total >= 9 AND logic >= 2` (hard logic veto); the LLM's
    /// own `pass` field never overrides this.
    pub fn passes(&self) -> bool {
        self.total() >= 9.0 && self.dimensions.logic >= 2.0
    }

    pub fn logic_veto(&self) -> bool {
        self.dimensions.logic < 2.0
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ChunkState
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-chunk finite-state machine state (§4.5). Transitions only forward.
#[derive(Debug, Clone)]
pub enum ChunkState {
    Pending,
    Generated(ShadowArtifact),
    Validated(ShadowArtifact),
    Scored(ShadowArtifact, QualityVerdict),
    Corrected(ShadowArtifact),
    Finalized(ShadowArtifact),
    Failed(String),
}

impl ChunkState {
    pub fn label(&self) -> &'static str {
        match self {
            ChunkState::Pending => "pending",
            ChunkState::Generated(_) => "generated",
            ChunkState::Validated(_) => "validated",
            ChunkState::Scored(..) => "scored",
            ChunkState::Corrected(_) => "corrected",
            ChunkState::Finalized(_) => "finalized",
            ChunkState::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ChunkState::Finalized(_) | ChunkState::Failed(_))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Parsing,
    Chunking,
    Processing,
    QualityCheck,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Parsing => "parsing",
            TaskStatus::Chunking => "chunking",
            TaskStatus::Processing => "processing",
            TaskStatus::QualityCheck => "quality_check",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => TaskStatus::Pending,
            "parsing" => TaskStatus::Parsing,
            "chunking" => TaskStatus::Chunking,
            "processing" => TaskStatus::Processing,
            "quality_check" => TaskStatus::QualityCheck,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            other => {
                return Err(crate::error::Error::Other(format!(
                    "unknown task status {other}"
                )))
            }
        })
    }
}

/// Pure function of `(status, completed_chunks, total_chunks)` → 0..=100
/// per §4.7's progress table.
pub fn compute_progress(status: TaskStatus, completed_chunks: u32, total_chunks: u32) -> u8 {
    match status {
        TaskStatus::Pending => 0,
        TaskStatus::Parsing => 10,
        TaskStatus::Chunking => 20,
        TaskStatus::Processing => {
            if total_chunks == 0 {
                20
            } else {
                let frac = completed_chunks as f64 / total_chunks as f64;
                (20.0 + 60.0 * frac).round() as u8
            }
        }
        TaskStatus::QualityCheck => 80,
        TaskStatus::Completed | TaskStatus::Failed => 100,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub current_step: String,
    pub total_chunks: u32,
    pub completed_chunks: u32,
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Task {
    pub fn new(id: String) -> Self {
        let now = chrono::Utc::now();
        Self {
            id,
            status: TaskStatus::Pending,
            current_step: "waiting to start".into(),
            total_chunks: 0,
            completed_chunks: 0,
            progress: 0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Connected,
    Started,
    SemanticChunksCompleted,
    ChunksProcessingStarted,
    ChunkCompleted,
    ChunkingCompleted,
    Progress,
    UrlCompleted,
    Completed,
    Failed,
    Error,
    Heartbeat,
}

impl EventType {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::Completed | EventType::Failed)
    }
}

/// A single progress notification published on a task's bounded queue.
/// `id` is assigned by the bus as `"<task_id>_<unix_millis>"` if the
/// producer did not set one (§4.8); string comparison on `id` is a valid
/// total order because the suffix is a fixed-width millisecond count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_pure_function_of_status_and_counts() {
        assert_eq!(compute_progress(TaskStatus::Pending, 0, 0), 0);
        assert_eq!(compute_progress(TaskStatus::Parsing, 0, 0), 10);
        assert_eq!(compute_progress(TaskStatus::Chunking, 0, 10), 20);
        assert_eq!(compute_progress(TaskStatus::Processing, 0, 10), 20);
        assert_eq!(compute_progress(TaskStatus::Processing, 5, 10), 50);
        assert_eq!(compute_progress(TaskStatus::Processing, 10, 10), 80);
        assert_eq!(compute_progress(TaskStatus::QualityCheck, 10, 10), 80);
        assert_eq!(compute_progress(TaskStatus::Completed, 10, 10), 100);
        assert_eq!(compute_progress(TaskStatus::Failed, 3, 10), 100);
    }

    #[test]
    fn processing_with_zero_total_does_not_divide_by_zero() {
        assert_eq!(compute_progress(TaskStatus::Processing, 0, 0), 20);
    }

    #[test]
    fn quality_veto_blocks_pass_regardless_of_total() {
        let verdict = QualityVerdict {
            dimensions: QualityDimensions {
                grammar: 3.0,
                content: 2.0,
                logic: 1.0,
                topic: 2.0,
                learning: 1.0,
            },
            issues: vec![],
            llm_pass: true,
        };
        assert_eq!(verdict.total(), 9.0);
        assert!(!verdict.passes(), "logic < 2 must veto regardless of total");
        assert!(verdict.logic_veto());
    }

    #[test]
    fn quality_passes_requires_total_and_logic_floor() {
        let verdict = QualityVerdict {
            dimensions: QualityDimensions {
                grammar: 3.0,
                content: 2.0,
                logic: 2.0,
                topic: 2.0,
                learning: 0.0,
            },
            issues: vec![],
            llm_pass: false,
        };
        assert_eq!(verdict.total(), 9.0);
        assert!(verdict.passes());
    }

    #[test]
    fn artifact_rejects_short_imitation_or_empty_map() {
        let mut map = BTreeMap::new();
        map.insert("color".to_string(), ("red".to_string(), "blue".to_string()));
        let artifact = ShadowArtifact {
            original: "a sentence with enough words to pass the floor easily".into(),
            imitation: "too short".into(),
            map,
            paragraph: String::new(),
            quality_score: 0.0,
        };
        assert!(!artifact.is_structurally_valid(8, 2));
    }
}
