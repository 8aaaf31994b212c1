//! Chunk Pipeline (C5): the per-chunk FSM — generate → validate → quality
//! → (correction | pass-through) → finalize (§4.5).

use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use sw_domain::cancel::CancelToken;
use sw_domain::error::{Error, Result};
use sw_domain::model::{Chunk, ChunkState, QualityDimensions, QualityVerdict, ShadowArtifact, WordPair};
use sw_domain::trace::TraceEvent;
use sw_providers::LlmClient;

/// Poll interval for racing an in-flight LLM call against cancellation
/// (§5: "in-flight HTTP is aborted"). Dropping `fut` on the losing branch
/// drops the underlying request.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

async fn cancellable<T>(cancel: &CancelToken, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::pin!(fut);
    loop {
        tokio::select! {
            res = &mut fut => return res,
            _ = tokio::time::sleep(CANCEL_POLL_INTERVAL) => {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
            }
        }
    }
}

const MIN_WORDS: usize = 8;
const VALIDATE_MIN_MAP_ENTRIES: usize = 1;
const CORRECTION_MIN_MAP_ENTRIES: usize = 2;

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    original: String,
    imitation: String,
    map: BTreeMap<String, WordPair>,
}

#[derive(Debug, Deserialize)]
struct QualityResponse {
    grammar: f64,
    content: f64,
    logic: f64,
    topic: f64,
    learning: f64,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    pass: bool,
}

fn generate_prompt(chunk_text: &str) -> String {
    format!(
        "You are rewriting a sentence from a transcript chunk for a shadow-writing \
         exercise. Given the source text below, produce one \"imitation\" sentence \
         that has the identical grammatical skeleton (same clause structure, same \
         parts of speech in the same order) but migrates the topic: replace content \
         words (nouns, verbs, adjectives) with words from a different, coherent \
         subject area. Adjust function words only where grammar requires it. Invent \
         4 to 8 category labels yourself (do not copy example labels) describing \
         what you transformed, and map each to the pair [original_word_or_phrase, \
         imitation_word_or_phrase].\n\n\
         Source chunk:\n{chunk_text}\n\n\
         Respond with JSON only: {{\"original\": <source sentence>, \"imitation\": \
         <rewritten sentence>, \"map\": {{<category>: [original, imitation], ...}}}}"
    )
}

fn quality_prompt(artifact: &ShadowArtifact) -> String {
    format!(
        "Evaluate this shadow-writing artifact against a 5-dimension rubric. Work \
         through these six steps in order, then emit only the final JSON: \
         (1) restate the five criteria (grammar 0-3, content 0-2, logic 0-3, topic \
         0-2, learning 0-1); (2) score grammar: does the imitation preserve the \
         original's grammatical skeleton; (3) score content: are the migrated words \
         coherent within their new topic; (4) score logic, and explicitly check \
         whether the imitation's internal logic holds (a logic score below 2 vetoes \
         the artifact regardless of total); (5) score topic: is the topic shift \
         consistent throughout; (6) score learning: does the pairing teach a usable \
         pattern. Then emit the numeric fields, a reasoning string, and an issues list.\n\n\
         Original: {}\nImitation: {}\nMap: {:?}\n\n\
         Respond with JSON only: {{\"grammar\": n, \"content\": n, \"logic\": n, \
         \"topic\": n, \"learning\": n, \"reasoning\": <string>, \"issues\": [...], \
         \"pass\": <bool>}}",
        artifact.original, artifact.imitation, artifact.map
    )
}

fn correction_prompt(artifact: &ShadowArtifact, verdict: &QualityVerdict) -> String {
    format!(
        "The following shadow-writing artifact failed quality review. Produce an \
         improved imitation and word-pair map that resolves the listed issues while \
         preserving the original sentence and the structural-isomorphism contract. \
         This is a single correction pass; there is no further re-scoring loop.\n\n\
         Original: {}\nPrevious imitation: {}\nIssues: {:?}\nScores: {:?}\n\n\
         Respond with JSON only: {{\"original\": <unchanged original>, \"imitation\": \
         <corrected sentence>, \"map\": {{<category>: [original, imitation], ...}}}}",
        artifact.original, artifact.imitation, verdict.issues, verdict.dimensions
    )
}

async fn generate(llm: &LlmClient, chunk: &Chunk) -> Result<ShadowArtifact> {
    let value = llm.call("generate", &generate_prompt(&chunk.text)).await?;
    let resp: GenerateResponse = serde_json::from_value(value)
        .map_err(|e| Error::Content(format!("generate response schema: {e}")))?;
    Ok(ShadowArtifact {
        original: resp.original,
        imitation: resp.imitation,
        map: resp.map,
        paragraph: chunk.text.clone(),
        quality_score: 0.0,
    })
}

fn validate(artifact: &ShadowArtifact) -> Result<()> {
    if artifact.is_structurally_valid(MIN_WORDS, VALIDATE_MIN_MAP_ENTRIES) {
        Ok(())
    } else {
        Err(Error::Structural(format!(
            "imitation has {} words (need >= {MIN_WORDS}) or map has {} entries (need >= {VALIDATE_MIN_MAP_ENTRIES})",
            artifact.imitation_word_count(),
            artifact.map.len()
        )))
    }
}

async fn quality(llm: &LlmClient, artifact: &ShadowArtifact) -> Result<QualityVerdict> {
    let value = llm.call("quality", &quality_prompt(artifact)).await?;
    let resp: QualityResponse = serde_json::from_value(value)
        .map_err(|e| Error::Content(format!("quality response schema: {e}")))?;
    Ok(QualityVerdict {
        dimensions: QualityDimensions {
            grammar: resp.grammar,
            content: resp.content,
            logic: resp.logic,
            topic: resp.topic,
            learning: resp.learning,
        },
        issues: resp.issues,
        llm_pass: resp.pass,
    })
}

async fn correct(llm: &LlmClient, artifact: &ShadowArtifact, verdict: &QualityVerdict) -> Result<ShadowArtifact> {
    let value = llm.call("correct", &correction_prompt(artifact, verdict)).await?;
    let resp: GenerateResponse = serde_json::from_value(value)
        .map_err(|e| Error::Content(format!("correction response schema: {e}")))?;
    let corrected = ShadowArtifact {
        original: artifact.original.clone(),
        imitation: resp.imitation,
        map: resp.map,
        paragraph: artifact.paragraph.clone(),
        quality_score: artifact.quality_score,
    };
    if corrected.imitation_word_count() < MIN_WORDS || corrected.map.len() < CORRECTION_MIN_MAP_ENTRIES {
        return Err(Error::Structural(
            "corrected artifact still fails the structural acceptance floor".into(),
        ));
    }
    Ok(corrected)
}

/// Run one chunk through the full FSM, returning its terminal state.
/// Stage transitions and failures are traced via [`TraceEvent`]; the
/// caller (Orchestrator, C6) is responsible for publishing the
/// user-visible `chunk_completed` event from the returned state.
pub async fn process_chunk(task_id: &str, chunk: Chunk, llm: &LlmClient, cancel: &CancelToken) -> ChunkState {
    let chunk_id = chunk.id;
    let transition = |from: &str, to: &str| {
        TraceEvent::ChunkStateTransition {
            task_id: task_id.to_string(),
            chunk_id,
            from: from.to_string(),
            to: to.to_string(),
        }
        .emit();
    };
    let fail = |reason: String| {
        TraceEvent::ChunkFailed {
            task_id: task_id.to_string(),
            chunk_id,
            reason: reason.clone(),
        }
        .emit();
        ChunkState::Failed(reason)
    };
    if cancel.is_cancelled() {
        return fail(Error::Cancelled.to_string());
    }

    let artifact = match cancellable(cancel, generate(llm, &chunk)).await {
        Ok(a) => a,
        Err(e) => return fail(e.to_string()),
    };
    transition("pending", "generated");

    if let Err(e) = validate(&artifact) {
        return fail(e.to_string());
    }
    transition("generated", "validated");

    if cancel.is_cancelled() {
        return fail(Error::Cancelled.to_string());
    }
    let verdict = match cancellable(cancel, quality(llm, &artifact)).await {
        Ok(v) => v,
        Err(e) => return fail(e.to_string()),
    };
    transition("validated", "scored");

    if verdict.passes() {
        let mut finalized = artifact;
        finalized.quality_score = verdict.total();
        transition("scored", "finalized");
        return ChunkState::Finalized(finalized);
    }

    if cancel.is_cancelled() {
        return fail(Error::Cancelled.to_string());
    }
    match cancellable(cancel, correct(llm, &artifact, &verdict)).await {
        Ok(mut corrected) => {
            transition("scored", "corrected");
            // Optional re-score: updates the reported quality_score only,
            // never reopens the Corrected -> Finalized transition.
            corrected.quality_score = match cancellable(cancel, quality(llm, &corrected)).await {
                Ok(rescored) => rescored.total(),
                Err(_) => verdict.total(),
            };
            transition("corrected", "finalized");
            ChunkState::Finalized(corrected)
        }
        Err(e) => fail(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_short_imitation() {
        let mut map = BTreeMap::new();
        map.insert("color".to_string(), ("red".to_string(), "blue".to_string()));
        let artifact = ShadowArtifact {
            original: "a perfectly adequate source sentence with plenty of words".into(),
            imitation: "too short".into(),
            map,
            paragraph: String::new(),
            quality_score: 0.0,
        };
        assert!(validate(&artifact).is_err());
    }

    #[test]
    fn validate_rejects_empty_map() {
        let artifact = ShadowArtifact {
            original: "a perfectly adequate source sentence with plenty of words".into(),
            imitation: "a perfectly adequate imitation sentence with plenty of words too".into(),
            map: BTreeMap::new(),
            paragraph: String::new(),
            quality_score: 0.0,
        };
        assert!(validate(&artifact).is_err());
    }

    #[test]
    fn validate_accepts_well_formed_artifact() {
        let mut map = BTreeMap::new();
        map.insert("color".to_string(), ("red".to_string(), "blue".to_string()));
        let artifact = ShadowArtifact {
            original: "a perfectly adequate source sentence with plenty of words".into(),
            imitation: "a perfectly adequate imitation sentence with plenty of words too".into(),
            map,
            paragraph: String::new(),
            quality_score: 0.0,
        };
        assert!(validate(&artifact).is_ok());
    }
}
