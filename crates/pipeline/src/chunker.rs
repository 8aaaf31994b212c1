//! Chunker (C4): splits a transcript into sentence-bounded, size-bounded
//! chunks (§4.4).

use sw_domain::config::ChunkConfig;
use sw_domain::model::Chunk;

/// Split `text` on sentence terminators (`. ! ?`) followed by whitespace
/// or end of input. Trims each sentence; drops empty ones.
pub fn split_sentences(text: &str) -> Vec<String> {
    let char_indices: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;

    for (i, (pos, c)) in char_indices.iter().enumerate() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let next_is_boundary = char_indices
            .get(i + 1)
            .map(|(_, nc)| nc.is_whitespace())
            .unwrap_or(true);
        if !next_is_boundary {
            continue;
        }
        let end = pos + c.len_utf8();
        let sentence = text[start..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        start = end;
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// Greedily pack sentences into chunks whose character length stays in
/// `[min, max]` (biased toward `target`); a sentence that alone exceeds
/// `max` becomes its own chunk. Empty input yields an empty list.
pub fn chunk_transcript(text: &str, cfg: &ChunkConfig) -> Vec<Chunk> {
    let sentences = split_sentences(text);
    let mut packed: Vec<String> = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        if sentence.len() > cfg.max {
            if !current.is_empty() {
                packed.push(std::mem::take(&mut current));
            }
            packed.push(sentence);
            continue;
        }

        if current.is_empty() {
            current = sentence;
            continue;
        }

        let joined_len = current.len() + 1 + sentence.len();
        if joined_len <= cfg.max {
            current.push(' ');
            current.push_str(&sentence);
        } else {
            packed.push(std::mem::take(&mut current));
            current = sentence;
        }
    }
    if !current.is_empty() {
        packed.push(current);
    }

    packed
        .into_iter()
        .enumerate()
        .map(|(id, text)| Chunk { id: id as u32, text })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ChunkConfig {
        ChunkConfig {
            min: 150,
            max: 250,
            target: 200,
        }
    }

    #[test]
    fn empty_input_yields_empty_list() {
        assert!(chunk_transcript("", &cfg()).is_empty());
    }

    #[test]
    fn splits_on_sentence_terminators() {
        let text = "The city opened a new library. It has a cafe! Does it have wifi?";
        let sentences = split_sentences(text);
        assert_eq!(sentences.len(), 3);
        assert_eq!(sentences[0], "The city opened a new library.");
    }

    #[test]
    fn ids_are_dense_and_source_ordered() {
        let text = "Sentence one is here. Sentence two follows right after. Sentence three wraps it up nicely now.";
        let chunks = chunk_transcript(text, &cfg());
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.id, i as u32);
        }
    }

    #[test]
    fn single_chunk_from_short_transcript() {
        let text = "The city opened a new public library this week. The modern building offers more than just books, it has study rooms, a cafe, and free internet access.";
        let chunks = chunk_transcript(text, &cfg());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, 0);
    }

    #[test]
    fn oversized_sentence_becomes_its_own_chunk() {
        let long_sentence = format!("{}.", "word ".repeat(80).trim());
        let chunks = chunk_transcript(&long_sentence, &cfg());
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.len() > cfg().max);
    }

    #[test]
    fn packs_multiple_short_sentences_toward_target() {
        let text = "One. Two. Three. Four. Five. Six. Seven. Eight. Nine. Ten.";
        let chunks = chunk_transcript(text, &cfg());
        assert!(!chunks.is_empty());
        for c in &chunks[..chunks.len().saturating_sub(1)] {
            assert!(c.text.len() <= cfg().max);
        }
    }
}
