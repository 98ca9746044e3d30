//! Prompt Assembler (C4).
//!
//! Builds the Conditioning Context (§3) and, when the transcript is
//! chunked, one Conditioning Context per chunk — turns 1–2 (system +
//! reference voice) are shared and built once; turn 3 differs per chunk
//! (§9 "Chunking with reference reuse").

use serde::{Deserialize, Serialize};

use crate::model::{AudioCodec, AudioFrame};
use crate::voice_registry::VoiceReference;
use crate::error::Result;

const NEUTRAL_SCENE: &str = "Audio is recorded in a quiet indoor environment.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkMethod {
    None,
    ByWord,
    BySpeaker,
}

impl Default for ChunkMethod {
    fn default() -> Self {
        ChunkMethod::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub enum TurnContent {
    Text(String),
    Audio {
        waveform: Vec<f32>,
        sample_rate: u32,
        tokens: Vec<AudioFrame>,
    },
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub role: TurnRole,
    pub content: TurnContent,
}

/// One job iteration's worth of conditioning (§3). When the job is
/// chunked, C7 runs one of these per chunk; C8 concatenates their outputs.
#[derive(Debug, Clone)]
pub struct ConditioningContext {
    pub turns: Vec<Turn>,
}

/// Build one `ConditioningContext` per chunk of `transcript`.
pub fn build(
    transcript: &str,
    scene_prompt: Option<&str>,
    voice: Option<&VoiceReference>,
    chunk_method: ChunkMethod,
    chunk_max_word_num: usize,
    chunk_max_num_turns: usize,
    codec: &dyn AudioCodec,
) -> Result<Vec<ConditioningContext>> {
    let system_text = scene_prompt
        .map(str::to_string)
        .or_else(|| voice.and_then(|v| v.default_scene.clone()))
        .unwrap_or_else(|| NEUTRAL_SCENE.to_string());

    let mut base_turns = vec![Turn {
        role: TurnRole::System,
        content: TurnContent::Text(system_text),
    }];

    if let Some(voice) = voice {
        // codec.tokenize is an opaque, potentially blocking call into the
        // audio codec backend — isolate it from the async runtime the same
        // way the Generation Driver isolates model.step/codec.detokenize.
        let tokens =
            tokio::task::block_in_place(|| codec.tokenize(&voice.waveform, voice.sample_rate))?;
        base_turns.push(Turn {
            role: TurnRole::User,
            content: TurnContent::Text(voice.reference_transcript.clone()),
        });
        base_turns.push(Turn {
            role: TurnRole::Assistant,
            content: TurnContent::Audio {
                waveform: voice.waveform.clone(),
                sample_rate: voice.sample_rate,
                tokens,
            },
        });
    }

    let chunks = match chunk_method {
        ChunkMethod::None => vec![transcript.to_string()],
        ChunkMethod::ByWord => chunk_by_word(transcript, chunk_max_word_num.max(1)),
        ChunkMethod::BySpeaker => chunk_by_speaker(transcript, chunk_max_num_turns.max(1)),
    };

    Ok(chunks
        .into_iter()
        .map(|chunk_text| {
            let mut turns = base_turns.clone();
            turns.push(Turn {
                role: TurnRole::User,
                content: TurnContent::Text(chunk_text),
            });
            ConditioningContext { turns }
        })
        .collect())
}

/// Split into sentences first, then greedily pack whole sentences into
/// chunks of at most `max_words` words; a single sentence longer than the
/// cap is split at the nearest whitespace instead of mid-word (§4.4).
fn chunk_by_word(transcript: &str, max_words: usize) -> Vec<String> {
    let sentences = split_sentences(transcript);
    let mut chunks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_words = 0usize;

    for sentence in &sentences {
        let words: Vec<&str> = sentence.split_whitespace().collect();
        if words.len() > max_words {
            if !current.is_empty() {
                chunks.push(current.join(" "));
                current = Vec::new();
                current_words = 0;
            }
            for group in words.chunks(max_words) {
                chunks.push(group.join(" "));
            }
            continue;
        }

        if current_words + words.len() > max_words && !current.is_empty() {
            chunks.push(current.join(" "));
            current = Vec::new();
            current_words = 0;
        }
        current.push(sentence);
        current_words += words.len();
    }

    if !current.is_empty() {
        chunks.push(current.join(" "));
    }
    if chunks.is_empty() {
        chunks.push(transcript.to_string());
    }
    chunks
}

fn split_sentences(transcript: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = transcript.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?') {
            let next_is_boundary = bytes.get(i + 1).map(|c| c.is_ascii_whitespace()).unwrap_or(true);
            if next_is_boundary {
                let sentence = transcript[start..=i].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = i + 1;
            }
        }
    }
    let tail = transcript[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    if sentences.is_empty() {
        sentences.push(transcript);
    }
    sentences
}

/// Split on lines beginning with a bracketed speaker label, e.g. `[Alice]
/// text...`. Consecutive lines under the same marker belong to one speaker
/// turn; turns are then grouped into chunks of at most `max_turns`. Zero
/// markers collapses to one chunk (§4.4 edge case).
fn chunk_by_speaker(transcript: &str, max_turns: usize) -> Vec<String> {
    let mut turns: Vec<String> = Vec::new();

    for line in transcript.lines() {
        if is_speaker_marker(line) {
            turns.push(line.to_string());
        } else if let Some(last) = turns.last_mut() {
            last.push('\n');
            last.push_str(line);
        } else {
            turns.push(line.to_string());
        }
    }

    if turns.is_empty() {
        return vec![transcript.to_string()];
    }

    let has_marker = transcript.lines().any(is_speaker_marker);
    if !has_marker {
        return vec![transcript.to_string()];
    }

    turns
        .chunks(max_turns)
        .map(|group| group.join("\n"))
        .collect()
}

fn is_speaker_marker(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('[') && trimmed[1..].contains(']')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::stub::StubCodec;

    #[test]
    fn no_voice_produces_system_and_user_turns_only() {
        let codec = StubCodec;
        let contexts = build("Hello.", None, None, ChunkMethod::None, 100, 5, &codec).unwrap();
        assert_eq!(contexts.len(), 1);
        assert_eq!(contexts[0].turns.len(), 2);
        assert!(matches!(contexts[0].turns[0].role, TurnRole::System));
        assert!(matches!(contexts[0].turns[1].role, TurnRole::User));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn voice_reference_inserts_user_then_assistant_audio_turn() {
        let codec = StubCodec;
        let voice = VoiceReference {
            id: "belinda".into(),
            waveform: vec![0.1; 4800],
            sample_rate: 24_000,
            reference_transcript: "Quick brown fox.".into(),
            default_scene: None,
        };
        let contexts = build(
            "Good morning.",
            None,
            Some(&voice),
            ChunkMethod::None,
            100,
            5,
            &codec,
        )
        .unwrap();
        let turns = &contexts[0].turns;
        assert_eq!(turns.len(), 4);
        assert!(matches!(turns[1].role, TurnRole::User));
        assert!(matches!(turns[2].role, TurnRole::Assistant));
        assert!(matches!(turns[2].content, TurnContent::Audio { .. }));
    }

    #[test]
    fn by_word_chunking_respects_word_cap() {
        let transcript = (0..450).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ");
        let chunks = chunk_by_word(&transcript, 100);
        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks[0].split_whitespace().count(), 100);
        assert_eq!(chunks[4].split_whitespace().count(), 50);
    }

    #[test]
    fn by_speaker_with_no_markers_collapses_to_one_chunk() {
        let transcript = "Just plain text.\nMore plain text.";
        let chunks = chunk_by_speaker(transcript, 2);
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn by_speaker_groups_consecutive_turns() {
        let transcript = "[Alice] Hi there.\n[Bob] Hello!\n[Alice] How are you?";
        let chunks = chunk_by_speaker(transcript, 2);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains("Alice"));
        assert!(chunks[0].contains("Bob"));
    }

    #[test]
    fn oversized_sentence_splits_at_whitespace_not_midword() {
        let long_sentence = (0..50).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ") + ".";
        let chunks = chunk_by_word(&long_sentence, 10);
        assert!(chunks.len() >= 5);
        for chunk in &chunks {
            assert!(!chunk.contains("word4word5"), "must not split mid-word");
        }
    }
}
