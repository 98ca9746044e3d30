//! Voice Registry (C3).
//!
//! A lazy, directory-backed catalog of named reference voices. The
//! directory is scanned once, on first lookup, under an internal
//! exclusion; reads are lock-free thereafter (§5 "Shared-resource
//! policy").

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{AuralisError, Result, UnknownVoiceDetail};

#[derive(Debug, Clone)]
pub struct VoiceReference {
    pub id: String,
    pub waveform: Vec<f32>,
    pub sample_rate: u32,
    pub reference_transcript: String,
    pub default_scene: Option<String>,
}

enum Warmed {
    Loaded(HashMap<String, Arc<VoiceReference>>),
    Failed(String),
}

pub struct VoiceRegistry {
    root: PathBuf,
    warmed: Mutex<Option<Warmed>>,
}

impl VoiceRegistry {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            warmed: Mutex::new(None),
        }
    }

    /// Resolve `id` to a `VoiceReference`, scanning the registry directory
    /// on first call. Unknown ids return `UnknownVoice` with nearest-id
    /// suggestions (§4.3).
    pub fn lookup(&self, id: &str) -> Result<Arc<VoiceReference>> {
        let mut guard = self.warmed.lock();
        if guard.is_none() {
            *guard = Some(match scan_directory(&self.root) {
                Ok(map) => Warmed::Loaded(map),
                Err(e) => Warmed::Failed(e.to_string()),
            });
        }

        match guard.as_ref().unwrap() {
            Warmed::Failed(msg) => Err(AuralisError::ConfigMissing(format!(
                "voice registry scan failed: {msg}"
            ))),
            Warmed::Loaded(map) => map.get(id).cloned().ok_or_else(|| {
                let suggestions = nearest_ids(id, map.keys());
                AuralisError::UnknownVoice(UnknownVoiceDetail {
                    requested: id.to_string(),
                    suggestions,
                })
            }),
        }
    }
}

fn scan_directory(root: &Path) -> std::result::Result<HashMap<String, Arc<VoiceReference>>, AuralisError> {
    let mut map: HashMap<String, Arc<VoiceReference>> = HashMap::new();

    let profiles = read_profile_defaults(&root.join("profile"));

    let mut entries: Vec<PathBuf> = std::fs::read_dir(root)
        .map_err(AuralisError::Io)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .map(|ext| ext != "txt")
                    .unwrap_or(false)
                && p.file_stem().is_some()
        })
        .collect();
    // Lexicographic order so duplicate ids resolve deterministically —
    // "the first lexicographically-ordered file wins" (§4.3).
    entries.sort();

    for audio_path in entries {
        let id = match audio_path.file_stem().and_then(|s| s.to_str()) {
            Some(s) => s.to_string(),
            None => continue,
        };
        if map.contains_key(&id) {
            warn!(id, "duplicate voice id; keeping first lexicographic entry");
            continue;
        }

        let transcript_path = audio_path.with_extension("txt");
        let reference_transcript = match std::fs::read_to_string(&transcript_path) {
            Ok(text) => text.trim().to_string(),
            Err(_) => {
                warn!(
                    id,
                    path = %transcript_path.display(),
                    "missing sibling transcript; skipping voice"
                );
                continue;
            }
        };

        let (waveform, sample_rate) = match read_wav_mono_f32(&audio_path) {
            Ok(v) => v,
            Err(e) => {
                warn!(id, error = %e, "failed to read reference waveform; skipping voice");
                continue;
            }
        };

        map.insert(
            id.clone(),
            Arc::new(VoiceReference {
                id: id.clone(),
                waveform,
                sample_rate,
                reference_transcript,
                default_scene: profiles.get(&id).cloned(),
            }),
        );
    }

    Ok(map)
}

fn read_profile_defaults(path: &Path) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(text) = std::fs::read_to_string(path) else {
        return map;
    };
    for line in text.lines() {
        if let Some((id, scene)) = line.split_once('=') {
            map.insert(id.trim().to_string(), scene.trim().to_string());
        }
    }
    map
}

fn read_wav_mono_f32(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| AuralisError::ModelError(format!("wav open: {e}")))?;
    let spec = reader.spec();
    let sample_rate = spec.sample_rate;
    let channels = spec.channels.max(1) as usize;

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i32>()
            .map(|s| s.unwrap_or(0) as f32 / (1i64 << (spec.bits_per_sample - 1)) as f32)
            .collect(),
        hound::SampleFormat::Float => reader.samples::<f32>().map(|s| s.unwrap_or(0.0)).collect(),
    };

    if channels == 1 {
        return Ok((samples, sample_rate));
    }

    let mono = samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok((mono, sample_rate))
}

/// Nearest ids by prefix match first, then edit distance, for operator
/// ergonomics in the `UnknownVoice` error response (§4.3).
fn nearest_ids<'a>(requested: &str, ids: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut scored: Vec<(usize, &String)> = ids
        .map(|id| {
            let score = if id.starts_with(requested) || requested.starts_with(id.as_str()) {
                0
            } else {
                levenshtein(requested, id)
            };
            (score, id)
        })
        .collect();
    scored.sort_by_key(|(score, _)| *score);
    scored.into_iter().take(3).map(|(_, id)| id.clone()).collect()
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for i in 1..=a.len() {
        let mut prev_diag = row[0];
        row[0] = i;
        for j in 1..=b.len() {
            let temp = row[j];
            row[j] = if a[i - 1] == b[j - 1] {
                prev_diag
            } else {
                1 + prev_diag.min(row[j]).min(row[j - 1])
            };
            prev_diag = temp;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, samples: &[f32], rate: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample((s * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn lookup_loads_matching_audio_and_transcript() {
        let dir = tempdir();
        write_wav(&dir.join("belinda.wav"), &[0.1, 0.2, -0.1], 24_000);
        std::fs::write(dir.join("belinda.txt"), "Quick brown fox.").unwrap();

        let registry = VoiceRegistry::new(dir.clone());
        let voice = registry.lookup("belinda").unwrap();
        assert_eq!(voice.reference_transcript, "Quick brown fox.");
        assert_eq!(voice.sample_rate, 24_000);
        cleanup(&dir);
    }

    #[test]
    fn lookup_unknown_id_suggests_nearest() {
        let dir = tempdir();
        write_wav(&dir.join("belinda.wav"), &[0.1], 24_000);
        std::fs::write(dir.join("belinda.txt"), "x").unwrap();

        let registry = VoiceRegistry::new(dir.clone());
        let err = registry.lookup("belinduh").unwrap_err();
        match err {
            AuralisError::UnknownVoice(detail) => {
                assert!(detail.suggestions.contains(&"belinda".to_string()));
            }
            other => panic!("expected UnknownVoice, got {other:?}"),
        }
        cleanup(&dir);
    }

    #[test]
    fn audio_without_sibling_transcript_is_skipped() {
        let dir = tempdir();
        write_wav(&dir.join("orphan.wav"), &[0.1], 24_000);

        let registry = VoiceRegistry::new(dir.clone());
        let err = registry.lookup("orphan").unwrap_err();
        assert_eq!(err.kind_str(), "UnknownVoice");
        cleanup(&dir);
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "auralis-voice-registry-test-{}",
            fold_hash_for_test()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn fold_hash_for_test() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64
    }

    fn cleanup(dir: &Path) {
        let _ = std::fs::remove_dir_all(dir);
    }
}
