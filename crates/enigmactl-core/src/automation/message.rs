//! Message corpus
//!
//! Demonstration messages are pre-encoded offline and shipped as a JSON
//! array of records. Each record carries the plaintext, the expected
//! ciphertext, and optionally the cipher setup it was encoded under. The
//! machine is the only cipher oracle; this module never computes Enigma
//! output, it only prepares what to send and what to expect back.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::config::CipherSettings;

/// Errors loading a message corpus.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// I/O error
    #[error("Corpus file I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse error
    #[error("Corpus parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// No record in the file survived validation.
    #[error("Corpus contains no usable messages")]
    Empty,
}

/// Which side of the exchange the automation plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Send the plaintext, expect the ciphertext back.
    Encode,
    /// Send the ciphertext, expect the plaintext back.
    Decode,
}

/// One corpus record as stored on disk. Field names match the offline
/// pre-encoding tool's output.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageRecord {
    /// Plaintext.
    #[serde(rename = "MSG")]
    pub msg: String,
    /// Ciphertext produced by the pre-encoding tool.
    #[serde(rename = "CODED")]
    pub coded: String,
    /// Machine model override.
    #[serde(rename = "MODEL")]
    pub model: Option<String>,
    /// Rotor selection override.
    #[serde(rename = "ROTOR")]
    pub rotor: Option<String>,
    /// Ring settings override.
    #[serde(rename = "RINGSET")]
    pub ringset: Option<String>,
    /// Ring position override.
    #[serde(rename = "RINGPOS")]
    pub ringpos: Option<String>,
    /// Plugboard override.
    #[serde(rename = "PLUG")]
    pub plug: Option<String>,
    /// Display group size override.
    #[serde(rename = "GROUP")]
    pub group: Option<usize>,
}

/// A validated, playable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Characters to send, A-Z only.
    pub input: Vec<char>,
    /// Expected machine output, same length as `input`.
    pub expected: Vec<char>,
    /// Playback direction this message was prepared for.
    pub direction: Direction,
    /// Cipher setup to push before this message, when the record carries one.
    pub cipher_override: Option<CipherSettings>,
    /// Display group size override for this message.
    pub group_size: Option<usize>,
    /// Original plaintext for display.
    pub plain_text: String,
    /// Original ciphertext for display.
    pub coded_text: String,
}

impl Message {
    /// Build a playable message from a record, or `None` when the filtered
    /// character sequences do not line up (the record is unplayable: there
    /// would be no defined expected output for some exchange).
    pub fn from_record(record: MessageRecord, direction: Direction) -> Option<Self> {
        let plain = filter_letters(&record.msg);
        let coded = filter_letters(&record.coded);
        if plain.is_empty() || plain.len() != coded.len() {
            return None;
        }

        let has_override = record.model.is_some()
            || record.rotor.is_some()
            || record.ringset.is_some()
            || record.ringpos.is_some()
            || record.plug.is_some();
        let cipher_override = has_override.then(|| {
            let defaults = CipherSettings::default();
            CipherSettings {
                model: record.model.unwrap_or(defaults.model),
                rotor_set: record.rotor.unwrap_or(defaults.rotor_set),
                ring_settings: record.ringset.unwrap_or(defaults.ring_settings),
                ring_position: record.ringpos.unwrap_or(defaults.ring_position),
                plugboard: record.plug.unwrap_or_default(),
            }
        });

        let (input, expected) = match direction {
            Direction::Encode => (plain, coded),
            Direction::Decode => (coded, plain),
        };

        Some(Self {
            input,
            expected,
            direction,
            cipher_override,
            group_size: record.group,
            plain_text: record.msg,
            coded_text: record.coded,
        })
    }
}

/// Load and validate a corpus file. Unplayable records are skipped with a
/// warning rather than failing the whole corpus.
pub fn load_corpus(path: &Path, direction: Direction) -> Result<Vec<Message>, CorpusError> {
    let contents = fs::read_to_string(path)?;
    let records: Vec<MessageRecord> = serde_json::from_str(&contents)?;
    let mut messages = Vec::with_capacity(records.len());
    for (idx, record) in records.into_iter().enumerate() {
        match Message::from_record(record, direction) {
            Some(msg) => messages.push(msg),
            None => warn!(index = idx, "skipping unplayable corpus record"),
        }
    }
    if messages.is_empty() {
        return Err(CorpusError::Empty);
    }
    Ok(messages)
}

/// Uppercase A-Z characters only; everything else is not sendable.
fn filter_letters(text: &str) -> Vec<char> {
    text.chars()
        .filter(char::is_ascii_alphabetic)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Format letters into fixed-size display groups: `ABCDE FGHIJ ...`.
pub fn group_text(letters: &[char], group_size: usize) -> String {
    if group_size == 0 {
        return letters.iter().collect();
    }
    letters
        .chunks(group_size)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(" ")
}
