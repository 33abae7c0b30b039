//! Emotion tags and their voice references

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::config::ReferenceAudio;

static EMOTION_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(.*?)\]").expect("valid regex"));

/// Maps bracketed emotion labels (`[开心]`) to reference audio
#[derive(Debug, Clone, Default)]
pub struct EmotionTable {
    references: HashMap<String, ReferenceAudio>,
}

impl EmotionTable {
    #[must_use]
    pub const fn new(references: HashMap<String, ReferenceAudio>) -> Self {
        Self { references }
    }

    /// The last bracketed label in `text`, whether or not it is configured
    #[must_use]
    pub fn last_label(text: &str) -> Option<&str> {
        EMOTION_TAG
            .captures_iter(text)
            .last()
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .filter(|label| !label.is_empty())
    }

    /// Reference for the last bracketed label in `text`
    ///
    /// `None` means the default voice: either no tag, or the last tag has no
    /// configured reference.
    #[must_use]
    pub fn lookup(&self, text: &str) -> Option<&ReferenceAudio> {
        Self::last_label(text).and_then(|label| self.references.get(label))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.references.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}
