//! Incremental sentence segmentation of a streamed reply
//!
//! The segmenter cuts the not-yet-emitted buffer at the first eligible
//! terminator. Strong terminators always cut; weak ones (commas) cut only
//! for the first chunk of a turn or once the chunk is long enough. Nothing
//! inside brackets is ever a cut point, and bracketed text is passed through
//! verbatim.

use std::sync::Arc;

use crate::config::{ReferenceAudio, SegmenterConfig};

use super::emotion::EmotionTable;

const STRONG_TERMINATORS: &[char] = &['…', '~', '～', '。', '？', '！', '?', '!'];
const WEAK_TERMINATORS: &[char] = &['，', ','];
const OPEN_BRACKETS: &[char] = &['(', '（', '['];
const CLOSE_BRACKETS: &[char] = &[')', '）', ']'];

/// A speakable unit of the reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceChunk {
    /// Position within the turn, starting at 0
    pub seq: u64,
    /// Exact substring of the reply
    pub text: String,
    /// Voice reference selected by the chunk's emotion tag
    pub reference: Option<ReferenceAudio>,
}

/// Per-turn segmentation state
#[derive(Debug, Clone)]
pub struct SegmenterState {
    buffer: String,
    is_first_chunk: bool,
    next_seq: u64,
}

impl Default for SegmenterState {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmenterState {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            buffer: String::new(),
            is_first_chunk: true,
            next_seq: 0,
        }
    }

    /// Text received but not yet emitted
    #[must_use]
    pub fn remainder(&self) -> &str {
        &self.buffer
    }

    #[must_use]
    pub const fn is_first_chunk(&self) -> bool {
        self.is_first_chunk
    }

    /// Sequence number the next chunk will carry
    #[must_use]
    pub const fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

/// Splits streamed text into [`SentenceChunk`]s
#[derive(Debug, Clone)]
pub struct SentenceSegmenter {
    config: SegmenterConfig,
    emotions: Arc<EmotionTable>,
}

impl SentenceSegmenter {
    #[must_use]
    pub const fn new(config: SegmenterConfig, emotions: Arc<EmotionTable>) -> Self {
        Self { config, emotions }
    }

    /// Append `delta` and emit at most one chunk
    ///
    /// Only the first eligible cut is taken; call again with an empty delta
    /// to look for further cuts in the remainder (see [`Self::drain`]).
    pub fn feed(&self, delta: &str, state: &mut SegmenterState) -> Option<SentenceChunk> {
        state.buffer.push_str(delta);

        let cut = find_cut(&state.buffer, state.is_first_chunk, self.config.weak_min_chars)?;
        let remainder = state.buffer.split_off(cut);
        let text = std::mem::replace(&mut state.buffer, remainder);
        state.is_first_chunk = false;

        Some(self.emit(text, state))
    }

    /// Append `delta` and emit every chunk the buffer now allows
    pub fn drain(&self, delta: &str, state: &mut SegmenterState) -> Vec<SentenceChunk> {
        let mut chunks = Vec::new();
        let mut next = self.feed(delta, state);
        while let Some(chunk) = next {
            chunks.push(chunk);
            next = self.feed("", state);
        }
        chunks
    }

    /// Emit whatever is left at the end of the turn
    pub fn flush(&self, state: &mut SegmenterState) -> Option<SentenceChunk> {
        if state.buffer.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut state.buffer);
        state.is_first_chunk = false;
        Some(self.emit(text, state))
    }

    fn emit(&self, text: String, state: &mut SegmenterState) -> SentenceChunk {
        let seq = state.next_seq;
        state.next_seq += 1;

        let reference = self.emotions.lookup(&text).cloned();
        tracing::debug!(seq, text = %text, emotion_ref = reference.is_some(), "sentence chunk");

        SentenceChunk {
            seq,
            text,
            reference,
        }
    }
}

/// Rewrites ASCII `...` as `…` across delta boundaries
///
/// A trailing run of dots is held back until the next delta shows whether
/// it completes an ellipsis.
#[derive(Debug, Default)]
pub struct EllipsisFolder {
    held: String,
}

impl EllipsisFolder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            held: String::new(),
        }
    }

    /// Fold `delta` and return the text that is safe to release
    pub fn push(&mut self, delta: &str) -> String {
        self.held.push_str(delta);
        let mut folded = self.held.replace("...", "…");
        self.held = folded.split_off(folded.trim_end_matches('.').len());
        folded
    }

    /// Release whatever is still held
    pub fn finish(&mut self) -> String {
        std::mem::take(&mut self.held)
    }
}

/// Byte offset just past the first eligible terminator, if any
fn find_cut(buffer: &str, is_first_chunk: bool, weak_min_chars: usize) -> Option<usize> {
    let mut depth: i64 = 0;
    let mut plain_chars = 0usize;

    for (idx, c) in buffer.char_indices() {
        if OPEN_BRACKETS.contains(&c) {
            depth += 1;
            continue;
        }
        if CLOSE_BRACKETS.contains(&c) {
            depth -= 1;
            continue;
        }
        if depth != 0 {
            continue;
        }

        plain_chars += 1;

        let cut = STRONG_TERMINATORS.contains(&c)
            || (WEAK_TERMINATORS.contains(&c) && (is_first_chunk || plain_chars > weak_min_chars));
        if cut {
            return Some(idx + c.len_utf8());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn segmenter() -> SentenceSegmenter {
        SentenceSegmenter::new(SegmenterConfig::default(), Arc::new(EmotionTable::default()))
    }

    fn not_first() -> SegmenterState {
        SegmenterState {
            is_first_chunk: false,
            ..SegmenterState::new()
        }
    }

    fn segment_all(deltas: &[&str]) -> Vec<String> {
        let seg = segmenter();
        let mut state = SegmenterState::new();
        let mut out: Vec<String> = deltas
            .iter()
            .flat_map(|d| seg.drain(d, &mut state))
            .map(|c| c.text)
            .collect();
        out.extend(seg.flush(&mut state).map(|c| c.text));
        out
    }

    #[test]
    fn first_chunk_cuts_at_comma() {
        let seg = segmenter();
        let mut state = SegmenterState::new();
        let chunk = seg.feed("你好，", &mut state).unwrap();
        assert_eq!(chunk.text, "你好，");
        assert_eq!(state.remainder(), "");
        assert!(!state.is_first_chunk());
    }

    #[test]
    fn short_comma_is_not_a_cut_after_first_chunk() {
        let seg = segmenter();
        let mut state = not_first();
        assert!(seg.feed("你好，", &mut state).is_none());
        assert_eq!(state.remainder(), "你好，");
    }

    #[test]
    fn long_comma_is_a_cut_after_first_chunk() {
        let seg = segmenter();
        let mut state = not_first();
        let chunk = seg.feed("今天的天气真的是非常不错，我们", &mut state).unwrap();
        assert_eq!(chunk.text, "今天的天气真的是非常不错，");
        assert_eq!(state.remainder(), "我们");
    }

    #[test]
    fn strong_terminator_always_cuts() {
        let seg = segmenter();
        let mut state = not_first();
        assert_eq!(seg.feed("嗯。好", &mut state).unwrap().text, "嗯。");
        assert_eq!(state.remainder(), "好");
    }

    #[test]
    fn terminators_inside_brackets_are_skipped() {
        let seg = segmenter();
        let mut state = not_first();
        assert!(seg.feed("(小声说。嗯！", &mut state).is_none());

        let chunk = seg.feed(")好的！", &mut state).unwrap();
        assert_eq!(chunk.text, "(小声说。嗯！)好的！");
    }

    #[test]
    fn terminator_right_after_close_is_eligible() {
        let seg = segmenter();
        let mut state = not_first();
        let chunk = seg.feed("[开心]!后面", &mut state).unwrap();
        assert_eq!(chunk.text, "[开心]!");
    }

    #[test]
    fn bracketed_text_does_not_count_towards_length() {
        let seg = segmenter();
        let mut state = not_first();
        // eleven characters, but only three outside the brackets
        assert!(seg.feed("（非常非常非常）好的，", &mut state).is_none());
    }

    #[test]
    fn flush_emits_remainder_unconditionally() {
        let seg = segmenter();
        let mut state = not_first();
        assert!(seg.feed("没有标点", &mut state).is_none());
        assert_eq!(seg.flush(&mut state).unwrap().text, "没有标点");
        assert!(seg.flush(&mut state).is_none());
    }

    #[test]
    fn drain_takes_every_cut() {
        let seg = segmenter();
        let mut state = SegmenterState::new();
        let chunks = seg.drain("你好！我是助手。今天", &mut state);
        let texts: Vec<_> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["你好！", "我是助手。"]);
        assert_eq!(chunks[1].seq, 1);
        assert_eq!(state.remainder(), "今天");
    }

    #[test]
    fn chunks_reconstruct_the_reply() {
        let cases: &[&[&str]] = &[
            &["你好", "，我是", "小助手。", "[开心]今天", "天气不错", "，适合出去走走！", "要一起吗"],
            &["Hello, ", "how are", " you? I'm (really, truly", ") fine!", "..."],
            &["）", "不平衡的括号。", "仍然", "会被", "刷出来"],
            &["", "a", "", "。"],
        ];

        for deltas in cases {
            let chunks = segment_all(deltas);
            assert_eq!(chunks.concat(), deltas.concat(), "deltas: {deltas:?}");
            assert!(chunks.iter().all(|c| !c.is_empty()));
        }
    }

    #[test]
    fn ellipsis_split_across_deltas_is_folded() {
        let mut folder = EllipsisFolder::new();
        assert_eq!(folder.push("Well."), "Well");
        assert_eq!(folder.push("."), "");
        assert_eq!(folder.push(". ok"), "… ok");
        assert_eq!(folder.finish(), "");
    }

    #[test]
    fn ellipsis_run_keeps_extra_dots() {
        let mut folder = EllipsisFolder::new();
        assert_eq!(folder.push("嗯....好"), "嗯….好");
        assert_eq!(folder.push("......"), "……");
    }

    #[test]
    fn short_dot_run_is_released_at_finish() {
        let mut folder = EllipsisFolder::new();
        assert_eq!(folder.push("v1.2.."), "v1.2");
        assert_eq!(folder.finish(), "..");
        assert_eq!(folder.finish(), "");
    }

    #[test]
    fn folded_ellipsis_is_a_cut() {
        let seg = segmenter();
        let mut folder = EllipsisFolder::new();
        let mut state = not_first();

        let mut chunks: Vec<String> = ["Well..", ". ok"]
            .iter()
            .flat_map(|d| seg.drain(&folder.push(d), &mut state))
            .map(|c| c.text)
            .collect();
        chunks.extend(seg.drain(&folder.finish(), &mut state).into_iter().map(|c| c.text));
        chunks.extend(seg.flush(&mut state).map(|c| c.text));

        assert_eq!(chunks, vec!["Well…", " ok"]);
    }

    #[test]
    fn chunk_carries_emotion_reference() {
        let mut refs = HashMap::new();
        refs.insert(
            "开心".to_string(),
            ReferenceAudio {
                audio_path: "ref/happy.wav".to_string(),
                text: "好开心".to_string(),
            },
        );
        let seg = SentenceSegmenter::new(SegmenterConfig::default(), Arc::new(EmotionTable::new(refs)));
        let mut state = SegmenterState::new();

        let tagged = seg.feed("[开心]太好了！", &mut state).unwrap();
        assert_eq!(tagged.reference.unwrap().audio_path, "ref/happy.wav");

        let plain = seg.feed("然后呢？", &mut state).unwrap();
        assert!(plain.reference.is_none());
    }
}
