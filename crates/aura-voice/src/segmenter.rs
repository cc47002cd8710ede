//! Sentence segmentation for streaming TTS.
//!
//! Buffers generated tokens and cuts them into speakable units at sentence
//! boundaries, so synthesis can start before the full response exists.
//! Concatenating the `raw` text of every emitted unit reproduces the fed
//! tokens exactly; `text()` is the trimmed form handed to synthesis.

use crate::config::SegmenterConfig;
use regex::Regex;
use std::sync::OnceLock;

fn sentence_end() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]+\s+").expect("static regex"))
}

fn soft_break() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[,;:]\s+").expect("static regex"))
}

/// Why a unit was cut where it was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// `.` `!` or `?` followed by whitespace.
    Sentence,
    /// Buffer overflowed; cut after the last `,` `;` or `:`.
    Soft,
    /// Buffer overflowed with no usable break; emitted as-is.
    Forced,
    /// Remainder flushed at end of stream.
    Final,
}

/// A run of generated text handed to synthesis as one piece.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeakableUnit {
    /// Position within the response, starting at 0.
    pub index: usize,
    /// Exact text including surrounding whitespace.
    pub raw: String,
    pub boundary: Boundary,
}

impl SpeakableUnit {
    /// Text to speak: `raw` without surrounding whitespace.
    pub fn text(&self) -> &str {
        self.raw.trim()
    }

    /// Whether there is anything worth synthesizing.
    pub fn is_blank(&self) -> bool {
        self.text().is_empty()
    }
}

/// Streaming sentence segmenter. Use one per response.
#[derive(Debug)]
pub struct SentenceSegmenter {
    config: SegmenterConfig,
    buffer: String,
    next_index: usize,
}

impl SentenceSegmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self {
            config,
            buffer: String::new(),
            next_index: 0,
        }
    }

    /// Append a token and return the units it completed (possibly none).
    pub fn feed(&mut self, token: &str) -> Vec<SpeakableUnit> {
        self.buffer.push_str(token);
        let mut units = Vec::new();

        let ends: Vec<usize> = sentence_end()
            .find_iter(&self.buffer)
            .map(|m| m.end())
            .collect();
        if let Some(&end) = ends.last() {
            let mut start = 0;
            for cut in ends {
                let raw = self.buffer[start..cut].to_string();
                start = cut;
                units.push(self.make_unit(raw, Boundary::Sentence));
            }
            self.buffer.drain(..end);
        }

        while self.buffer.chars().count() > self.config.max_chars {
            units.push(self.force_cut());
        }
        units
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> Option<SpeakableUnit> {
        if self.buffer.is_empty() {
            return None;
        }
        let raw = std::mem::take(&mut self.buffer);
        Some(self.make_unit(raw, Boundary::Final))
    }

    /// Text buffered but not yet emitted.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    fn force_cut(&mut self) -> SpeakableUnit {
        let min_bytes = self
            .buffer
            .char_indices()
            .nth(self.config.min_chars)
            .map(|(i, _)| i)
            .unwrap_or(self.buffer.len());
        let cap_bytes = self
            .buffer
            .char_indices()
            .nth(self.config.max_chars)
            .map(|(i, _)| i)
            .unwrap_or(self.buffer.len());

        let soft = soft_break()
            .find_iter(&self.buffer[..cap_bytes])
            .map(|m| m.end())
            .filter(|&end| end >= min_bytes)
            .last();

        let (cut, boundary) = match soft {
            Some(end) => (end, Boundary::Soft),
            None => (self.buffer.len(), Boundary::Forced),
        };
        let raw: String = self.buffer.drain(..cut).collect();
        self.make_unit(raw, boundary)
    }

    fn make_unit(&mut self, raw: String, boundary: Boundary) -> SpeakableUnit {
        let unit = SpeakableUnit {
            index: self.next_index,
            raw,
            boundary,
        };
        self.next_index += 1;
        unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segmenter() -> SentenceSegmenter {
        SentenceSegmenter::new(SegmenterConfig::default())
    }

    fn collect(tokens: &[&str]) -> Vec<SpeakableUnit> {
        let mut seg = segmenter();
        let mut out: Vec<SpeakableUnit> = tokens.iter().flat_map(|t| seg.feed(t)).collect();
        out.extend(seg.finish());
        out
    }

    #[test]
    fn splits_across_tokens() {
        let mut seg = segmenter();
        let first = seg.feed("Hello world. How are");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].text(), "Hello world.");
        assert_eq!(first[0].boundary, Boundary::Sentence);

        assert!(seg.feed(" you?").is_empty());
        let last = seg.finish().unwrap();
        assert_eq!(last.text(), "How are you?");
        assert_eq!(last.index, 1);
        assert!(seg.finish().is_none());
    }

    #[test]
    fn several_sentences_in_one_token() {
        let units = collect(&["Yes! We open at nine. Closed on Sunday? ", "Right."]);
        let texts: Vec<&str> = units.iter().map(|u| u.text()).collect();
        assert_eq!(texts, ["Yes!", "We open at nine.", "Closed on Sunday?", "Right."]);
        let indices: Vec<usize> = units.iter().map(|u| u.index).collect();
        assert_eq!(indices, [0, 1, 2, 3]);
    }

    #[test]
    fn decimal_point_is_not_a_boundary() {
        let units = collect(&["It costs 3.", "5 dollars. Thanks"]);
        let texts: Vec<&str> = units.iter().map(|u| u.text()).collect();
        assert_eq!(texts, ["It costs 3.5 dollars.", "Thanks"]);
    }

    #[test]
    fn concatenation_reconstructs_input() {
        let tokens = [
            "Well,", " the office", " opens at 9.", " It closes at 5! ",
            "Wait... really?", "  Yes.", " ", "Done",
        ];
        let units = collect(&tokens);
        let rebuilt: String = units.iter().map(|u| u.raw.as_str()).collect();
        assert_eq!(rebuilt, tokens.concat());
    }

    #[test]
    fn run_on_text_is_cut_at_soft_boundary() {
        let mut seg = segmenter();
        let clause = "this clause keeps going without a full stop, ";
        let mut units = Vec::new();
        for _ in 0..6 {
            units.extend(seg.feed(clause));
        }
        assert!(!units.is_empty());
        assert!(units.iter().all(|u| u.boundary == Boundary::Soft));
        assert!(units.iter().all(|u| u.raw.chars().count() <= 200));
        assert!(seg.pending().chars().count() <= 200);
    }

    #[test]
    fn run_on_text_without_breaks_is_forced() {
        let mut seg = segmenter();
        let word = "abcdefghij";
        let mut first_emit_at = None;
        for i in 1..=30 {
            let units = seg.feed(word);
            if !units.is_empty() && first_emit_at.is_none() {
                first_emit_at = Some(i * word.len());
                assert_eq!(units[0].boundary, Boundary::Forced);
            }
        }
        let at = first_emit_at.unwrap();
        assert!(at > 200 && at <= 200 + word.len());
    }

    #[test]
    fn multibyte_text_cuts_on_char_boundaries() {
        let mut seg = segmenter();
        let units = seg.feed(&"é".repeat(250));
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].raw.chars().count(), 250);
    }
}
