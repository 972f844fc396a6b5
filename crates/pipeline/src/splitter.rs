//! Sentence splitter
//!
//! Buffers streamed LLM text and releases it to TTS at sentence terminators
//! or at a maximum pending length, whichever comes first.

/// Characters that end a sentence
pub const SENTENCE_TERMINATORS: [char; 7] = ['.', '?', '!', '。', '？', '！', '\n'];

/// Rolling buffer between the LLM token stream and the TTS
pub struct SentenceSplitter {
    buffer: String,
    max_pending_chars: usize,
}

impl SentenceSplitter {
    pub fn new(max_pending_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            max_pending_chars,
        }
    }

    /// Append streamed text to the buffer.
    pub fn push(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// Take the next complete sentence, if one is buffered.
    ///
    /// A sentence ends at the first terminator (included), or spans the
    /// whole buffer once it reaches `max_pending_chars` without one.
    /// Whitespace-only pieces are discarded rather than returned.
    pub fn next_sentence(&mut self) -> Option<String> {
        loop {
            let Some(index) = self.buffer.find(|c| SENTENCE_TERMINATORS.contains(&c)) else {
                break;
            };
            let terminator = self.buffer[index..].chars().next()?;
            let end = index + terminator.len_utf8();
            let sentence: String = self.buffer.drain(..end).collect();
            if !sentence.trim().is_empty() {
                return Some(sentence);
            }
        }

        if self.buffer.chars().count() >= self.max_pending_chars {
            let overflow = std::mem::take(&mut self.buffer);
            if !overflow.trim().is_empty() {
                return Some(overflow);
            }
        }
        None
    }

    /// Take whatever is left at stream end.
    pub fn drain_remainder(&mut self) -> Option<String> {
        let remainder = std::mem::take(&mut self.buffer);
        if remainder.trim().is_empty() {
            None
        } else {
            Some(remainder)
        }
    }

    pub fn pending_chars(&self) -> usize {
        self.buffer.chars().count()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_at_terminator() {
        let mut splitter = SentenceSplitter::new(120);
        splitter.push("Hello there. How are");
        assert_eq!(splitter.next_sentence().as_deref(), Some("Hello there."));
        assert!(splitter.next_sentence().is_none());

        splitter.push(" you?");
        assert_eq!(splitter.next_sentence().as_deref(), Some(" How are you?"));
    }

    #[test]
    fn test_cjk_terminators() {
        let mut splitter = SentenceSplitter::new(120);
        splitter.push("你好。还有呢？");
        assert_eq!(splitter.next_sentence().as_deref(), Some("你好。"));
        assert_eq!(splitter.next_sentence().as_deref(), Some("还有呢？"));
        assert!(splitter.next_sentence().is_none());
    }

    #[test]
    fn test_newline_terminates() {
        let mut splitter = SentenceSplitter::new(120);
        splitter.push("line one\nline two");
        assert_eq!(splitter.next_sentence().as_deref(), Some("line one\n"));
    }

    #[test]
    fn test_overflow_without_terminator() {
        let mut splitter = SentenceSplitter::new(10);
        splitter.push("word ");
        assert!(splitter.next_sentence().is_none());
        splitter.push("word word");
        let sentence = splitter.next_sentence().unwrap();
        assert_eq!(sentence, "word word word");
        assert_eq!(splitter.pending_chars(), 0);
    }

    #[test]
    fn test_whitespace_only_pieces_discarded() {
        let mut splitter = SentenceSplitter::new(120);
        splitter.push("\n\n  Actual text.");
        assert_eq!(splitter.next_sentence().as_deref(), Some("  Actual text."));
    }

    #[test]
    fn test_drain_remainder() {
        let mut splitter = SentenceSplitter::new(120);
        splitter.push("trailing words");
        assert_eq!(splitter.drain_remainder().as_deref(), Some("trailing words"));
        assert!(splitter.drain_remainder().is_none());
    }
}
