//! Splits an incrementally-arriving LLM token stream into sentences so
//! TTS can start speaking the first sentence while later ones are still
//! being generated (spec.md §4.4 step 5).

const TERMINATORS: [char; 4] = ['.', '!', '?', '\n'];

#[derive(Default)]
pub struct SentenceSplitter {
    pending: String,
}

impl SentenceSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one text chunk; returns any sentences that are now complete,
    /// in order. Trailing partial text (no terminator yet) stays buffered.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);
        let mut out = Vec::new();

        loop {
            let Some(pos) = self.pending.find(TERMINATORS) else { break };
            let split_at = pos + self.pending[pos..].chars().next().map(char::len_utf8).unwrap_or(1);
            let sentence = self.pending[..split_at].trim().to_string();
            self.pending = self.pending[split_at..].to_string();
            if !sentence.is_empty() {
                out.push(sentence);
            }
        }
        out
    }

    /// Call once the stream ends: flushes whatever partial sentence is
    /// left over, if non-empty.
    pub fn finish(mut self) -> Option<String> {
        let remainder = self.pending.trim().to_string();
        self.pending.clear();
        if remainder.is_empty() {
            None
        } else {
            Some(remainder)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_sentence_terminators_across_chunks() {
        let mut splitter = SentenceSplitter::new();
        let mut sentences = Vec::new();
        sentences.extend(splitter.push("Claro, um"));
        sentences.extend(splitter.push(" momento. Vou transferir"));
        sentences.extend(splitter.push(" voce agora!"));
        assert_eq!(sentences, vec!["Claro, um momento.".to_string()]);
        let remainder = splitter.finish();
        assert_eq!(remainder, Some("Vou transferir voce agora!".to_string()));
    }

    #[test]
    fn empty_stream_flushes_nothing() {
        let splitter = SentenceSplitter::new();
        assert_eq!(splitter.finish(), None);
    }
}
