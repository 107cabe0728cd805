//! Accumulates the agent's output transcript for the current turn.

/// Output text assembled from `voice_synced_transcript` updates.
///
/// A full `text` replaces the buffer, a `delta` appends to it. After a final
/// update the next message starts a new turn.
#[derive(Debug, Default, Clone)]
pub struct OutputTranscript {
    text: String,
    finished: bool,
}

impl OutputTranscript {
    /// Applies one update and returns the text to report, or `None` when the
    /// update carried neither text nor delta and changed nothing.
    pub fn apply(
        &mut self,
        text: Option<String>,
        delta: Option<String>,
        is_final: bool,
    ) -> Option<(String, bool)> {
        if self.finished {
            self.text.clear();
            self.finished = false;
        }
        match (text, delta) {
            (Some(text), _) => self.text = text,
            (None, Some(delta)) => self.text.push_str(&delta),
            (None, None) if !is_final => return None,
            (None, None) => {}
        }
        self.finished = is_final;
        Some((self.text.clone(), is_final))
    }

    pub fn reset(&mut self) {
        self.text.clear();
        self.finished = false;
    }
}
