//! Incremental line framing over arbitrarily split byte chunks.
//!
//! Splitting happens on raw bytes and only complete lines are decoded. `\n`
//! never occurs inside a multi-byte UTF-8 sequence, so a character cut across
//! two chunks stays in the carry buffer until its remaining bytes arrive.

use bytes::BytesMut;

#[derive(Debug, Default)]
pub struct FrameSplitter {
    carry: BytesMut,
    /// Prefix of `carry` already known to hold no `\n`.
    scanned: usize,
}

impl FrameSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line it completed, in order,
    /// without their trailing `\n`.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.carry[self.scanned..].iter().position(|b| *b == b'\n') {
            let pos = self.scanned + offset;
            let line = self.carry.split_to(pos + 1);
            lines.push(decode(&line[..pos]));
            self.scanned = 0;
        }
        self.scanned = self.carry.len();
        lines
    }

    /// Ends the stream, returning the unterminated tail if there is one.
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        self.scanned = 0;
        let rest = self.carry.split();
        Some(decode(&rest))
    }

    /// Bytes held back waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.carry.len()
    }
}

fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
