//! Line reassembly for the AT command stream.
//!
//! The modem's output arrives in chunks that have nothing to do with line
//! boundaries. [`LineReassembler`] carries the unterminated tail over to the
//! next chunk and emits complete, trimmed, non-empty lines in order.

/// Turns arbitrary byte chunks into complete protocol lines.
#[derive(Debug, Default, Clone)]
pub struct LineReassembler {
    carry: Vec<u8>,
}

impl LineReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes.
    ///
    /// CR LF, a bare LF and a bare CR all terminate a line. Empty lines
    /// produced only by delimiters are dropped, so a CR at the end of one
    /// chunk followed by an LF at the start of the next never yields a
    /// blank line. Bytes are decoded only once their line is complete, so
    /// a multi-byte character split across chunks survives intact.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.flush_line(&mut lines);
            } else {
                self.carry.push(byte);
            }
        }

        lines
    }

    /// Bytes received since the last complete line.
    pub fn pending(&self) -> &[u8] {
        &self.carry
    }

    /// Drop any partial line.
    pub fn reset(&mut self) {
        self.carry.clear();
    }

    fn flush_line(&mut self, lines: &mut Vec<String>) {
        if self.carry.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.carry);
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
        self.carry.clear();
    }
}
