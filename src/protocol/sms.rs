//! Text-mode SMS records and their reassembly from the line stream.
//!
//! In text mode the modem sends a header line (`+CMT:`, `+CMGR:` or
//! `+CMGL:`) followed by the message body on the next line. The two can
//! arrive in different chunks, so the reassembler keeps a pending header
//! until its body shows up.

use crate::protocol::fields::{is_phone_number, is_timestamp, parse_index, payload, split_fields};
use serde::{Deserialize, Serialize};

const CMT: &str = "+CMT:";
const CMGR: &str = "+CMGR:";
const CMGL: &str = "+CMGL:";

/// Where a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SmsProvenance {
    /// Delivered straight to the host (`+CMT`); not stored on the modem.
    Immediate,
    /// Read from modem storage at `index`.
    Stored { index: u32 },
}

/// A complete received message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsMessage {
    pub provenance: SmsProvenance,
    pub sender: String,
    pub timestamp: String,
    pub text: String,
}

impl SmsMessage {
    /// Storage index, if the message can be read or deleted again.
    pub fn index(&self) -> Option<u32> {
        match self.provenance {
            SmsProvenance::Immediate => None,
            SmsProvenance::Stored { index } => Some(index),
        }
    }
}

/// Which command produced a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    /// `+CMT:` unsolicited delivery
    Delivered,
    /// `+CMGR:` read by index
    Read,
    /// `+CMGL:` storage listing entry
    Listed,
}

/// Parsed fields of an SMS header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmsHeader {
    pub kind: HeaderKind,
    /// Only `+CMGL:` carries the index in the header itself.
    pub index: Option<u32>,
    pub sender: String,
    pub timestamp: String,
}

impl SmsHeader {
    /// Parse `line` if it is an SMS header.
    ///
    /// The sender is the first `+?digits` field; when there is none
    /// (alphanumeric senders), the field in the sender position is used.
    /// The timestamp is the first `dd/mm/yy,hh:mm:ss+zz` field. Missing
    /// fields come back empty rather than rejecting the header, so the
    /// body line is still consumed.
    pub fn parse(line: &str) -> Option<Self> {
        let (kind, rest) = if let Some(rest) = payload(line, CMGL) {
            (HeaderKind::Listed, rest)
        } else if let Some(rest) = payload(line, CMGR) {
            (HeaderKind::Read, rest)
        } else if let Some(rest) = payload(line, CMT) {
            (HeaderKind::Delivered, rest)
        } else {
            return None;
        };

        let fields = split_fields(rest);
        let (index, sender_position) = match kind {
            HeaderKind::Listed => (fields.first().and_then(|f| parse_index(f)), 2),
            HeaderKind::Read => (None, 1),
            HeaderKind::Delivered => (None, 0),
        };
        // The leading index of a listing entry is digits too.
        let skip = usize::from(kind == HeaderKind::Listed);

        let sender = fields
            .iter()
            .skip(skip)
            .find(|f| is_phone_number(f))
            .or_else(|| fields.get(sender_position))
            .map(|f| f.to_string())
            .unwrap_or_default();

        let timestamp = fields
            .iter()
            .find(|f| is_timestamp(f))
            .map(|f| f.to_string())
            .unwrap_or_default();

        Some(Self {
            kind,
            index,
            sender,
            timestamp,
        })
    }
}

/// Result of feeding one line to the reassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmsFeed {
    /// Not SMS related; classify it normally.
    Passthrough,
    /// A header was recognised; the body is expected next.
    HeaderPending,
    /// A body completed the pending header.
    Complete { header: SmsHeader, body: String },
}

/// Correlates SMS header lines with the body line that follows them.
#[derive(Debug, Default)]
pub struct SmsReassembler {
    pending: Option<SmsHeader>,
}

impl SmsReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one complete line.
    ///
    /// Once a header is pending, the next line is its body no matter what
    /// it contains.
    pub fn feed(&mut self, line: &str) -> SmsFeed {
        if let Some(header) = self.pending.take() {
            return SmsFeed::Complete {
                header,
                body: line.trim().to_string(),
            };
        }

        match SmsHeader::parse(line) {
            Some(header) => {
                self.pending = Some(header);
                SmsFeed::HeaderPending
            }
            None => SmsFeed::Passthrough,
        }
    }

    /// True while a header is waiting for its body.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop a pending header.
    pub fn reset(&mut self) {
        self.pending = None;
    }
}
