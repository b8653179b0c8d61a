//! Typed unsolicited result codes.

use crate::protocol::fields::{parse_index, payload, quoted_tokens, split_fields};
use serde::{Deserialize, Serialize};

pub(crate) const RING: &str = "RING";
pub(crate) const NO_CARRIER: &str = "NO CARRIER";
pub(crate) const BUSY: &str = "BUSY";
pub(crate) const ERROR: &str = "ERROR";
pub(crate) const VOICE_CALL_BEGIN: &str = "VOICE CALL: BEGIN";
pub(crate) const VOICE_CALL_END: &str = "VOICE CALL: END";
pub(crate) const CLIP: &str = "+CLIP:";
pub(crate) const CCWA: &str = "+CCWA:";
pub(crate) const CMTI: &str = "+CMTI:";

/// An event recognised in the modem's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnsolicitedEvent {
    IncomingCallRinging,
    CallerIdAvailable {
        number: String,
    },
    /// `NO CARRIER`, `BUSY` or `ERROR`; only meaningful while a call is active.
    RemoteCallEnded,
    CallConnected,
    CallDisconnected,
    CallWaitingStatus {
        enabled: bool,
    },
    NewStoredMessage {
        index: u32,
    },
    ImmediateSmsReceived {
        sender: String,
        timestamp: String,
        body: String,
    },
    /// `index` is `None` for a `+CMGR` read nobody asked for by index.
    StoredSmsRead {
        index: Option<u32>,
        sender: String,
        timestamp: String,
        body: String,
    },
}

/// Caller number from `+CLIP: "<number>",<type>,...`.
///
/// A withheld number (`""`) yields `None`.
pub fn parse_clip(line: &str) -> Option<String> {
    let rest = payload(line, CLIP)?;
    quoted_tokens(rest)
        .first()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

/// Status from a `+CCWA: <class>,<status>` query response.
///
/// The call-waiting indication for a second incoming call
/// (`+CCWA: "<number>",...`) does not parse and is ignored.
pub fn parse_ccwa(line: &str) -> Option<bool> {
    let rest = payload(line, CCWA)?;
    let mut fields = rest.split(',').map(str::trim);
    let _class: u32 = fields.next()?.parse().ok()?;
    let status: u32 = fields.next()?.parse().ok()?;
    Some(status == 1)
}

/// Storage index from `+CMTI: "<mem>",<index>`.
pub fn parse_cmti(line: &str) -> Option<u32> {
    let rest = payload(line, CMTI)?;
    let fields = split_fields(rest);
    match fields.as_slice() {
        [_memory, index, ..] => parse_index(index),
        _ => None,
    }
}
