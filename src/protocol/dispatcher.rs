//! Classifies the modem's output into [`UnsolicitedEvent`]s.
//!
//! Each call to [`UrcDispatcher::dispatch`] is one pass over the lines a
//! chunk completed. Header-style codes are matched at line start; call
//! progress keywords are matched anywhere in a line because some firmware
//! embeds them in longer diagnostic output.

use crate::protocol::event::{
    self, BUSY, CCWA, CLIP, CMTI, ERROR, NO_CARRIER, RING, UnsolicitedEvent, VOICE_CALL_BEGIN,
    VOICE_CALL_END,
};
use crate::protocol::line::LineReassembler;
use crate::protocol::sms::{HeaderKind, SmsFeed, SmsHeader, SmsReassembler};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const CMS_ERROR: &str = "+CMS ERROR";

/// Storage indices of `AT+CMGR` reads that are still awaiting a response.
///
/// `+CMGR:` does not repeat the index it was asked for, so the dispatcher
/// matches responses to requests in order. Clones share the queue.
#[derive(Debug, Clone, Default)]
pub struct PendingReads(Arc<Mutex<VecDeque<u32>>>);

impl PendingReads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a read request for `index`.
    pub fn push(&self, index: u32) {
        if let Ok(mut queue) = self.0.lock() {
            queue.push_back(index);
        }
    }

    /// Take the oldest outstanding request.
    pub fn pop(&self) -> Option<u32> {
        self.0.lock().ok().and_then(|mut queue| queue.pop_front())
    }

    /// Withdraw the newest request for `index`, after its read command
    /// could not be written.
    pub fn remove(&self, index: u32) -> bool {
        let Ok(mut queue) = self.0.lock() else {
            return false;
        };
        match queue.iter().rposition(|&queued| queued == index) {
            Some(position) => queue.remove(position).is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.0.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut queue) = self.0.lock() {
            queue.clear();
        }
    }
}

/// Stateful classifier over the command channel's byte stream.
#[derive(Debug, Default)]
pub struct UrcDispatcher {
    lines: LineReassembler,
    sms: SmsReassembler,
    pending_reads: PendingReads,
}

/// Keywords already reported in the current pass.
#[derive(Default)]
struct PassFlags {
    ringing: bool,
    remote_ended: bool,
    connected: bool,
    disconnected: bool,
    call_waiting_at: Option<usize>,
}

impl UrcDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share the read-request queue with the code that issues `AT+CMGR`.
    pub fn with_pending_reads(mut self, pending_reads: PendingReads) -> Self {
        self.pending_reads = pending_reads;
        self
    }

    pub fn pending_reads(&self) -> &PendingReads {
        &self.pending_reads
    }

    /// Attribute the next unclaimed `+CMGR:` response to `index`.
    pub fn expect_read(&self, index: u32) {
        self.pending_reads.push(index);
    }

    /// Reassemble `chunk` and classify every line it completes.
    pub fn dispatch(&mut self, chunk: &[u8]) -> Vec<UnsolicitedEvent> {
        let lines = self.lines.push(chunk);
        self.dispatch_lines(&lines)
    }

    /// Classify already reassembled lines as one pass.
    ///
    /// Events come out in line order. `RING`, remote hang-up and voice call
    /// begin/end are reported at most once per pass; of several `+CCWA:`
    /// lines only the last one is reported.
    pub fn dispatch_lines<S: AsRef<str>>(&mut self, lines: &[S]) -> Vec<UnsolicitedEvent> {
        let mut events = Vec::new();
        let mut flags = PassFlags::default();

        for raw in lines {
            // A message body is taken verbatim, even if it starts with '>'.
            let raw = raw.as_ref();
            let line = if self.sms.is_pending() {
                raw
            } else {
                strip_prompt(raw)
            };
            if line.is_empty() {
                continue;
            }

            match self.sms.feed(line) {
                SmsFeed::HeaderPending => continue,
                SmsFeed::Complete { header, body } => {
                    events.push(self.sms_event(header, body));
                    continue;
                }
                SmsFeed::Passthrough => {}
            }

            self.classify(line, &mut flags, &mut events);
        }

        events
    }

    /// Drop partial lines and any half-received SMS.
    pub fn reset(&mut self) {
        self.lines.reset();
        self.sms.reset();
    }

    fn classify(&self, line: &str, flags: &mut PassFlags, events: &mut Vec<UnsolicitedEvent>) {
        if !flags.ringing && line.contains(RING) {
            flags.ringing = true;
            events.push(UnsolicitedEvent::IncomingCallRinging);
        }

        if !flags.remote_ended
            && (line.contains(NO_CARRIER) || line.contains(BUSY) || line.contains(ERROR))
        {
            flags.remote_ended = true;
            events.push(UnsolicitedEvent::RemoteCallEnded);
        }

        if line.contains(CMS_ERROR) && self.pending_reads.pop().is_some() {
            tracing::debug!("read request failed: {}", line);
        }

        if !flags.connected && line.contains(VOICE_CALL_BEGIN) {
            flags.connected = true;
            events.push(UnsolicitedEvent::CallConnected);
        }

        if !flags.disconnected && line.contains(VOICE_CALL_END) {
            flags.disconnected = true;
            events.push(UnsolicitedEvent::CallDisconnected);
        }

        if line.starts_with(CLIP) {
            if let Some(number) = event::parse_clip(line) {
                events.push(UnsolicitedEvent::CallerIdAvailable { number });
            }
        } else if line.starts_with(CCWA) {
            if let Some(enabled) = event::parse_ccwa(line) {
                if let Some(previous) = flags.call_waiting_at.take() {
                    events.remove(previous);
                }
                events.push(UnsolicitedEvent::CallWaitingStatus { enabled });
                flags.call_waiting_at = Some(events.len() - 1);
            }
        } else if line.starts_with(CMTI) {
            if let Some(index) = event::parse_cmti(line) {
                events.push(UnsolicitedEvent::NewStoredMessage { index });
            }
        } else {
            tracing::trace!("unclassified: {}", line);
        }
    }

    fn sms_event(&self, header: SmsHeader, body: String) -> UnsolicitedEvent {
        let SmsHeader {
            kind,
            index,
            sender,
            timestamp,
        } = header;

        match kind {
            HeaderKind::Delivered => UnsolicitedEvent::ImmediateSmsReceived {
                sender,
                timestamp,
                body,
            },
            HeaderKind::Listed => UnsolicitedEvent::StoredSmsRead {
                index,
                sender,
                timestamp,
                body,
            },
            HeaderKind::Read => UnsolicitedEvent::StoredSmsRead {
                index: self.pending_reads.pop(),
                sender,
                timestamp,
                body,
            },
        }
    }
}

/// Remove the `> ` SMS input prompt, which the modem sends without a newline.
fn strip_prompt(line: &str) -> &str {
    line.trim_start_matches('>').trim_start()
}
