//! AT protocol: line reassembly, event classification, SMS records and the
//! outbound command vocabulary.

pub mod commands;
pub mod dispatcher;
pub mod event;
pub mod fields;
pub mod line;
pub mod sms;

pub use commands::ForwardReason;
pub use dispatcher::{PendingReads, UrcDispatcher};
pub use event::UnsolicitedEvent;
pub use line::LineReassembler;
pub use sms::{SmsFeed, SmsHeader, SmsMessage, SmsProvenance, SmsReassembler};
