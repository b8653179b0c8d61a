//! Outbound AT command vocabulary.
//!
//! Builders return the command text without a terminator;
//! [`Transport::send`](crate::transport::Transport::send) appends `\r\n`.

use crate::config::SmsDelivery;
use crate::error::{Result, SimvoiceError};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const TEXT_MODE: &str = "AT+CMGF=1";
pub const GSM_CHARSET: &str = "AT+CSCS=\"GSM\"";
/// First octet 17, validity 167 (24 h), default protocol and coding.
pub const TEXT_PARAMETERS: &str = "AT+CSMP=17,167,0,0";
pub const CALLER_ID_ON: &str = "AT+CLIP=1";
pub const ANSWER: &str = "ATA";
pub const HANG_UP: &str = "AT+CHUP";
pub const PCM_AUDIO_ON: &str = "AT+CPCMREG=1";
pub const PCM_AUDIO_OFF: &str = "AT+CPCMREG=0,1";
pub const LIST_ALL_SMS: &str = "AT+CMGL=\"ALL\"";
pub const DELETE_ALL_SMS: &str = "AT+CMGD=1,4";
pub const QUERY_CALL_WAITING: &str = "AT+CCWA=1,2,1";

/// Ctrl-Z, terminates an SMS body after the `>` prompt.
pub const SMS_TERMINATOR: u8 = crate::defaults::SMS_TERMINATOR;

/// New-message indication routing.
pub fn new_message_indication(delivery: SmsDelivery) -> String {
    let mt = match delivery {
        SmsDelivery::Stored => 1,
        SmsDelivery::Direct => 2,
    };
    format!("AT+CNMI=2,{},0,0,0", mt)
}

pub fn echo_cancellation(enabled: bool) -> String {
    format!("AT+CECM={}", u8::from(enabled))
}

pub fn speaker_level(level: u8) -> String {
    format!("AT+CLVL={}", level)
}

pub fn mic_gain(gain: u8) -> String {
    format!("AT+CMICGAIN={}", gain)
}

/// Voice dial. The trailing `;` selects a voice call rather than data.
pub fn dial(number: &str) -> Result<String> {
    let number = require_number(number)?;
    Ok(format!("ATD{};", number))
}

pub fn set_call_waiting(enabled: bool) -> String {
    format!("AT+CCWA=1,{},1", u8::from(enabled))
}

/// Call forwarding condition, numbered as `AT+CCFC` expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForwardReason {
    Unconditional,
    Busy,
    NoReply,
    NotReachable,
}

impl ForwardReason {
    pub fn code(self) -> u8 {
        match self {
            ForwardReason::Unconditional => 0,
            ForwardReason::Busy => 1,
            ForwardReason::NoReply => 2,
            ForwardReason::NotReachable => 3,
        }
    }
}

impl fmt::Display for ForwardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ForwardReason::Unconditional => "unconditional",
            ForwardReason::Busy => "busy",
            ForwardReason::NoReply => "no-reply",
            ForwardReason::NotReachable => "not-reachable",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for ForwardReason {
    type Err = SimvoiceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "unconditional" | "always" => Ok(ForwardReason::Unconditional),
            "busy" => Ok(ForwardReason::Busy),
            "no-reply" | "noreply" => Ok(ForwardReason::NoReply),
            "not-reachable" | "unreachable" => Ok(ForwardReason::NotReachable),
            other => Err(SimvoiceError::invalid_input(format!(
                "unknown forwarding reason '{}'",
                other
            ))),
        }
    }
}

/// Register (mode 3) or erase (mode 0) call forwarding.
///
/// Enabling requires a number; type 129 marks it as unknown/national.
pub fn set_call_forwarding(
    reason: ForwardReason,
    enabled: bool,
    number: Option<&str>,
) -> Result<String> {
    if enabled {
        let number = require_number(number.unwrap_or_default())?;
        Ok(format!("AT+CCFC={},3,\"{}\",129", reason.code(), number))
    } else {
        Ok(format!("AT+CCFC={},0", reason.code()))
    }
}

/// `AT+CMGS` opener; the body and [`SMS_TERMINATOR`] follow as raw bytes.
pub fn send_sms(recipient: &str) -> Result<String> {
    let recipient = require_number(recipient)?;
    Ok(format!("AT+CMGS=\"{}\"", recipient))
}

/// Body bytes for `AT+CMGS`, terminated with Ctrl-Z.
pub fn sms_body(body: &str) -> Result<Vec<u8>> {
    let body = body.trim_end_matches(['\r', '\n']);
    if body.trim().is_empty() {
        return Err(SimvoiceError::invalid_input("message body is empty"));
    }
    if body.as_bytes().contains(&SMS_TERMINATOR) {
        return Err(SimvoiceError::invalid_input(
            "message body contains a Ctrl-Z byte",
        ));
    }
    let mut bytes = Vec::with_capacity(body.len() + 1);
    bytes.extend_from_slice(body.as_bytes());
    bytes.push(SMS_TERMINATOR);
    Ok(bytes)
}

pub fn read_sms(index: u32) -> String {
    format!("AT+CMGR={}", index)
}

pub fn delete_sms(index: u32) -> String {
    format!("AT+CMGD={}", index)
}

/// Commands sent once after the transports open.
pub fn setup_sequence(config: &crate::config::ModemConfig) -> Vec<String> {
    let mut commands = vec![
        TEXT_MODE.to_string(),
        GSM_CHARSET.to_string(),
        TEXT_PARAMETERS.to_string(),
        new_message_indication(config.sms_delivery),
        CALLER_ID_ON.to_string(),
        echo_cancellation(config.echo_cancellation),
    ];
    if let Some(level) = config.speaker_level {
        commands.push(speaker_level(level));
    }
    if let Some(gain) = config.mic_gain {
        commands.push(mic_gain(gain));
    }
    commands
}

fn require_number(number: &str) -> Result<&str> {
    let number = number.trim();
    if number.is_empty() {
        return Err(SimvoiceError::invalid_input("phone number is empty"));
    }
    if number.contains(['"', ';', '\r', '\n']) {
        return Err(SimvoiceError::invalid_input(format!(
            "phone number '{}' contains reserved characters",
            number
        )));
    }
    Ok(number)
}
