//! End-to-end call scenarios against a modem session built on mocks.

use crossbeam_channel::Receiver;
use simvoice::audio::device::{MockAudioSink, MockAudioSource, MockDeviceProvider};
use simvoice::config::Config;
use simvoice::transport::MockTransport;
use simvoice::{CallState, Modem, ModemEvent, ModemParts, SimvoiceError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    modem: Modem,
    command: MockTransport,
    audio: MockTransport,
    source: MockAudioSource,
    sink: MockAudioSink,
}

fn harness_with(devices: MockDeviceProvider) -> Harness {
    let mut config = Config::default();
    config.modem.settle_ms = 0;
    config.modem.command_pacing_ms = 0;
    config.audio.poll_interval_ms = 1;

    let command = MockTransport::new("command");
    let audio = MockTransport::new("audio");
    let source = devices.source.clone();
    let sink = devices.sink.clone();
    let parts = ModemParts {
        command: Arc::new(command.clone()),
        command_rx: command.receiver(),
        audio: Arc::new(audio.clone()),
        audio_rx: audio.receiver(),
        devices: Arc::new(devices),
    };

    Harness {
        modem: Modem::start(config, parts).unwrap(),
        command,
        audio,
        source,
        sink,
    }
}

fn harness() -> Harness {
    harness_with(MockDeviceProvider::default())
}

/// Poll `condition` until it holds or the deadline passes.
fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

/// Receive events until one matches.
fn wait_for(events: &Receiver<ModemEvent>, wanted: impl Fn(&ModemEvent) -> bool) -> ModemEvent {
    let deadline = Instant::now() + WAIT;
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(left) {
            Ok(event) if wanted(&event) => return event,
            Ok(_) => continue,
            Err(e) => panic!("no matching event: {}", e),
        }
    }
}

fn has_line(transport: &MockTransport, line: &str) -> bool {
    transport.sent_lines().iter().any(|l| l == line)
}

#[test]
fn incoming_call_is_announced_answered_and_ended_by_remote() {
    let h = harness();
    let events = h.modem.subscribe();

    h.command
        .inject(b"\r\nRING\r\n\r\n+CLIP: \"+491701234567\",129,,,,0\r\n");

    let caller = wait_for(&events, |e| matches!(e, ModemEvent::CallerId { .. }));
    assert_eq!(
        caller,
        ModemEvent::CallerId {
            number: "+491701234567".to_string()
        }
    );
    assert_eq!(
        h.modem.call_state().unwrap(),
        CallState::Ringing {
            caller_number: Some("+491701234567".to_string())
        }
    );

    assert_eq!(h.modem.answer().unwrap(), CallState::Active);
    assert!(has_line(&h.command, "ATA"));
    assert!(has_line(&h.command, "AT+CPCMREG=1"));
    assert!(h.modem.status().unwrap().relay_active);
    assert!(h.source.is_started() && h.sink.is_started());

    h.command.inject(b"\r\nNO CARRIER\r\n");
    wait_for(&events, |e| {
        *e == ModemEvent::CallStateChanged {
            state: CallState::Idle,
        }
    });
    assert!(has_line(&h.command, "AT+CHUP"));
    assert!(!h.modem.status().unwrap().relay_active);
    assert!(!h.sink.is_started(), "relay stops with the call");
}

#[test]
fn unrelated_error_while_ringing_does_not_drop_the_call() {
    let h = harness();
    let events = h.modem.subscribe();

    h.command
        .inject(b"\r\nRING\r\n\r\n+CLIP: \"+15551234\",145,,,,0\r\n");
    wait_for(&events, |e| matches!(e, ModemEvent::CallerId { .. }));

    h.command.inject(b"\r\n+CMS ERROR: 321\r\n");
    // Give the dispatcher time to deliver the error line.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(
        h.modem.call_state().unwrap(),
        CallState::Ringing {
            caller_number: Some("+15551234".to_string())
        }
    );

    assert_eq!(h.modem.answer().unwrap(), CallState::Active);
    assert!(has_line(&h.command, "ATA"));
}

#[test]
fn outgoing_call_relays_audio_both_ways_then_hangs_up() {
    let h = harness();

    assert_eq!(h.modem.dial("+15551234").unwrap(), CallState::Active);
    assert!(has_line(&h.command, "ATD+15551234;"));
    assert!(h.command.discard_count() >= 1 && h.audio.discard_count() >= 1);

    // Microphone to modem, full gain while nothing plays.
    h.source.push_frame(vec![1000; 160]);
    eventually("captured audio on the audio port", || {
        !h.audio.written().is_empty()
    });
    let frame = &h.audio.written()[0];
    assert_eq!(frame.len(), 320);
    assert_eq!(&frame[..2], &1000i16.to_le_bytes());

    // Modem to speaker.
    let samples: Vec<u8> = [500i16; 80].iter().flat_map(|s| s.to_le_bytes()).collect();
    h.audio.inject(&samples);
    eventually("received audio queued for playback", || h.sink.queued() == 80);
    assert_eq!(h.sink.pull(80), vec![500; 80]);

    assert_eq!(h.modem.end_call().unwrap(), CallState::Idle);
    assert!(has_line(&h.command, "AT+CHUP"));
    assert!(has_line(&h.command, "AT+CPCMREG=0,1"));
    assert!(!h.modem.status().unwrap().relay_active);
}

#[test]
fn capture_is_attenuated_while_remote_audio_plays() {
    let h = harness();
    h.modem.dial("123").unwrap();

    let samples: Vec<u8> = [100i16; 40].iter().flat_map(|s| s.to_le_bytes()).collect();
    h.audio.inject(&samples);
    eventually("received audio queued", || h.sink.queued() == 40);
    h.sink.pull(10);

    h.source.push_frame(vec![20000; 4]);
    eventually("captured audio", || !h.audio.written().is_empty());
    let frame = &h.audio.written()[0];
    let first = i16::from_le_bytes([frame[0], frame[1]]);
    assert_eq!(first, 6000, "default suppression is 0.3");
}

#[test]
fn rejected_transitions_send_nothing() {
    let h = harness();

    match h.modem.answer() {
        Err(SimvoiceError::InvalidStateTransition { action, state }) => {
            assert_eq!(action, "answer");
            assert_eq!(state, "idle");
        }
        other => panic!("Expected InvalidStateTransition, got {:?}", other),
    }
    assert!(h.modem.end_call().is_err());
    assert!(matches!(
        h.modem.dial("  "),
        Err(SimvoiceError::InvalidInput { .. })
    ));

    assert!(h.command.written().is_empty());
    assert_eq!(h.modem.call_state().unwrap(), CallState::Idle);
}

#[test]
fn second_dial_while_active_is_rejected() {
    let h = harness();
    h.modem.dial("123").unwrap();
    let before = h.command.written().len();

    assert!(matches!(
        h.modem.dial("456"),
        Err(SimvoiceError::InvalidStateTransition { .. })
    ));
    assert_eq!(h.command.written().len(), before);
}

#[test]
fn call_proceeds_without_audio_device() {
    let h = harness_with(MockDeviceProvider::default().with_missing_device());

    assert_eq!(h.modem.dial("+15551234").unwrap(), CallState::Active);
    let status = h.modem.status().unwrap();
    assert_eq!(status.state, CallState::Active);
    assert!(!status.relay_active);
}

#[test]
fn shutdown_during_call_hangs_up() {
    let h = harness();
    h.modem.dial("123").unwrap();

    h.modem.shutdown();

    assert!(has_line(&h.command, "AT+CHUP"));
    assert!(!h.sink.is_started());
    assert!(h.command.is_closed() && h.audio.is_closed());
}
