//! Control channel: class requests, the backend reader and
//! RESPONSE_AVAILABLE notification accounting.

use std::time::Duration;

use modem_relay::control::Ingest;
use modem_relay::control::setup::{
    GET_ENCAPSULATED_RESPONSE, REQUEST_TYPE_CLASS_IN, REQUEST_TYPE_CLASS_OUT,
    SEND_ENCAPSULATED_COMMAND, SET_CONTROL_LINE_STATE, SetupPacket,
};
use modem_relay::error::{ControlError, Error};
use modem_relay::ports::Completion;
use modem_relay::relay::SetupAction;

use crate::mock_ports::*;

fn send_command_setup(length: u16) -> SetupPacket {
    SetupPacket {
        request_type: REQUEST_TYPE_CLASS_OUT,
        request: SEND_ENCAPSULATED_COMMAND,
        value: 0,
        index: 0,
        length,
    }
}

fn get_response_setup(length: u16) -> SetupPacket {
    SetupPacket {
        request_type: REQUEST_TYPE_CLASS_IN,
        request: GET_ENCAPSULATED_RESPONSE,
        value: 0,
        index: 0,
        length,
    }
}

fn line_state_setup(value: u16) -> SetupPacket {
    SetupPacket {
        request_type: REQUEST_TYPE_CLASS_OUT,
        request: SET_CONTROL_LINE_STATE,
        value,
        index: 0,
        length: 0,
    }
}

fn respond(relay: &TestRelay, length: u16) -> (Vec<u8>, bool) {
    match relay.setup(&get_response_setup(length)).unwrap() {
        SetupAction::Respond {
            packet,
            zero_length_packet,
        } => (packet.as_slice().to_vec(), zero_length_packet),
        other => panic!("unexpected action {:?}", other),
    }
}

// ── Host → backend ────────────────────────────────────────────

#[test]
fn command_without_reader_is_dropped() {
    let relay = online_sdio();

    let outcome = relay.send_command(&[0x5a; 10]).unwrap();

    assert_eq!(outcome, Ingest::Dropped);
    let diag = relay.diagnostics();
    assert_eq!(diag.counters.ctrl_dropped, 1);
    assert_eq!(diag.control.to_backend_queued, 0);
}

#[test]
fn command_flows_from_setup_to_reader() {
    let relay = online_sdio();
    let reader = relay.open_control().unwrap();

    let action = relay.setup(&send_command_setup(5)).unwrap();
    assert_eq!(action, SetupAction::ReceiveCommand { length: 5 });
    let outcome = relay
        .command_received(b"hello", Completion::Success(5))
        .unwrap();
    assert_eq!(outcome, Ingest::Queued);

    let mut buf = [0u8; 64];
    let n = reader.read_blocking(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello");
    assert_eq!(relay.counters().ctrl_to_backend, 1);
}

#[test]
fn commands_are_read_oldest_first() {
    let relay = online_sdio();
    let reader = relay.open_control().unwrap();
    relay.send_command(b"AT+1").unwrap();
    relay.send_command(b"AT+2").unwrap();

    let mut buf = [0u8; 16];
    let n = reader.read_blocking(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"AT+1");
    let n = reader.read_blocking(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"AT+2");
}

#[test]
fn small_read_buffer_keeps_the_command() {
    let relay = online_sdio();
    let reader = relay.open_control().unwrap();
    relay.send_command(&[7; 8]).unwrap();

    let err = reader.read_blocking(&mut [0u8; 4]).unwrap_err();
    assert_eq!(err, Error::Control(ControlError::BufferTooSmall { needed: 8 }));

    let mut buf = [0u8; 8];
    assert_eq!(reader.read_blocking(&mut buf), Ok(8));
}

#[test]
fn failed_data_stage_is_reported() {
    let relay = online_sdio();
    let _reader = relay.open_control().unwrap();

    let err = relay
        .command_received(b"partial", Completion::Aborted)
        .unwrap_err();

    assert_eq!(err, Error::Control(ControlError::DataStageFailed));
    assert_eq!(relay.diagnostics().control.to_backend_queued, 0);
}

#[test]
fn oversized_command_is_refused_at_setup() {
    let relay = online_sdio();
    let err = relay.setup(&send_command_setup(4097)).unwrap_err();
    assert_eq!(err, Error::Control(ControlError::TooLarge { len: 4097 }));
}

#[test]
fn setup_is_refused_while_offline() {
    let relay = relay();
    assert_eq!(
        relay.setup(&send_command_setup(4)).unwrap_err(),
        Error::NotConnected
    );
}

#[test]
fn unknown_request_is_stalled() {
    let relay = online_sdio();
    let setup = SetupPacket {
        request_type: REQUEST_TYPE_CLASS_OUT,
        request: 0x20,
        value: 0,
        index: 0,
        length: 7,
    };
    assert!(matches!(
        relay.setup(&setup),
        Err(Error::Control(ControlError::UnsupportedRequest { .. }))
    ));
}

// ── Backend → host ────────────────────────────────────────────

#[test]
fn one_notification_outstanding_per_queue() {
    let relay = online_sdio();
    let reader = relay.open_control().unwrap();

    reader.write(b"r1").unwrap();
    reader.write(b"r2").unwrap();
    reader.write(b"r3").unwrap();
    assert_eq!(relay.transport().notifications(), 1);
    assert_eq!(relay.diagnostics().control.notify_count, 3);

    for (expected, sent_after) in [(&b"r1"[..], 2), (&b"r2"[..], 3), (&b"r3"[..], 3)] {
        let (packet, _) = respond(&relay, 64);
        assert_eq!(packet, expected);
        relay.notify_complete(Completion::Success(8));
        assert_eq!(relay.transport().notifications(), sent_after);
    }

    let diag = relay.diagnostics();
    assert_eq!(diag.control.notify_count, 0);
    assert_eq!(diag.counters.ctrl_to_host, 3);

    let notification = relay.transport().with(|m| m.notifications[0]);
    assert_eq!(notification.to_bytes(), [0xA1, 0x01, 0, 0, 0, 0, 0, 0]);
}

#[test]
fn aborted_notification_clears_count() {
    let relay = online_sdio();
    let reader = relay.open_control().unwrap();
    reader.write(b"r1").unwrap();
    reader.write(b"r2").unwrap();

    relay.notify_complete(Completion::Aborted);
    assert_eq!(relay.diagnostics().control.notify_count, 0);

    // The next response raises a fresh notification.
    reader.write(b"r3").unwrap();
    assert_eq!(relay.transport().notifications(), 2);
}

#[test]
fn failed_notification_submit_rearms() {
    let relay = online_sdio();
    let reader = relay.open_control().unwrap();

    relay.transport().with(|m| m.reject_notify = true);
    reader.write(b"first").unwrap();
    assert_eq!(relay.diagnostics().control.notify_count, 0);
    assert_eq!(relay.transport().notifications(), 0);

    relay.transport().with(|m| m.reject_notify = false);
    reader.write(b"second").unwrap();
    assert_eq!(relay.transport().notifications(), 1);
    assert_eq!(relay.diagnostics().control.notify_count, 1);
}

#[test]
fn response_is_truncated_to_request_length() {
    let relay = online_sdio();
    let reader = relay.open_control().unwrap();

    reader.write(b"0123456789").unwrap();
    let (packet, zlp) = respond(&relay, 4);
    assert_eq!(packet, b"0123");
    assert!(!zlp);

    reader.write(b"abc").unwrap();
    let (packet, zlp) = respond(&relay, 64);
    assert_eq!(packet, b"abc");
    assert!(zlp);
}

#[test]
fn empty_response_queue_stalls() {
    let relay = online_sdio();
    assert_eq!(
        relay.setup(&get_response_setup(64)).unwrap_err(),
        Error::Control(ControlError::NoResponse)
    );
}

#[test]
fn writer_rejects_empty_oversized_and_offline() {
    let relay = online_sdio();
    let reader = relay.open_control().unwrap();

    assert_eq!(
        reader.write(&[]).unwrap_err(),
        Error::Control(ControlError::ZeroLength)
    );
    assert_eq!(
        reader.write(&[0; 4097]).unwrap_err(),
        Error::Control(ControlError::TooLarge { len: 4097 })
    );
    assert_eq!(reader.write(&[0; 4096]), Ok(4096));

    relay.disable();
    assert_eq!(reader.write(b"late").unwrap_err(), Error::NotConnected);
}

// ── Reader and line state ─────────────────────────────────────

#[test]
fn reader_is_exclusive() {
    let relay = online_sdio();
    let first = relay.open_control().unwrap();
    assert!(matches!(relay.open_control(), Err(Error::Busy)));

    drop(first);
    assert!(relay.open_control().is_ok());
}

#[test]
fn dtr_follows_host_and_drops_on_suspend_and_disable() {
    let relay = online_sdio();
    let reader = relay.open_control().unwrap();

    assert_eq!(
        relay.setup(&line_state_setup(0x0003)).unwrap(),
        SetupAction::Acknowledge
    );
    assert!(reader.line_state().dtr());
    assert_eq!(reader.line_state().bits(), 0x0003);

    relay.suspend();
    assert!(!reader.line_state().dtr());

    relay.setup(&line_state_setup(0x0001)).unwrap();
    assert!(reader.line_state().dtr());
    relay.disable();
    assert!(!reader.line_state().dtr());
}

#[test]
fn blocked_reader_wakes_on_command() {
    let relay = online_sdio();

    std::thread::scope(|scope| {
        let handle = scope.spawn(|| {
            let reader = relay.open_control().unwrap();
            let mut buf = [0u8; 32];
            let n = reader.read_blocking(&mut buf).unwrap();
            buf[..n].to_vec()
        });

        while !relay.diagnostics().control.reader_open {
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(10));
        relay.send_command(b"ATI").unwrap();

        assert_eq!(handle.join().unwrap(), b"ATI");
    });
}

#[test]
fn blocked_reader_wakes_on_disconnect() {
    let relay = online_sdio();

    std::thread::scope(|scope| {
        let handle = scope.spawn(|| {
            let reader = relay.open_control().unwrap();
            reader.read_blocking(&mut [0u8; 32])
        });

        while !relay.diagnostics().control.reader_open {
            std::thread::sleep(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(10));
        relay.disable();

        assert_eq!(handle.join().unwrap(), Err(Error::NotConnected));
    });
    assert!(!relay.diagnostics().control.reader_open);
}
