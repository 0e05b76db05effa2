//! Fuzz target: `ControlState` queues and notification accounting
//!
//! Interprets the input as a stream of operations against the control
//! state and checks the notification count against a running model and
//! that popped packets respect the host's length.
//!
//! cargo fuzz run fuzz_control_queue

#![no_main]

use libfuzzer_sys::fuzz_target;
use modem_relay::control::{ControlPacket, ControlState};
use modem_relay::ports::Completion;

fuzz_target!(|data: &[u8]| {
    let mut state = ControlState::new();
    let mut chunks = data.chunks(3);
    let mut owed: u32 = 0;

    while let Some(op) = chunks.next() {
        let arg = op.get(1).copied().unwrap_or(0) as usize * 17;
        match op[0] % 7 {
            0 => {
                let _ = state.register_reader();
            }
            1 => state.release_reader(),
            2 => {
                if let Ok(packet) = ControlPacket::from_slice(&vec![op[0]; arg]) {
                    let _ = state.ingest_command(packet);
                }
            }
            3 => {
                if let Ok(Some(packet)) = state.next_command(arg) {
                    assert!(packet.len() <= arg);
                }
            }
            4 => {
                if let Ok(packet) = ControlPacket::from_slice(&vec![op[0]; arg.max(1)]) {
                    let first = state.queue_response(packet);
                    owed += 1;
                    assert_eq!(first, owed == 1);
                }
            }
            5 => {
                if let Some(packet) = state.take_response(arg) {
                    assert!(packet.len() <= arg);
                }
            }
            _ => {
                let status = match op.get(2).copied().unwrap_or(0) % 3 {
                    0 => Completion::Success(8),
                    1 => Completion::Aborted,
                    _ => Completion::Failure(-1),
                };
                let resend = state.notify_completed(status);
                owed = if status == Completion::Aborted { 0 } else { owed.saturating_sub(1) };
                assert_eq!(resend, owed > 0);
            }
        }
        assert_eq!(state.notify_count(), owed);
    }

    state.reset();
    assert_eq!(state.to_host_len() + state.to_backend_len(), 0);
    assert_eq!(state.notify_count(), 0);
});
