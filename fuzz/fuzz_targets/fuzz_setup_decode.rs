//! Fuzz target: `SetupPacket::from_bytes` + `ControlRequest::decode`
//!
//! Arbitrary setup stages must decode or be refused, never panic, and an
//! accepted request must echo the host's wLength.
//!
//! cargo fuzz run fuzz_setup_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use modem_relay::control::setup::{ControlRequest, SetupPacket};

fuzz_target!(|data: [u8; 8]| {
    let setup = SetupPacket::from_bytes(data);
    match ControlRequest::decode(&setup) {
        Ok(ControlRequest::SendEncapsulatedCommand { length })
        | Ok(ControlRequest::GetEncapsulatedResponse { length }) => {
            assert_eq!(length, setup.length);
        }
        Ok(ControlRequest::SetControlLineState { value }) => {
            assert_eq!(value, setup.value);
        }
        Err(_) => {}
    }
});
