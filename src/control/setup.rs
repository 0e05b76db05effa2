//! USB CDC class requests and notifications used by the control channel.
//!
//! Only the three requests a modem control interface needs are decoded;
//! everything else is refused so the host sees a protocol stall.

use crate::error::ControlError;

/// bmRequestType: host→device, class, interface.
pub const REQUEST_TYPE_CLASS_OUT: u8 = 0x21;
/// bmRequestType: device→host, class, interface.
pub const REQUEST_TYPE_CLASS_IN: u8 = 0xA1;

pub const SEND_ENCAPSULATED_COMMAND: u8 = 0x00;
pub const GET_ENCAPSULATED_RESPONSE: u8 = 0x01;
pub const SET_CONTROL_LINE_STATE: u8 = 0x22;

/// bNotificationType for "a response is waiting".
pub const NOTIFY_RESPONSE_AVAILABLE: u8 = 0x01;

/// Size of a CDC notification on the interrupt endpoint.
pub const NOTIFICATION_LEN: usize = 8;

/// Raw 8-byte SETUP packet, fields already converted from little endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub fn from_bytes(raw: [u8; 8]) -> Self {
        Self {
            request_type: raw[0],
            request: raw[1],
            value: u16::from_le_bytes([raw[2], raw[3]]),
            index: u16::from_le_bytes([raw[4], raw[5]]),
            length: u16::from_le_bytes([raw[6], raw[7]]),
        }
    }
}

/// A decoded class request the relay knows how to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Host is about to send `length` bytes of command in the data stage.
    SendEncapsulatedCommand { length: u16 },
    /// Host wants at most `length` bytes of the oldest response.
    GetEncapsulatedResponse { length: u16 },
    /// Host updated its line state (DTR in bit 0).
    SetControlLineState { value: u16 },
}

impl ControlRequest {
    pub fn decode(setup: &SetupPacket) -> Result<Self, ControlError> {
        match (setup.request_type, setup.request) {
            (REQUEST_TYPE_CLASS_OUT, SEND_ENCAPSULATED_COMMAND) => {
                Ok(Self::SendEncapsulatedCommand {
                    length: setup.length,
                })
            }
            (REQUEST_TYPE_CLASS_IN, GET_ENCAPSULATED_RESPONSE) => {
                if setup.value != 0 {
                    return Err(ControlError::MalformedRequest);
                }
                Ok(Self::GetEncapsulatedResponse {
                    length: setup.length,
                })
            }
            (REQUEST_TYPE_CLASS_OUT, SET_CONTROL_LINE_STATE) => Ok(Self::SetControlLineState {
                value: setup.value,
            }),
            (request_type, request) => Err(ControlError::UnsupportedRequest {
                request_type,
                request,
            }),
        }
    }
}

/// CDC notification sent on the interrupt endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    pub request_type: u8,
    pub notification: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl Notification {
    pub fn response_available(interface: u8) -> Self {
        Self {
            request_type: REQUEST_TYPE_CLASS_IN,
            notification: NOTIFY_RESPONSE_AVAILABLE,
            value: 0,
            index: u16::from(interface),
            length: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; NOTIFICATION_LEN] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type,
            self.notification,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }
}
