//! Unified error types for the modem relay.
//!
//! A single `Error` enum that every subsystem converts into, so callers of
//! the relay see one error surface. All variants are `Copy` so they can be
//! returned from completion paths without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level relay error
// ---------------------------------------------------------------------------

/// Every fallible relay operation funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The bulk transport is not configured (relay offline).
    NotConnected,
    /// Another caller holds the resource (reader slot, switch in progress).
    Busy,
    /// Operation is not valid in the current lifecycle phase.
    InvalidState(&'static str),
    /// The bulk transport rejected a request.
    Transport(TransportError),
    /// A backend interconnect failed.
    Backend(BackendError),
    /// A control-channel request was refused.
    Control(ControlError),
    /// Configuration is invalid.
    Config(&'static str),
    /// Caller-supplied input could not be parsed.
    InvalidInput(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "transport not connected"),
            Self::Busy => write!(f, "resource busy"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Backend(e) => write!(f, "backend: {e}"),
            Self::Control(e) => write!(f, "control: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Endpoint could not be enabled.
    EndpointUnavailable,
    /// The controller refused to queue a transfer (driver status code).
    SubmitFailed(i32),
    /// Notification endpoint busy or refused the request.
    NotifyFailed(i32),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndpointUnavailable => write!(f, "endpoint unavailable"),
            Self::SubmitFailed(code) => write!(f, "submit failed ({code})"),
            Self::NotifyFailed(code) => write!(f, "notify failed ({code})"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Backend errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendError {
    /// Channel open was refused (driver status code).
    OpenFailed(i32),
    /// Channel open kept failing after every permitted attempt.
    OpenExhausted { attempts: u32 },
    /// Channel write was refused (driver status code).
    WriteFailed(i32),
    /// Channel accepted fewer bytes than offered.
    ShortWrite { expected: usize, written: usize },
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenFailed(code) => write!(f, "open failed ({code})"),
            Self::OpenExhausted { attempts } => {
                write!(f, "open failed after {attempts} attempts")
            }
            Self::WriteFailed(code) => write!(f, "write failed ({code})"),
            Self::ShortWrite { expected, written } => {
                write!(f, "short write ({written} of {expected} bytes)")
            }
        }
    }
}

impl From<BackendError> for Error {
    fn from(e: BackendError) -> Self {
        Self::Backend(e)
    }
}

// ---------------------------------------------------------------------------
// Control-channel errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    /// No response is queued for the host.
    NoResponse,
    /// Zero-length control packets are not relayed.
    ZeroLength,
    /// Packet exceeds the control packet limit.
    TooLarge { len: usize },
    /// Caller's buffer cannot hold the next packet.
    BufferTooSmall { needed: usize },
    /// Setup request not understood.
    UnsupportedRequest { request_type: u8, request: u8 },
    /// Setup request fields are malformed.
    MalformedRequest,
    /// The data stage of a command did not complete.
    DataStageFailed,
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResponse => write!(f, "no response queued"),
            Self::ZeroLength => write!(f, "zero-length packet"),
            Self::TooLarge { len } => write!(f, "packet too large ({len} bytes)"),
            Self::BufferTooSmall { needed } => {
                write!(f, "buffer too small ({needed} bytes needed)")
            }
            Self::UnsupportedRequest {
                request_type,
                request,
            } => write!(
                f,
                "unsupported request {request_type:#04x}/{request:#04x}"
            ),
            Self::MalformedRequest => write!(f, "malformed request"),
            Self::DataStageFailed => write!(f, "data stage failed"),
        }
    }
}

impl From<ControlError> for Error {
    fn from(e: ControlError) -> Self {
        Self::Control(e)
    }
}
