//! Integration test driver for the `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises one part of the relay
//! against the recording mocks in `mock_ports`. All tests run on the host
//! with no USB controller or modem present.

mod control_tests;
mod mock_ports;
