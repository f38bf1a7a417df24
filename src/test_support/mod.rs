//! Helpers shared by unit tests that need a local mock server.

#[allow(dead_code)]
#[path = "../../tests/support/socket_guard.rs"]
pub mod socket_guard;
