//! # MSGQ Contract Tests
//!
//! This crate provides "golden" tests for everything both processors must
//! agree on byte for byte, so the layouts don't drift accidentally over
//! time.
//!
//! ## Philosophy
//!
//! - **Explicit over implicit**: Layouts are written out as literal bytes
//! - **Testability first**: Contract tests fail when a layout changes
//! - **Mechanism not policy**: Define what must be stable, not how to use it
//!
//! ## Structure
//!
//! - [`header`]: The 24-byte message header
//! - [`control_block`]: Endpoint blocks and rings of a shared-memory link
//! - [`locate`]: Locate request and reply payloads
//! - [`config`]: The JSON configuration format

pub mod config;
pub mod control_block;
pub mod header;
pub mod locate;

/// Common test helpers for contract validation
pub mod test_helpers {
    use std::fmt::Write;

    /// Renders bytes as space-separated hex
    pub fn hex(bytes: &[u8]) -> String {
        let mut out = String::with_capacity(bytes.len() * 3);
        for (i, byte) in bytes.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{:02x}", byte);
        }
        out
    }

    /// Verifies an encoding against its golden bytes
    pub fn verify_bytes(what: &str, actual: &[u8], expected: &[u8]) {
        assert_eq!(
            actual,
            expected,
            "{} layout changed:\n  expected {}\n  got      {}",
            what,
            hex(expected),
            hex(actual)
        );
    }

    /// Verifies a field sits at its contracted offset
    pub fn verify_offset(what: &str, actual: usize, expected: usize) {
        assert_eq!(
            actual, expected,
            "{} moved: expected offset {}, got {}",
            what, expected, actual
        );
    }
}
