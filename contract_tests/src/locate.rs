//! Locate protocol contract
//!
//! These tests define the payloads registries exchange to resolve a queue
//! name on the peer.

use crate::test_helpers::*;
use core_types::{ProcessorId, QueueId};
use msgq::locate::{LocateReply, LocateRequest, LOCATE_REPLY_LEN, LOCATE_REQUEST_LEN};

// ===== Contract Tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_sizes() {
        assert_eq!(LOCATE_REQUEST_LEN, 40);
        assert_eq!(LOCATE_REPLY_LEN, 12);
        assert_eq!(msgq::MAX_NAME_LEN, 32);
    }

    #[test]
    fn test_request_golden_bytes() {
        let request = LocateRequest {
            token: 0x0102_0304,
            name: "dsp-in".to_string(),
        };
        let mut golden = [0u8; 40];
        golden[0..4].copy_from_slice(&[0x04, 0x03, 0x02, 0x01]);
        golden[4..8].copy_from_slice(&[6, 0, 0, 0]);
        golden[8..14].copy_from_slice(b"dsp-in");
        verify_bytes("locate request", &request.encode(), &golden);
    }

    #[test]
    fn test_reply_golden_bytes() {
        let found = LocateReply {
            token: 9,
            queue: Some(QueueId::new(ProcessorId::DSP, 4)),
        };
        verify_bytes(
            "positive locate reply",
            &found.encode(),
            &[9, 0, 0, 0, 1, 0, 0, 0, 4, 0, 1, 0],
        );

        let missing = LocateReply {
            token: 9,
            queue: None,
        };
        verify_bytes(
            "negative locate reply",
            &missing.encode(),
            &[9, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF],
        );
    }
}
