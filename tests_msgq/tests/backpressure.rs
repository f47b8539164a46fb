//! Backpressure Tests
//!
//! Validates that a full ring is reported at once, that the buffer comes
//! back with the error, and that the blocking variant retries only when
//! asked to.

use ipc::Transport;
use lifecycle::Timeout;
use msgq::{ErrorKind, QueueId, HEADER_SIZE};
use std::thread;
use std::time::{Duration, Instant};
use tests_msgq::{gpp_with_silent_peer, DSP};

fn filled(queues: &msgq::MessageQueues, msg_id: u32) -> msgq::BufferHandle {
    let handle = queues.alloc(HEADER_SIZE + 8).unwrap();
    queues.write_message(&handle, msg_id, b"pressure").unwrap();
    handle
}

/// Test: The third put into a two-slot ring fails fast with TransportFull
#[test]
fn test_transport_full_is_fail_fast() {
    let (gpp, dsp) = gpp_with_silent_peer(2).unwrap();
    let target = QueueId::new(DSP, 0);

    gpp.put(target, filled(&gpp, 1)).unwrap();
    gpp.put(target, filled(&gpp, 2)).unwrap();

    let start = Instant::now();
    let err = gpp.put(target, filled(&gpp, 3)).unwrap_err();
    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(err.kind(), ErrorKind::TransportFull);
    assert!(err.kind().is_transient());

    // The buffer came back intact and can be sent once the peer drains
    assert_eq!(gpp.header(&err.handle).unwrap().msg_id, 3);
    let first = dsp.recv().unwrap().unwrap();
    assert_eq!(first.dst, target);
    gpp.put(target, err.handle).unwrap();
    assert_eq!(dsp.inbound_len().unwrap(), 2);
}

/// Test: put_blocking waits for the peer to drain
#[test]
fn test_put_blocking_waits_for_space() {
    let (gpp, dsp) = gpp_with_silent_peer(1).unwrap();
    let target = QueueId::new(DSP, 0);
    gpp.put(target, filled(&gpp, 1)).unwrap();

    let drainer = {
        let dsp = dsp.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            dsp.recv().unwrap().unwrap().handle
        })
    };
    gpp.put_blocking(target, filled(&gpp, 2), Timeout::from_secs(5))
        .unwrap();
    let drained = drainer.join().unwrap();
    gpp.free(drained).unwrap();
    assert_eq!(dsp.inbound_len().unwrap(), 1);
}

/// Test: put_blocking gives up at its deadline and returns the buffer
#[test]
fn test_put_blocking_times_out() {
    let (gpp, _dsp) = gpp_with_silent_peer(1).unwrap();
    let target = QueueId::new(DSP, 0);
    gpp.put(target, filled(&gpp, 1)).unwrap();

    let start = Instant::now();
    let err = gpp
        .put_blocking(target, filled(&gpp, 2), Timeout::from_millis(50))
        .unwrap_err();
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(err.kind(), ErrorKind::TransportFull);
    gpp.free(err.handle).unwrap();
}

/// Test: An exhausted size class is reported, not waited on
#[test]
fn test_out_of_buffers() {
    let (gpp, _dsp) = gpp_with_silent_peer(4).unwrap();
    let mut held = Vec::new();
    for _ in 0..16 {
        held.push(gpp.alloc(64).unwrap());
    }
    assert_eq!(gpp.alloc(64).unwrap_err().kind(), ErrorKind::OutOfBuffers);
    for handle in held {
        gpp.free(handle).unwrap();
    }
    assert_eq!(gpp.pool().in_use(), 0);
}
