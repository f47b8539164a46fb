//! Configuration Loading Tests
//!
//! Validates that both domains can be brought up from configuration files
//! and talk to each other.

use lifecycle::Timeout;
use msgq::{ErrorKind, MsgqConfig};
use std::fs;
use tempfile::tempdir;
use tests_msgq::{bootstrap_with, recv_text, send_text, DSP, GPP};

const GPP_CONFIG: &str = r#"{
    "version": 1,
    "processor": 0,
    "pools": [ { "count": 8, "size": 64 }, { "count": 4, "size": 512 } ],
    "links": [ { "remote": 1, "ring_capacity": 8, "handshake_timeout_ms": 2000 } ],
    "queues": [ { "name": "gpp-in" } ]
}"#;

const DSP_CONFIG: &str = r#"{
    "version": 1,
    "processor": 1,
    "pools": [ { "count": 8, "size": 64 }, { "count": 4, "size": 512 } ],
    "links": [ { "remote": 0, "ring_capacity": 8, "handshake_timeout_ms": 2000 } ],
    "queues": [ { "name": "dsp-in", "binding": { "Remote": 0 } } ]
}"#;

/// Test: Domains started from files exchange a message
#[test]
fn test_bootstrap_from_files() {
    let dir = tempdir().unwrap();
    let gpp_path = dir.path().join("gpp.json");
    let dsp_path = dir.path().join("dsp.json");
    fs::write(&gpp_path, GPP_CONFIG).unwrap();
    fs::write(&dsp_path, DSP_CONFIG).unwrap();

    let gpp = MsgqConfig::load(&gpp_path).unwrap();
    let dsp = MsgqConfig::load(&dsp_path).unwrap();
    assert_eq!(gpp.processor, GPP);
    assert_eq!(dsp.processor, DSP);

    let domains = bootstrap_with(&gpp, &dsp).unwrap();
    domains.open().unwrap();

    let dsp_in = domains.gpp.locate("dsp-in", Timeout::from_secs(5)).unwrap();
    send_text(&domains.gpp, dsp_in, 11, "configured").unwrap();
    let (msg_id, text) = recv_text(&domains.dsp, dsp_in, Timeout::from_secs(5)).unwrap();
    assert_eq!((msg_id, text.as_str()), (11, "configured"));

    // The GPP queue was created local-only
    assert_eq!(
        domains.dsp.locate("gpp-in", Timeout::from_millis(200)).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    domains.shutdown().unwrap();
}

/// Test: Saved configuration loads back unchanged
#[test]
fn test_save_and_reload() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("saved.json");
    let config = MsgqConfig::from_json(GPP_CONFIG).unwrap();
    fs::write(&path, config.to_json().unwrap()).unwrap();
    assert_eq!(MsgqConfig::load(&path).unwrap(), config);
}

/// Test: Mismatched link parameters are caught before anything starts
#[test]
fn test_mismatched_domains_rejected() {
    let gpp = MsgqConfig::from_json(GPP_CONFIG).unwrap();
    let dsp = MsgqConfig::from_json(&DSP_CONFIG.replace("\"ring_capacity\": 8", "\"ring_capacity\": 16"))
        .unwrap();
    assert_eq!(
        bootstrap_with(&gpp, &dsp).err().map(|err| err.kind()),
        Some(ErrorKind::Config)
    );
}

/// Test: A malformed file is a configuration error
#[test]
fn test_malformed_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ \"version\": 1, \"processor\": ").unwrap();
    assert_eq!(MsgqConfig::load(&path).unwrap_err().kind(), ErrorKind::Config);
}
