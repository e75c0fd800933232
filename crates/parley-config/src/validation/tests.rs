//! Tests for the full validation pipeline.

use super::*;
use crate::schema::*;

#[test]
fn default_config_validates() {
    let config = ParleyConfig::default();
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_zero_mic_slots() {
    let mut config = ParleyConfig::default();
    config.server.mic_slots = 0;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("server.mic_slots"));
}

#[test]
fn catches_too_many_mic_slots() {
    let mut config = ParleyConfig::default();
    config.server.mic_slots = 33;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("server.mic_slots"));
}

#[test]
fn catches_empty_host() {
    let mut config = ParleyConfig::default();
    config.server.host = "  ".into();
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("server.host"));
}

#[test]
fn catches_http_server_url() {
    let mut config = ParleyConfig::default();
    config.client.server_url = "http://localhost:8080".into();
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("client.server_url"));
}

#[test]
fn accepts_secure_websocket_url() {
    let mut config = ParleyConfig::default();
    config.client.server_url = "wss://signal.example.org/ws".into();
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_zero_handshake_timeout() {
    let mut config = ParleyConfig::default();
    config.client.handshake_timeout_secs = 0;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("client.handshake_timeout_secs"));
}

#[test]
fn catches_bad_ice_scheme() {
    let mut config = ParleyConfig::default();
    config.client.ice_servers = vec![IceServerConfig::stun("https://stun.example.org")];
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("client.ice_servers[0].urls"));
}

#[test]
fn catches_ice_server_without_urls() {
    let mut config = ParleyConfig::default();
    config.client.ice_servers = vec![IceServerConfig {
        urls: vec![],
        username: None,
        credential: None,
    }];
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("must not be empty"));
}

#[test]
fn collects_multiple_errors() {
    let mut config = ParleyConfig::default();
    config.server.mic_slots = 0;
    config.client.connect_timeout_secs = 500;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("server.mic_slots"));
    assert!(err.contains("client.connect_timeout_secs"));
    assert!(err.contains("; "));
}
