//! Full configuration validation.
//!
//! Validates numeric ranges and URL schemes, collecting every problem into a
//! single `ConfigError`.

mod helpers;

#[cfg(test)]
mod tests;

use crate::schema::ParleyConfig;
use parley_common::ConfigError;

use helpers::{validate_range, validate_scheme};

const ICE_SCHEMES: &[&str] = &["stun:", "stuns:", "turn:", "turns:"];
const WS_SCHEMES: &[&str] = &["ws://", "wss://"];

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &ParleyConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    validate_server(&mut errors, config);
    validate_client(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}

fn validate_server(errors: &mut Vec<String>, config: &ParleyConfig) {
    validate_range(errors, "server.mic_slots", config.server.mic_slots, 1, 32);
    if config.server.host.trim().is_empty() {
        errors.push("server.host must not be empty".into());
    }
}

fn validate_client(errors: &mut Vec<String>, config: &ParleyConfig) {
    let client = &config.client;
    validate_scheme(errors, "client.server_url", &client.server_url, WS_SCHEMES);
    validate_range(
        errors,
        "client.handshake_timeout_secs",
        client.handshake_timeout_secs,
        1,
        300,
    );
    validate_range(
        errors,
        "client.connect_timeout_secs",
        client.connect_timeout_secs,
        1,
        120,
    );
    for (i, server) in client.ice_servers.iter().enumerate() {
        if server.urls.is_empty() {
            errors.push(format!("client.ice_servers[{i}].urls must not be empty"));
        }
        for url in &server.urls {
            validate_scheme(
                errors,
                &format!("client.ice_servers[{i}].urls"),
                url,
                ICE_SCHEMES,
            );
        }
    }
}
