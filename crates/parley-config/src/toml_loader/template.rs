//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# parley configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[server]
# host = "0.0.0.0"
# port = 8080            # 0 = ephemeral
# mic_slots = 4          # 1-32

[client]
# server_url = "ws://127.0.0.1:8080"
# handshake_timeout_secs = 15   # 1-300
# connect_timeout_secs = 10     # 1-120

[[client.ice_servers]]
urls = ["stun:stun.l.google.com:19302"]
# username = "turn-user"
# credential = "turn-secret"

[logging]
# level = "INFO"         # DEBUG | INFO | WARNING | ERROR
"##
    .to_string()
}
