// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loading as the binary sees it: file on disk plus `PARLEY_*`
//! overrides. Tests touching process env run serially.

use std::io::Write;

use parley_config::load_and_validate_path;
use serial_test::serial;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn env_overrides_file_values() {
    let file = write_config(
        r#"
[server]
port = 9000
bearer_token = "from-file"

[[channels]]
id = "wa"
kind = "cloud"
base_url = "https://graph.example.com"
access_token = "token"
phone_number_id = "1029"
app_secret = "app"
verify_token = "verify"
"#,
    );

    // SAFETY: serialized with every other env-mutating test in this binary.
    unsafe {
        std::env::set_var("PARLEY_SERVER_BEARER_TOKEN", "from-env");
        std::env::set_var("PARLEY_SERVER_LOG_LEVEL", "debug");
    }
    let result = load_and_validate_path(file.path());
    unsafe {
        std::env::remove_var("PARLEY_SERVER_BEARER_TOKEN");
        std::env::remove_var("PARLEY_SERVER_LOG_LEVEL");
    }

    let config = result.expect("config should load");
    assert_eq!(config.server.port, 9000);
    assert_eq!(config.server.bearer_token.as_deref(), Some("from-env"));
    assert_eq!(config.server.log_level, "debug");
    assert_eq!(config.channels.len(), 1);
    assert_eq!(config.channels[0].id, "wa");
}

#[test]
#[serial]
fn unknown_key_reports_error() {
    let file = write_config("[server]\nprot = 9000\n");
    let errors = load_and_validate_path(file.path()).expect_err("typo should fail");
    assert!(!errors.is_empty());
}

#[test]
#[serial]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_and_validate_path(&dir.path().join("absent.toml")).unwrap();
    assert!(config.server.bearer_token.is_none());
    assert!(config.channels.is_empty());
}
