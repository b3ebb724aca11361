//! Bootstrap config loading for chorus-vp
//!
//! Note: Uses serial_test because `CHORUS_CONFIG` is process-global.

use chorus_common::config::ConfigSource;
use chorus_vp::config::{TomlConfig, CONFIG_ENV_VAR};
use chorus_vp::error::Error;
use chorus_vp::session::StaticTargets;
use chorus_vp::transport::TargetProvider;
use serial_test::serial;
use std::env;
use std::io::Write;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_environment_variable_selects_file() {
    let file = write_config(
        r#"
        port = 5999

        [engine.connect_retry]
        max_attempts = 2
        "#,
    );
    env::set_var(CONFIG_ENV_VAR, file.path());

    let (config, source) = TomlConfig::load(None).unwrap();
    assert_eq!(config.port, 5999);
    assert_eq!(config.engine.connect_retry.max_attempts, 2);
    assert_eq!(source, ConfigSource::Environment(file.path().to_path_buf()));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_command_line_wins_and_invalid_values_rejected() {
    let envfile = write_config("port = 5999");
    let cli = write_config(
        r#"
        [engine]
        read_timeout_ms = 0
        "#,
    );
    env::set_var(CONFIG_ENV_VAR, envfile.path());

    let err = TomlConfig::load(Some(cli.path())).unwrap_err();
    assert!(matches!(err, Error::Config(ref m) if m.contains("read_timeout_ms")), "{}", err);

    env::remove_var(CONFIG_ENV_VAR);
}

#[tokio::test]
#[serial]
async fn test_configured_targets_are_served() {
    let file = write_config(
        r#"
        [[targets]]
        session_id = "guild-7"
        endpoint = "10.0.0.5:50001"
        ssrc = 77
        token = "t0k"
        "#,
    );

    let (config, _) = TomlConfig::load(Some(file.path())).unwrap();
    let targets = StaticTargets::from_config(config.targets);

    let target = targets.target_for("guild-7").await.unwrap();
    assert_eq!(target.endpoint, "10.0.0.5:50001");
    assert_eq!(target.ssrc, 77);
    assert_eq!(target.token.as_deref(), Some("t0k"));
    assert!(targets.target_for("guild-8").await.is_err());
}
