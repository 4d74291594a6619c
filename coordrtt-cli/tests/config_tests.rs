#![allow(missing_docs)]
use std::fs;
use std::time::Duration;

use coordrtt_cli::config::{CliConfig, ConfigManager};
use coordrtt_core::config::IdentityConfig;
use coordrtt_core::rounding::RoundingMode;
use coordrtt_core::{RttMode, RttScope, ScheduleMode};

#[test]
fn defaults_match_documented_values() {
    let config = ConfigManager::load().expect("load defaults").into_config();
    assert_eq!(config.server.bind, "0.0.0.0:8080");
    assert_eq!(config.service.agent.rpc_addr, "127.0.0.1:7373");
    assert_eq!(config.service.agent.identity, IdentityConfig::Rpc);
    assert_eq!(config.service.rtt.mode, RttMode::Estimated);
    assert_eq!(config.service.rtt.scope, RttScope::Local);
    assert_eq!(config.service.rtt.rounding.mode, RoundingMode::HalfEven);
    assert_eq!(config.service.refresh.interval, Duration::from_secs(30));
    assert_eq!(config.service.refresh.schedule, ScheduleMode::FixedDelay);
}

#[test]
fn user_file_is_merged_over_defaults() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let config_path = temp_dir.path().join("coordrtt.toml");
    fs::write(
        &config_path,
        r#"
[server]
bind = "127.0.0.1:9090"

[agent.identity]
type = "static"
node_name = "clab-nebula-serf4"

[rtt]
mode = "measured"
scope = "full"

[rtt.probe]
timeout = "750ms"

[refresh]
interval = "10s"
schedule = "fixed-rate"
"#,
    )
    .expect("write config");

    let manager = ConfigManager::load_with_path(&config_path).expect("load merged config");
    assert_eq!(manager.path(), Some(config_path.as_path()));

    let config = manager.config();
    assert_eq!(config.server.bind, "127.0.0.1:9090");
    assert_eq!(
        config.service.agent.identity,
        IdentityConfig::Static {
            node_name: "clab-nebula-serf4".to_string()
        }
    );
    assert_eq!(config.service.rtt.mode, RttMode::Measured);
    assert_eq!(config.service.rtt.scope, RttScope::Full);
    assert_eq!(config.service.rtt.probe.timeout, Duration::from_millis(750));
    assert_eq!(config.service.rtt.probe.program, "serf");
    assert_eq!(config.service.rtt.probe.field_index, 5);
    assert_eq!(config.service.refresh.interval, Duration::from_secs(10));
    assert_eq!(config.service.refresh.schedule, ScheduleMode::FixedRate);
    assert_eq!(config.service.agent.rpc_addr, "127.0.0.1:7373");
}

#[test]
fn missing_or_invalid_files_are_errors() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    assert!(ConfigManager::load_with_path(temp_dir.path().join("absent.toml")).is_err());

    let bad = temp_dir.path().join("bad.toml");
    fs::write(&bad, "[rtt]\nmode = \"guessed\"\n").expect("write config");
    assert!(ConfigManager::load_with_path(&bad).is_err());

    let zero = temp_dir.path().join("zero.toml");
    fs::write(&zero, "[refresh]\ninterval = \"0s\"\n").expect("write config");
    assert!(ConfigManager::load_with_path(&zero).is_err());
}

#[test]
fn rounding_precision_is_bounded() {
    let mut config = CliConfig::builtin().expect("builtin");
    config.service.rtt.rounding.decimals = 15;
    assert!(config.validate().is_ok());

    config.service.rtt.rounding.decimals = 400;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("rtt.rounding.decimals"));

    let temp_dir = tempfile::tempdir().expect("temp dir");
    let wide = temp_dir.path().join("wide.toml");
    fs::write(&wide, "[rtt.rounding]\ndecimals = 309\n").expect("write config");
    assert!(ConfigManager::load_with_path(&wide).is_err());
}

#[test]
fn rendered_config_loads_back_identically() {
    let mut config = CliConfig::builtin().expect("builtin");
    config.service.agent.auth_key = Some("s3cret".to_string());
    config.service.rtt.probe.args = vec!["rtt".into(), "-wan".into(), "{from}".into(), "{to}".into()];

    let rendered = config.to_toml_string().expect("render");
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let path = temp_dir.path().join("rendered.toml");
    fs::write(&path, rendered).expect("write config");

    let reloaded = ConfigManager::load_with_path(&path).expect("reload").into_config();
    assert_eq!(reloaded, config);
}
