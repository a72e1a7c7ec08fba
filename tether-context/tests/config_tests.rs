use std::fs;
use tempfile::TempDir;
use tether_context::{Aspect, ConfigError, ContextConfig, MessageBus};

#[test]
fn test_load_config_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tether.yml");
    fs::write(&path, "name: lobby-bus\ndebug: false\n").unwrap();

    let config = ContextConfig::from_file(&path).unwrap();
    assert_eq!(config.name.as_deref(), Some("lobby-bus"));
    assert_eq!(config.debug, Some(false));

    let bus: MessageBus<u32> = MessageBus::with_aspect(Aspect::with_config("bus", &config));
    assert_eq!(bus.aspect().name(), "lobby-bus");
    assert!(!bus.aspect().debug_enabled());
    assert!(bus.aspect().log_prefix().starts_with("lobby-bus #"));
}

#[test]
fn test_empty_file_is_default() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("empty.yml");
    fs::write(&path, "{}\n").unwrap();

    let config = ContextConfig::from_file(&path).unwrap();
    assert_eq!(config, ContextConfig::default());
}

#[test]
fn test_malformed_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.yml");
    fs::write(&path, "name: [unclosed\n").unwrap();

    let err = ContextConfig::from_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError(_)));
    assert!(err.to_string().starts_with("Failed to parse YAML"));
}
