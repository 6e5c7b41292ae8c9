use std::env;
use tempfile::TempDir;
use treesync::Settings;

#[test]
fn test_env_override_with_nested_keys() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("settings.toml");
    std::fs::write(&config_path, "[watch]\nmove_window_ms = 250\n").unwrap();

    unsafe {
        // Double underscore separates nested levels
        env::set_var("TS_SERVER__HEARTBEAT_SECS", "5");
        env::set_var("TS_CLIENT__SERVER_URL", "http://127.0.0.1:9999");
    }

    let settings = Settings::load_from(&config_path).unwrap();

    unsafe {
        env::remove_var("TS_SERVER__HEARTBEAT_SECS");
        env::remove_var("TS_CLIENT__SERVER_URL");
    }

    assert_eq!(settings.server.heartbeat_secs, 5);
    assert_eq!(settings.client.server_url, "http://127.0.0.1:9999");
    assert_eq!(settings.watch.move_window_ms, 250);
    // Untouched values keep their defaults
    assert!(settings.watch.recursive);
}
