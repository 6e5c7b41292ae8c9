//! Init and Config commands.

use std::path::PathBuf;

use crate::config::{CONFIG_DIR, CONFIG_FILE, Settings};

/// Run init command - create configuration file.
pub fn run_init(force: bool) {
    let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE);

    if config_path.exists() && !force {
        eprintln!("Settings already exist at: {}", config_path.display());
        eprintln!("Use --force to overwrite");
        std::process::exit(1);
    }

    match Settings::init_config_file(force) {
        Ok(path) => {
            let defaults = Settings::default();
            println!("Created settings at: {}", path.display());
            println!();
            println!("Next steps:");
            println!("  treesync serve                 # listens on {}", defaults.server.bind);
            println!("  treesync watch . --base \"$PWD\" # stream changes from it");
        }
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

/// One line per setting that changes how watches behave.
fn summary(config: &Settings) -> Vec<String> {
    let recursion = if config.watch.recursive {
        "recursive"
    } else {
        "shallow"
    };
    vec![
        format!(
            "Server:   {} (heartbeat every {}s, {} buffered events per channel)",
            config.server.bind,
            config.server.heartbeat_interval().as_secs(),
            config.server.channel_capacity
        ),
        format!(
            "Watch:    {recursion} by default, moves correlated within {}ms",
            config.watch.move_window_ms
        ),
        format!("Ignored:  {}", config.watch.ignore.join(", ")),
        format!(
            "Client:   {} (listings cached {}s)",
            config.client.server_url, config.client.cache_ttl_secs
        ),
    ]
}

/// Run config command - display current configuration.
pub fn run_config(config: &Settings) {
    println!("treesync settings");
    println!("{}", "=".repeat(50));
    for line in summary(config) {
        println!("{line}");
    }
    println!();
    match toml::to_string_pretty(config) {
        Ok(toml_str) => println!("{toml_str}"),
        Err(e) => eprintln!("Error displaying config: {e}"),
    }
}
