use clap::Parser;

use treesync::Settings;
use treesync::cli::commands::{init, serve, tree, watch};
use treesync::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };
    let config = loaded.unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        Settings::default()
    });

    treesync::logging::init_with_config(&config.logging);

    let result = match cli.command {
        Commands::Init { force } => {
            init::run_init(force);
            Ok(())
        }
        Commands::Config => {
            init::run_config(&config);
            Ok(())
        }
        Commands::Serve { bind } => {
            serve::run(bind, config).await;
            Ok(())
        }
        Commands::Watch {
            path,
            base,
            shallow,
            server,
            tree,
        } => {
            let args = watch::WatchArgs {
                path,
                base,
                shallow,
                server,
                tree,
            };
            watch::run(args, config).await
        }
        Commands::WatchFile { file, base, server } => {
            let args = watch::WatchFileArgs { file, base, server };
            watch::run_file(args, config).await
        }
        Commands::Tree { path, depth } => tree::run(&path, depth).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
