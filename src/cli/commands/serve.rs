//! Serve command - SSE watch server.

use crate::config::Settings;

/// Run the serve command. `bind` overrides `[server] bind`.
pub async fn run(bind: Option<String>, config: Settings) {
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());

    #[cfg(feature = "http-server")]
    if let Err(e) = crate::server::serve(config, bind).await {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }

    #[cfg(not(feature = "http-server"))]
    {
        let _ = (config, bind);
        eprintln!("HTTP server support is not compiled in.");
        eprintln!("Please rebuild with: cargo build --features http-server");
        std::process::exit(1);
    }
}
