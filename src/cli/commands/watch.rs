//! Watch commands - print events from a running server.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::tree::{expand_depth, render};
use crate::cache::ListingCache;
use crate::client::{FileEvent, SseTransport, SubscriptionMultiplexer};
use crate::config::Settings;
use crate::tree::{CachedDirectorySource, FileTree, FsDirectorySource, ROOT_KEY, TreeSync};
use crate::watcher::{EventType, WatchEvent};

/// Arguments for the watch command.
pub struct WatchArgs {
    pub path: String,
    pub base: Option<PathBuf>,
    pub shallow: bool,
    pub server: Option<String>,
    pub tree: bool,
}

fn resolve_base(base: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(match base {
        Some(base) if base.is_absolute() => base,
        Some(base) => cwd.join(base),
        None => cwd,
    })
}

fn multiplexer(server: Option<String>, config: &Settings) -> SubscriptionMultiplexer {
    let url = server.unwrap_or_else(|| config.client.server_url.clone());
    SubscriptionMultiplexer::with_move_window(
        Arc::new(SseTransport::new(url)),
        config.watch.move_window(),
    )
}

/// The multiplexer drops a connection before reporting why it ended, so an
/// error with no connection left is final.
fn connection_lost(mux: &SubscriptionMultiplexer) -> bool {
    mux.connection_count() == 0
}

fn describe(event: &WatchEvent) -> String {
    match (&event.kind, &event.relative_path, &event.path, &event.error) {
        (EventType::Error, _, _, Some(error)) => format!("error      {error}"),
        (kind, Some(relative), _, _) if relative.is_empty() => format!("{kind:<10} ."),
        (kind, Some(relative), _, _) => format!("{kind:<10} {relative}"),
        (kind, None, Some(path), _) => format!("{kind:<10} {path}"),
        (kind, _, _, _) => kind.to_string(),
    }
}

/// Run the watch command until Ctrl+C, the watched directory goes away, or
/// the server connection ends.
pub async fn run(args: WatchArgs, config: Settings) -> anyhow::Result<()> {
    let base = resolve_base(args.base)?;
    let mux = multiplexer(args.server, &config);

    let mut sync = if args.tree {
        Some(initial_tree(&base, &args.path, &config).await?)
    } else {
        None
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = mux.watch_directory(&base, args.path.clone(), !args.shallow, move |event| {
        let _ = tx.send(event.clone());
    });

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let line = describe(&event);
        if event.kind == EventType::Error {
            eprintln!("{line}");
            if connection_lost(&mux) {
                anyhow::bail!("lost connection to the watch server");
            }
        } else {
            println!("{line}");
        }

        if let Some(sync) = sync.as_mut()
            && sync.apply(&event)
        {
            println!("{}", render(sync.tree()));
        }

        let root_gone = event.kind.is_removal() && event.relative_path.as_deref() == Some("");
        if root_gone {
            eprintln!("Watched directory was removed");
            break;
        }
    }

    Ok(())
}

async fn initial_tree(base: &Path, path: &str, config: &Settings) -> anyhow::Result<TreeSync> {
    let namespace = format!("{}:", base.display());
    let cache = Arc::new(ListingCache::from_config(config));
    let source = CachedDirectorySource::new(
        FsDirectorySource::new(base).with_ignore(config.watch.ignore.clone()),
        cache.clone(),
        namespace.clone(),
    );

    let mut tree = FileTree::new();
    expand_depth(&mut tree, &source, ROOT_KEY, 1).await?;

    // Open every directory on the way down to the watched one
    let watch_root = path.trim_matches('/');
    let mut key = String::new();
    for part in watch_root.split('/').filter(|p| !p.is_empty()) {
        key = crate::tree::join_key(&key, part);
        expand_depth(&mut tree, &source, &key, 1).await?;
    }

    println!("{}", render(&tree));
    Ok(TreeSync::new(tree)
        .with_watch_root(watch_root)
        .with_cache(cache, namespace))
}

/// Arguments for the watch-file command.
pub struct WatchFileArgs {
    pub file: String,
    pub base: Option<PathBuf>,
    pub server: Option<String>,
}

/// Run the watch-file command until Ctrl+C, the file is gone, or the server
/// connection ends.
pub async fn run_file(args: WatchFileArgs, config: Settings) -> anyhow::Result<()> {
    let base = resolve_base(args.base)?;
    let mux = multiplexer(args.server, &config);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _subscription = mux.watch_file(&base, args.file.clone(), move |event| {
        let _ = tx.send(event.clone());
    });

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match &event {
            FileEvent::Connected { path } => println!("connected  {}", path.display()),
            FileEvent::Added { path } => println!("added      {}", path.display()),
            FileEvent::Changed { path } => println!("changed    {}", path.display()),
            FileEvent::Moved { old_path, new_path } => {
                println!("moved      {} -> {}", old_path.display(), new_path.display())
            }
            FileEvent::Deleted { path } => println!("deleted    {}", path.display()),
            FileEvent::Error { message } => {
                eprintln!("error      {message}");
                if connection_lost(&mux) {
                    anyhow::bail!("lost connection to the watch server");
                }
            }
        }

        if event.is_terminal() {
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let event = WatchEvent::change(
            EventType::AddDir,
            Path::new("/proj/src"),
            Path::new("/proj"),
            None,
        );
        assert_eq!(describe(&event), "addDir     src");
        assert_eq!(describe(&WatchEvent::error("boom")), "error      boom");
        assert_eq!(
            describe(&WatchEvent::connected(Path::new("/proj"))),
            "connected  /proj"
        );
    }

    #[test]
    fn test_resolve_base() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(resolve_base(None).unwrap(), cwd);
        assert_eq!(resolve_base(Some("x".into())).unwrap(), cwd.join("x"));
        assert_eq!(
            resolve_base(Some("/abs".into())).unwrap(),
            PathBuf::from("/abs")
        );
    }
}
