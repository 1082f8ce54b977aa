//! Filesystem change notifications backed by `notify`

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{WatchEvent, WatchHandler, WatchOptions, WatchSubscription},
};
use notify::{
    event::{ModifyKind, RenameMode},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Live `notify` watcher plus the task forwarding its events to a handler.
pub struct NotifySubscription {
    watcher: Option<RecommendedWatcher>,
    forwarder: JoinHandle<()>,
}

#[async_trait]
impl WatchSubscription for NotifySubscription {
    async fn close(mut self: Box<Self>) {
        self.watcher.take();
        self.forwarder.abort();
        debug!("Watch subscription closed");
    }
}

impl Drop for NotifySubscription {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Start watching `paths`, delivering events to `handler` in arrival order.
pub fn watch_paths(
    paths: &[PathBuf],
    options: WatchOptions,
    handler: Arc<dyn WatchHandler>,
) -> Result<NotifySubscription> {
    let (tx, mut rx) = mpsc::unbounded_channel::<WatchEvent>();

    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) => {
                for watch_event in convert_notify_event(event) {
                    if tx.send(watch_event).is_err() {
                        break;
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(WatchEvent::Error(e.to_string()));
            }
        },
        Config::default(),
    )
    .map_err(|e| BridgeError::OperationFailed(format!("Failed to create watcher: {}", e)))?;

    let mode = if options.recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };

    for path in paths {
        watcher.watch(path, mode).map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to watch path");
            BridgeError::OperationFailed(format!("Failed to watch {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), "Watching path");
    }

    let forwarder = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            handler.handle(event).await;
        }
        debug!("Watch event channel closed");
    });

    Ok(NotifySubscription {
        watcher: Some(watcher),
        forwarder,
    })
}

/// Map a raw `notify` event onto add/change/unlink.
fn convert_notify_event(event: Event) -> Vec<WatchEvent> {
    match event.kind {
        EventKind::Create(_) => event.paths.into_iter().map(WatchEvent::Add).collect(),
        EventKind::Remove(_) => event.paths.into_iter().map(WatchEvent::Unlink).collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            event.paths.into_iter().map(WatchEvent::Unlink).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            event.paths.into_iter().map(WatchEvent::Add).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut paths = event.paths.into_iter();
            let mut events = Vec::with_capacity(2);
            if let Some(from) = paths.next() {
                events.push(WatchEvent::Unlink(from));
            }
            if let Some(to) = paths.next() {
                events.push(WatchEvent::Add(to));
            }
            events
        }
        // Platforms that cannot tell the two rename halves apart.
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .into_iter()
            .map(|p| {
                if p.exists() {
                    WatchEvent::Add(p)
                } else {
                    WatchEvent::Unlink(p)
                }
            })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => event.paths.into_iter().map(WatchEvent::Change).collect(),
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}
