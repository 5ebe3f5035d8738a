//! Watcher: a debounced recursive filesystem watch that hands batches of
//! changed paths to `IndexerCore`.
//!
//! The debounce timer and the during-indexing event queue are both
//! hand-rolled on top of the raw `notify` crate rather than a canned
//! debouncer, since collecting events *while a run is in progress* (the
//! `Indexing --event--> Buffering` transition) isn't something a fixed
//! debounce-then-forget adapter expresses.

use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::EventKind;
use notify::RecursiveMode;
use notify::Watcher as NotifyWatcherTrait;
use tokio::sync::mpsc;
use tokio::sync::watch;

use crate::discovery::FileDiscovery;
use crate::error::IndexError;
use crate::error::Result;
use crate::indexer_core::IndexerCore;

const DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Buffering,
    Indexing,
}

/// Runs the watch loop until `stop` fires. Cooperative: the underlying
/// `notify` watcher is dropped exactly once, on exit, closing its file
/// descriptor.
pub struct Watcher {
    root: PathBuf,
    discovery: Arc<FileDiscovery>,
    core: Arc<IndexerCore>,
}

impl Watcher {
    pub fn new(root: PathBuf, discovery: Arc<FileDiscovery>, core: Arc<IndexerCore>) -> Self {
        Self { root, discovery, core }
    }

    pub async fn run(&self, mut stop: watch::Receiver<bool>) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<notify::Event>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })
        .map_err(|e| IndexError::io(&self.root, e))?;

        watcher
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| IndexError::io(&self.root, e))?;

        let mut state = State::Idle;
        let mut pending: HashSet<String> = HashSet::new();
        let cancel = watch::channel(false).1;

        loop {
            let timer = tokio::time::sleep(DEBOUNCE);
            tokio::pin!(timer);

            tokio::select! {
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    self.handle_event(&event, &mut pending, &mut watcher);
                    if !pending.is_empty() {
                        state = State::Buffering;
                    }
                }
                _ = &mut timer, if state == State::Buffering => {
                    let snapshot: HashSet<String> = pending.drain().collect();
                    state = State::Indexing;
                    if let Err(e) = self.core.index(Some(snapshot), &cancel).await {
                        tracing::warn!(error = %e, "watcher: index run failed");
                    }
                    state = if pending.is_empty() { State::Idle } else { State::Buffering };
                }
            }
        }

        Ok(())
    }

    fn handle_event(
        &self,
        event: &notify::Event,
        pending: &mut HashSet<String>,
        watcher: &mut notify::RecommendedWatcher,
    ) {
        let in_scope_kind = matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        );
        if !in_scope_kind {
            return;
        }

        for path in &event.paths {
            let Some(rel) = Self::relativize(&self.root, path) else { continue };

            if matches!(event.kind, EventKind::Create(_)) && path.is_dir() {
                if !self.discovery.is_ignored_dir(&rel) {
                    if let Err(e) = watcher.watch(path, RecursiveMode::Recursive) {
                        tracing::warn!(path = %rel, error = %e, "watcher: failed adding new directory");
                    }
                }
                continue;
            }

            if self.discovery.is_in_scope(&rel) {
                pending.insert(rel);
            }
        }
    }

    fn relativize(root: &Path, path: &Path) -> Option<String> {
        path.strip_prefix(root).ok().map(|p| p.to_string_lossy().replace('\\', "/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relativize_strips_root_and_normalizes() {
        let root = PathBuf::from("/repo");
        assert_eq!(
            Watcher::relativize(&root, Path::new("/repo/pkg/a.go")).as_deref(),
            Some("pkg/a.go")
        );
        assert_eq!(Watcher::relativize(&root, Path::new("/other/a.go")), None);
    }

    #[test]
    fn discovery_scope_matches_code_and_docs_patterns() {
        let discovery = FileDiscovery::new(
            &["**/*.go".to_string()],
            &["**/*.md".to_string()],
            &["**/.git/**".to_string()],
        )
        .unwrap();
        assert!(discovery.is_in_scope("pkg/a.go"));
        assert!(discovery.is_in_scope("README.md"));
        assert!(!discovery.is_in_scope(".git/HEAD"));
        assert!(!discovery.is_in_scope("data.bin"));
    }
}
