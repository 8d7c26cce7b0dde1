//! Shader source change detection.
//!
//! The rebuild worker only asks "which of these sources changed since I last
//! looked?". Polling is the default answer; [`NotifyDetector`] answers the same
//! question from filesystem events. Files pulled in through `#include` are not
//! tracked by either backend.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam::channel::{unbounded, Receiver};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use kiln_common::{KilnError, KilnResult, WatchBackend};

/// Index of a deduplicated shader source in the pipeline engine registry.
pub type SourceId = usize;

/// A tracked source and the modification time of the version last compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedSource {
    pub id: SourceId,
    pub path: PathBuf,
    /// `None` until a compile of this source has been attempted.
    pub last_seen: Option<SystemTime>,
}

/// A source whose file is newer than its `last_seen` stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceChange {
    pub id: SourceId,
    pub stamp: SystemTime,
}

/// Answers which tracked sources went stale.
pub trait ChangeDetector: Send {
    fn changed_since(&mut self, base_dir: &Path, sources: &[WatchedSource]) -> Vec<SourceChange>;
}

/// Modification time of `path`.
pub fn last_modified(path: &Path) -> io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

/// Stat one source and compare against its stamp.
///
/// A never-compiled source that cannot be stat'ed is still reported (with the
/// epoch as stamp) so the compile attempt surfaces the IO error; a source that
/// compiled before and is briefly missing, e.g. mid-save, is left alone.
fn check(base_dir: &Path, source: &WatchedSource) -> Option<SourceChange> {
    match last_modified(&base_dir.join(&source.path)) {
        Ok(stamp) => match source.last_seen {
            Some(seen) if stamp <= seen => None,
            _ => Some(SourceChange { id: source.id, stamp }),
        },
        Err(_) if source.last_seen.is_none() => Some(SourceChange {
            id: source.id,
            stamp: UNIX_EPOCH,
        }),
        Err(_) => None,
    }
}

/// Re-stat every source on every call.
#[derive(Debug, Default)]
pub struct PollingDetector;

impl ChangeDetector for PollingDetector {
    fn changed_since(&mut self, base_dir: &Path, sources: &[WatchedSource]) -> Vec<SourceChange> {
        sources.iter().filter_map(|s| check(base_dir, s)).collect()
    }
}

/// Filesystem-event backed detector.
///
/// Parent directories are watched rather than files so that editors replacing
/// a file through rename are still seen.
pub struct NotifyDetector {
    watcher: RecommendedWatcher,
    events: Receiver<PathBuf>,
    watched_dirs: HashSet<PathBuf>,
}

impl NotifyDetector {
    pub fn new() -> KilnResult<Self> {
        let (tx, events) = unbounded();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matches!(
                    event.kind,
                    EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
                ) {
                    for path in event.paths {
                        let _ = tx.send(path);
                    }
                }
            }
            Err(e) => log::warn!("shader watcher error: {:?}", e),
        })
        .map_err(|e| KilnError::Config(format!("failed to create file watcher: {}", e)))?;

        Ok(Self {
            watcher,
            events,
            watched_dirs: HashSet::new(),
        })
    }

    fn watch_parent(&mut self, path: &Path) {
        let Some(dir) = path.parent() else {
            return;
        };
        if self.watched_dirs.insert(dir.to_path_buf()) {
            if let Err(e) = self.watcher.watch(dir, RecursiveMode::NonRecursive) {
                log::warn!("watch failed for {}: {:?}", dir.display(), e);
            }
        }
    }
}

impl ChangeDetector for NotifyDetector {
    fn changed_since(&mut self, base_dir: &Path, sources: &[WatchedSource]) -> Vec<SourceChange> {
        for source in sources {
            self.watch_parent(&base_dir.join(&source.path));
        }

        let touched: Vec<PathBuf> = self.events.try_iter().collect();
        sources
            .iter()
            .filter(|s| s.last_seen.is_none() || touched.iter().any(|p| p.ends_with(&s.path)))
            .filter_map(|s| check(base_dir, s))
            .collect()
    }
}

/// Detector for the configured backend, falling back to polling when the
/// platform watcher cannot be created.
pub fn detector_for(backend: WatchBackend) -> Box<dyn ChangeDetector> {
    match backend {
        WatchBackend::Poll => Box::new(PollingDetector),
        WatchBackend::Notify => match NotifyDetector::new() {
            Ok(detector) => Box::new(detector),
            Err(e) => {
                log::warn!("{}; falling back to polling", e);
                Box::new(PollingDetector)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ShaderDir;
    use std::time::Duration;

    fn watched(id: SourceId, path: &str, last_seen: Option<SystemTime>) -> WatchedSource {
        WatchedSource {
            id,
            path: PathBuf::from(path),
            last_seen,
        }
    }

    // ============================================================
    // PollingDetector
    // ============================================================

    #[test]
    fn test_never_seen_source_is_reported() {
        let dir = ShaderDir::new();
        let stamp = dir.write("a.vert.glsl", "void main() {}", 10);
        let changes = PollingDetector.changed_since(dir.path(), &[watched(0, "a.vert.glsl", None)]);
        assert_eq!(changes, vec![SourceChange { id: 0, stamp }]);
    }

    #[test]
    fn test_unchanged_source_is_not_reported() {
        let dir = ShaderDir::new();
        let stamp = dir.write("a.vert.glsl", "void main() {}", 10);
        let changes =
            PollingDetector.changed_since(dir.path(), &[watched(0, "a.vert.glsl", Some(stamp))]);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_newer_source_is_reported() {
        let dir = ShaderDir::new();
        let old = dir.write("a.vert.glsl", "void main() {}", 10);
        let new = dir.write("a.vert.glsl", "void main() { }", 20);
        assert!(new > old);
        let changes =
            PollingDetector.changed_since(dir.path(), &[watched(3, "a.vert.glsl", Some(old))]);
        assert_eq!(changes, vec![SourceChange { id: 3, stamp: new }]);
    }

    #[test]
    fn test_missing_source_reported_once() {
        let dir = ShaderDir::new();
        let changes = PollingDetector.changed_since(dir.path(), &[watched(0, "nope.frag.glsl", None)]);
        assert_eq!(changes, vec![SourceChange { id: 0, stamp: UNIX_EPOCH }]);

        let changes = PollingDetector
            .changed_since(dir.path(), &[watched(0, "nope.frag.glsl", Some(UNIX_EPOCH))]);
        assert!(changes.is_empty());
    }

    // ============================================================
    // NotifyDetector
    // ============================================================

    #[test]
    fn test_notify_reports_never_seen_without_events() {
        let dir = ShaderDir::new();
        let stamp = dir.write("b.frag.glsl", "void main() {}", 5);
        let Ok(mut detector) = NotifyDetector::new() else {
            // No watcher backend available on this host.
            return;
        };
        let changes = detector.changed_since(dir.path(), &[watched(1, "b.frag.glsl", None)]);
        assert_eq!(changes, vec![SourceChange { id: 1, stamp }]);
    }

    #[test]
    fn test_notify_ignores_untouched_sources() {
        let dir = ShaderDir::new();
        let stamp = dir.write("b.frag.glsl", "void main() {}", 5);
        let Ok(mut detector) = NotifyDetector::new() else {
            return;
        };
        // Stamp older than the file, but no event arrived for it.
        let seen = stamp - Duration::from_secs(1);
        let changes = detector.changed_since(dir.path(), &[watched(1, "b.frag.glsl", Some(seen))]);
        assert!(changes.is_empty());
    }
}
