//! Normalization of raw `notify` events into [`ChangeEvent`]s.
//!
//! Pure state machine: it never touches the sink and only stats paths to
//! classify ambiguous events, so it can be driven directly from tests.

use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

use filedeck_core::ChangeEvent;
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind};

/// How long a rename source waits for its destination half.
pub const RENAME_WINDOW: Duration = Duration::from_millis(100);

/// Filename suffixes of editor and download scratch files.
pub const TEMP_SUFFIXES: &[&str] = &[".tmp", ".swp", ".swx"];

/// Trackers of completed renames remembered to drop a trailing `Both`.
const COMPLETED_CAPACITY: usize = 64;

/// Whether `path` names a temporary file that must never be reported.
pub fn is_temp_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| TEMP_SUFFIXES.iter().any(|s| name.ends_with(s)))
}

#[derive(Debug)]
struct PendingRename {
    tracker: Option<usize>,
    path: String,
    since: Instant,
}

/// Converts raw OS events into normalized changes.
#[derive(Debug, Default)]
pub struct EventNormalizer {
    pending: Vec<PendingRename>,
    completed: VecDeque<usize>,
}

impl EventNormalizer {
    /// Create an empty normalizer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw event observed at `now`.
    pub fn push(&mut self, event: &Event, now: Instant) -> Vec<ChangeEvent> {
        let mut out = Vec::new();
        match event.kind {
            EventKind::Create(kind) => {
                for path in &event.paths {
                    let is_dir = match kind {
                        CreateKind::Folder => true,
                        CreateKind::File => false,
                        _ => path.is_dir(),
                    };
                    out.push(ChangeEvent::created(display(path), is_dir));
                }
            }
            EventKind::Remove(kind) => {
                for path in &event.paths {
                    out.push(ChangeEvent::deleted(
                        display(path),
                        matches!(kind, RemoveKind::Folder),
                    ));
                }
            }
            EventKind::Modify(ModifyKind::Name(mode)) => self.rename(event, mode, now, &mut out),
            EventKind::Modify(_) => {
                for path in &event.paths {
                    if !path.is_dir() {
                        out.push(ChangeEvent::modified(display(path)));
                    }
                }
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
        }
        out.into_iter().filter_map(filter_temp).collect()
    }

    /// Flush rename sources whose destination never arrived as `deleted`.
    pub fn expire(&mut self, now: Instant) -> Vec<ChangeEvent> {
        let mut out = Vec::new();
        self.pending.retain(|p| {
            if now.duration_since(p.since) >= RENAME_WINDOW {
                out.push(ChangeEvent::deleted(p.path.clone(), false));
                false
            } else {
                true
            }
        });
        out.into_iter().filter_map(filter_temp).collect()
    }

    /// Earliest instant at which [`expire`](Self::expire) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().map(|p| p.since + RENAME_WINDOW).min()
    }

    fn rename(&mut self, event: &Event, mode: RenameMode, now: Instant, out: &mut Vec<ChangeEvent>) {
        let tracker = event.tracker();
        match mode {
            RenameMode::From => {
                if let Some(path) = event.paths.first() {
                    self.pending.push(PendingRename {
                        tracker,
                        path: display(path),
                        since: now,
                    });
                }
            }
            RenameMode::To => {
                let Some(to) = event.paths.first() else {
                    return;
                };
                match self.take_pending(tracker) {
                    Some(from) => {
                        self.complete(tracker);
                        out.push(ChangeEvent::moved(from.path, display(to), to.is_dir()));
                    }
                    None => out.push(ChangeEvent::created(display(to), to.is_dir())),
                }
            }
            RenameMode::Both => {
                let [from, to, ..] = event.paths.as_slice() else {
                    return;
                };
                if tracker.is_some_and(|t| self.completed.contains(&t)) {
                    return;
                }
                let from_str = display(from);
                self.pending.retain(|p| p.path != from_str);
                self.complete(tracker);
                out.push(ChangeEvent::moved(from_str, display(to), to.is_dir()));
            }
            RenameMode::Any | RenameMode::Other => {
                for path in &event.paths {
                    if path.exists() {
                        out.push(ChangeEvent::created(display(path), path.is_dir()));
                    } else {
                        out.push(ChangeEvent::deleted(display(path), false));
                    }
                }
            }
        }
    }

    fn take_pending(&mut self, tracker: Option<usize>) -> Option<PendingRename> {
        let tracker = tracker?;
        let idx = self.pending.iter().position(|p| p.tracker == Some(tracker))?;
        Some(self.pending.remove(idx))
    }

    fn complete(&mut self, tracker: Option<usize>) {
        if let Some(t) = tracker {
            if self.completed.len() == COMPLETED_CAPACITY {
                let _ = self.completed.pop_front();
            }
            self.completed.push_back(t);
        }
    }
}

/// Drop temp-file noise; a move from a temp name to a real one is a create.
fn filter_temp(event: ChangeEvent) -> Option<ChangeEvent> {
    if is_temp_path(Path::new(&event.path)) {
        return None;
    }
    match &event.previous_path {
        Some(prev) if is_temp_path(Path::new(prev)) => {
            Some(ChangeEvent::created(event.path, event.is_directory))
        }
        _ => Some(event),
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use filedeck_core::ChangeKind;
    use notify::event::{AccessKind, DataChange};
    use std::path::PathBuf;

    fn ev(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    fn rename(mode: RenameMode, path: &str, tracker: usize) -> Event {
        ev(EventKind::Modify(ModifyKind::Name(mode)), &[path]).set_tracker(tracker)
    }

    #[test]
    fn temp_suffixes() {
        assert!(is_temp_path(Path::new("/srv/a.tmp")));
        assert!(is_temp_path(Path::new(".notes.txt.swp")));
        assert!(is_temp_path(Path::new("x.swx")));
        assert!(!is_temp_path(Path::new("/srv/tmp/real.txt")));
        assert!(!is_temp_path(Path::new("/srv/tmpfile")));
    }

    #[test]
    fn create_and_remove() {
        let mut n = EventNormalizer::new();
        let now = Instant::now();
        let out = n.push(&ev(EventKind::Create(CreateKind::Folder), &["/w/dir"]), now);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, ChangeKind::Created);
        assert!(out[0].is_directory);

        let out = n.push(&ev(EventKind::Remove(RemoveKind::File), &["/w/a.txt"]), now);
        assert_eq!(out[0].kind, ChangeKind::Deleted);
        assert!(!out[0].is_directory);
    }

    #[test]
    fn temp_files_are_dropped() {
        let mut n = EventNormalizer::new();
        let now = Instant::now();
        for kind in [
            EventKind::Create(CreateKind::File),
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            EventKind::Remove(RemoveKind::File),
        ] {
            assert!(n.push(&ev(kind, &["/w/x.tmp"]), now).is_empty());
        }
    }

    #[test]
    fn directory_modifications_are_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "x").unwrap();
        let mut n = EventNormalizer::new();
        let kind = EventKind::Modify(ModifyKind::Data(DataChange::Any));

        let dir_event = Event::new(kind).add_path(dir.path().to_path_buf());
        assert!(n.push(&dir_event, Instant::now()).is_empty());

        let file_event = Event::new(kind).add_path(file.clone());
        let out = n.push(&file_event, Instant::now());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, ChangeKind::Modified);
    }

    #[test]
    fn access_events_are_ignored() {
        let mut n = EventNormalizer::new();
        let out = n.push(&ev(EventKind::Access(AccessKind::Any), &["/w/a"]), Instant::now());
        assert!(out.is_empty());
    }

    #[test]
    fn rename_pair_becomes_one_move() {
        let mut n = EventNormalizer::new();
        let now = Instant::now();
        assert!(n.push(&rename(RenameMode::From, "/w/a.txt", 7), now).is_empty());
        assert!(n.next_deadline().is_some());

        let out = n.push(&rename(RenameMode::To, "/w/b.txt", 7), now);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, ChangeKind::Moved);
        assert_eq!(out[0].previous_path.as_deref(), Some("/w/a.txt"));
        assert_eq!(out[0].path, "/w/b.txt");

        let both = ev(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/w/a.txt", "/w/b.txt"],
        )
        .set_tracker(7);
        assert!(n.push(&both, now).is_empty());
        assert!(n.next_deadline().is_none());
    }

    #[test]
    fn both_without_halves_is_a_move() {
        let mut n = EventNormalizer::new();
        let both = ev(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/w/old", "/w/new"],
        );
        let out = n.push(&both, Instant::now());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, ChangeKind::Moved);
    }

    #[test]
    fn unpaired_source_expires_as_deleted() {
        let mut n = EventNormalizer::new();
        let start = Instant::now();
        let _ = n.push(&rename(RenameMode::From, "/w/gone.txt", 1), start);
        assert!(n.expire(start).is_empty());

        let out = n.expire(start + RENAME_WINDOW);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, ChangeKind::Deleted);
        assert_eq!(out[0].path, "/w/gone.txt");
        assert!(n.next_deadline().is_none());
    }

    #[test]
    fn lone_destination_is_created() {
        let mut n = EventNormalizer::new();
        let out = n.push(&rename(RenameMode::To, "/w/arrived.txt", 3), Instant::now());
        assert_eq!(out[0].kind, ChangeKind::Created);
    }

    #[test]
    fn move_from_temp_is_created_and_to_temp_is_dropped() {
        let mut n = EventNormalizer::new();
        let now = Instant::now();
        let _ = n.push(&rename(RenameMode::From, "/w/doc.txt.tmp", 4), now);
        let out = n.push(&rename(RenameMode::To, "/w/doc.txt", 4), now);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].kind, ChangeKind::Created);
        assert!(out[0].previous_path.is_none());

        let _ = n.push(&rename(RenameMode::From, "/w/real.txt", 5), now);
        assert!(n.push(&rename(RenameMode::To, "/w/real.txt.swp", 5), now).is_empty());
    }
}
