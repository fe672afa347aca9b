//! Polls for a file appearing or disappearing and reports it as an
//! application event

use crate::recorder::SharedRecorder;
use crossbeam_channel::{bounded, select, tick, Sender};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::debug;

pub const FILE_POLL_CATEGORY: &str = "file poll";
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to a polling thread. Dropping it tells the thread to stop without
/// waiting for it; `stop` also joins.
pub struct FilePoller {
    stop: Sender<()>,
    thread: Option<thread::JoinHandle<bool>>,
}

impl FilePoller {
    /// Waits for `path` to flip between existing and not existing, then
    /// registers `event_name` (default `"<path> to be updated"`).
    pub fn start(path: impl AsRef<Path>, event_name: Option<&str>, recorder: SharedRecorder) -> Self {
        Self::with_interval(path, event_name, recorder, POLL_INTERVAL)
    }

    pub fn with_interval(
        path: impl AsRef<Path>,
        event_name: Option<&str>,
        recorder: SharedRecorder,
        interval: Duration,
    ) -> Self {
        let path: PathBuf = path.as_ref().to_path_buf();
        let event_name = event_name
            .map(String::from)
            .unwrap_or_else(|| format!("{} to be updated", path.display()));
        let start_state = path.exists();
        let (stop, stop_rx) = bounded::<()>(1);
        let ticker = tick(interval);

        let thread = thread::spawn(move || loop {
            select! {
                recv(stop_rx) -> _ => return false,
                recv(ticker) -> _ => {
                    if path.exists() != start_state {
                        debug!(path = %path.display(), event = %event_name, "file poll fired");
                        recorder.lock().register_application_event(
                            &event_name,
                            Some(FILE_POLL_CATEGORY),
                            &[],
                            0,
                        );
                        return true;
                    }
                }
            }
        });

        Self {
            stop,
            thread: Some(thread),
        }
    }

    /// Stops polling; true if the event had already been registered
    pub fn stop(mut self) -> bool {
        let _ = self.stop.try_send(());
        self.thread
            .take()
            .map(|t| t.join().unwrap_or(false))
            .unwrap_or(false)
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for FilePoller {
    fn drop(&mut self) {
        let _ = self.stop.try_send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::ScriptRecorder;
    use std::fs;
    use std::time::Instant;

    #[test]
    fn registers_event_when_file_appears() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("flag");
        let recorder = ScriptRecorder::new().into_shared();
        let poller = FilePoller::with_interval(&watched, Some("flag raised"), recorder.clone(), Duration::from_millis(10));

        fs::write(&watched, "x").unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !poller.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(poller.stop());
        let guard = recorder.lock();
        let entry = guard.application_events().get(FILE_POLL_CATEGORY).unwrap();
        assert_eq!(entry.name, "flag raised");
    }

    #[test]
    fn stop_before_change_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = ScriptRecorder::new().into_shared();
        let poller = FilePoller::start(dir.path().join("never"), None, recorder.clone());
        assert!(!poller.stop());
        assert!(recorder.lock().application_events().is_empty());
    }

    #[test]
    fn dropped_poller_stops_watching() {
        let dir = tempfile::tempdir().unwrap();
        let watched = dir.path().join("flag");
        let recorder = ScriptRecorder::new().into_shared();
        let poller = FilePoller::with_interval(&watched, None, recorder.clone(), Duration::from_millis(10));
        drop(poller);
        thread::sleep(Duration::from_millis(100));
        fs::write(&watched, "x").unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(recorder.lock().application_events().is_empty());
    }
}
