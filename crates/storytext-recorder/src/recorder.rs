//! The recorder - decides what enters the script and in what order
//!
//! Every occurrence a toolkit adapter observes goes through
//! [`ScriptRecorder::write_event`]. From there a line is either written to
//! every open script straight away, held back as a pending state change, or
//! queued at its delay level until lower levels have been written.

use crate::app_events::{ApplicationEvent, ApplicationEventRegistry, DEFAULT_CATEGORY};
use crate::config::RecorderConfig;
use crate::error::Error;
use crate::events::{EventHandle, Occurrence, AUTO_PREFIX, SIGNAL_COMMAND, WAIT_COMMAND};
use crate::shortcut::ShortcutScript;
use crate::storage::RecordScript;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// The recorder as shared with signal and polling threads
pub type SharedRecorder = Arc<Mutex<ScriptRecorder>>;

/// A state change that has not been confirmed as final yet
#[derive(Debug)]
struct StateChangeInfo {
    output: String,
    event: EventHandle,
    delay: u32,
}

#[derive(Debug, Default)]
enum RecorderState {
    #[default]
    Idle,
    PendingStateChange(StateChangeInfo),
}

#[derive(Debug)]
enum DelaySource {
    User(EventHandle),
    Application(Vec<ApplicationEvent>),
}

#[derive(Debug)]
struct DelayedEntry {
    line: String,
    delay: u32,
    source: DelaySource,
}

#[derive(Debug, Default)]
pub struct ScriptRecorder {
    scripts: Vec<RecordScript>,
    /// Event names never written to the topmost script, usually the
    /// controls of recording itself
    blocked_top_level: HashSet<String>,
    suspended: bool,
    app_events: ApplicationEventRegistry,
    state: RecorderState,
    delayed: Vec<DelayedEntry>,
    has_auto_recordings: bool,
}

impl ScriptRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RecorderConfig) -> Self {
        let mut recorder = Self::new();
        if let Some(path) = &config.record_script {
            recorder.add_script(path);
        }
        recorder
    }

    pub fn into_shared(self) -> SharedRecorder {
        Arc::new(Mutex::new(self))
    }

    pub fn is_active(&self) -> bool {
        !self.scripts.is_empty()
    }

    pub fn add_script(&mut self, path: impl AsRef<Path>) {
        debug!(path = %path.as_ref().display(), "recording to script");
        self.scripts.push(RecordScript::new(path));
    }

    pub fn scripts(&self) -> &[RecordScript] {
        &self.scripts
    }

    /// Pops the topmost script, e.g. when a nested use case ends. Only
    /// returned if it ever recorded something.
    pub fn terminate_script(&mut self) -> Option<RecordScript> {
        let mut script = self.scripts.pop()?;
        script.close();
        script.has_recorded().then_some(script)
    }

    pub fn close_scripts(&mut self) {
        if let RecorderState::PendingStateChange(info) = &self.state {
            warn!(line = %info.output, "closing with an unconfirmed state change, not recorded");
        }
        if !self.delayed.is_empty() {
            debug!(count = self.delayed.len(), "writing delayed events before closing");
            let queued = std::mem::take(&mut self.delayed);
            self.write_in_level_order(queued);
        }
        for script in &mut self.scripts {
            script.close();
        }
    }

    pub fn block_top_level(&mut self, event_name: impl Into<String>) {
        self.blocked_top_level.insert(event_name.into());
    }

    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Whether any `Auto.` line has been recorded
    pub fn has_auto_recordings(&self) -> bool {
        self.has_auto_recordings
    }

    pub fn register_shortcut(&mut self, shortcut: Arc<ShortcutScript>) {
        for script in &mut self.scripts {
            script.register_shortcut(shortcut.clone());
        }
    }

    pub fn write_event(&mut self, occurrence: &Occurrence) {
        if self.scripts.is_empty() || self.suspended {
            debug!("received event, but recording is disabled or suspended");
            return;
        }
        let event = &occurrence.event;
        debug!(event = event.name(), "event for recording");

        if !occurrence.should_record() {
            debug!(args = ?occurrence.args, "told we should not record it");
            if event.check_previous_when_rejected() {
                if let RecorderState::PendingStateChange(info) = &self.state {
                    if occurrence.implies(&info.output, info.event.as_ref()) {
                        debug!("discarded event implies previous state change, ignoring previous also");
                        self.state = RecorderState::Idle;
                    }
                }
            }
            return;
        }

        let delay = occurrence.delay_level();
        if let RecorderState::PendingStateChange(info) = std::mem::take(&mut self.state) {
            if delay >= info.delay && occurrence.implies(&info.output, info.event.as_ref()) {
                debug!(line = %info.output, "implies previous state change event, ignoring previous");
            } else {
                self.record_or_delay(info.output, info.delay, DelaySource::User(info.event));
            }
        }

        let output = occurrence.output_for_script();
        self.write_application_events();

        if event.is_state_change() && delay >= self.max_stored_delay() {
            debug!(line = %output, delay, "storing up state change event");
            self.state = RecorderState::PendingStateChange(StateChangeInfo {
                output,
                event: event.clone(),
                delay,
            });
        } else if self.record_or_delay(output, delay, DelaySource::User(event.clone())) {
            self.drain_delayed();
        }
    }

    /// Writes `receive signal NAME`, preceded by any pending application events
    pub fn record_signal(&mut self, signal_name: &str) {
        self.write_application_events();
        self.record(&format!("{} {}", SIGNAL_COMMAND, signal_name), None);
        self.drain_delayed();
    }

    pub fn register_application_event(
        &mut self,
        name: &str,
        category: Option<&str>,
        superseded_by: &[String],
        delay: u32,
    ) {
        let floor = self.max_stored_delay();
        self.app_events
            .register(name, category, superseded_by, delay, floor);
    }

    pub fn application_event_rename(
        &mut self,
        old_name: &str,
        new_name: &str,
        old_category: Option<&str>,
        new_category: Option<&str>,
    ) {
        self.app_events
            .rename(old_name, new_name, old_category, new_category);
    }

    pub fn application_event_delay(&mut self, name: &str) {
        self.app_events.delay_event(name);
    }

    pub fn unregister_application_event<F>(&mut self, pred: F) -> bool
    where
        F: Fn(&str, u32) -> bool,
    {
        self.app_events.unregister(pred)
    }

    pub fn application_events(&self) -> &ApplicationEventRegistry {
        &self.app_events
    }

    /// Highest delay level currently queued, 0 if none
    pub fn max_stored_delay(&self) -> u32 {
        self.delayed.iter().map(|e| e.delay).max().unwrap_or(0)
    }

    pub fn has_pending_state_change(&self) -> bool {
        matches!(self.state, RecorderState::PendingStateChange(_))
    }

    fn write_application_events(&mut self) -> bool {
        let Some(wait) = self.app_events.take_pending() else {
            return false;
        };
        let line = format!("{} {}", WAIT_COMMAND, wait.description());
        self.record_or_delay(line, wait.delay, DelaySource::Application(wait.events));
        true
    }

    /// Writes now and returns true at level 0, otherwise queues the line
    fn record_or_delay(&mut self, line: String, delay: u32, source: DelaySource) -> bool {
        if delay > 0 {
            debug!(line = %line, delay, "delaying event");
            self.delayed.push(DelayedEntry { line, delay, source });
            return false;
        }
        let event = match &source {
            DelaySource::User(e) => Some(e),
            DelaySource::Application(_) => None,
        };
        self.record(&line, event);
        true
    }

    /// Empties the queue. Levels are released in ascending order; whatever
    /// the chain of releases did not reach is written after them.
    fn drain_delayed(&mut self) {
        let queued = std::mem::take(&mut self.delayed);
        let leftover = self.process_delayed(queued, 1);
        self.write_in_level_order(leftover);
    }

    fn write_in_level_order(&mut self, mut entries: Vec<DelayedEntry>) {
        entries.sort_by_key(|e| e.delay);
        for entry in entries {
            debug!(line = %entry.line, delay = entry.delay, "writing delayed event above drained levels");
            let event = match &entry.source {
                DelaySource::User(e) => Some(e),
                DelaySource::Application(_) => None,
            };
            self.record(&entry.line, event);
        }
    }

    /// Releases `level` entries in arrival order. Each user event written
    /// that is not itself a state change releases the next level from the
    /// entries seen so far. Returns whatever is still waiting.
    fn process_delayed(&mut self, entries: Vec<DelayedEntry>, level: u32) -> Vec<DelayedEntry> {
        if entries.is_empty() {
            return entries;
        }
        debug!(level, count = entries.len(), "processing delayed events");
        let last = entries.len() - 1;
        let mut next_level = Vec::new();
        let mut leftover = Vec::new();
        for (i, entry) in entries.into_iter().enumerate() {
            if entry.delay != level {
                next_level.push(entry);
                continue;
            }
            match entry.source {
                DelaySource::Application(events) if i == last => {
                    self.restore_delayed_app_events(level, events)
                }
                DelaySource::Application(_) => self.record(&entry.line, None),
                DelaySource::User(event) => {
                    self.record(&entry.line, Some(&event));
                    if !event.is_state_change() {
                        let waiting = std::mem::take(&mut next_level);
                        leftover.extend(self.process_delayed(waiting, level + 1));
                    }
                }
            }
        }
        leftover.extend(next_level);
        leftover
    }

    /// A wait line was the last thing queued at its level. It is not written
    /// yet: its events go back into the registry one level lower, where
    /// later application events can still supersede them.
    fn restore_delayed_app_events(&mut self, level: u32, mut events: Vec<ApplicationEvent>) {
        debug!(level, "restoring delayed application events");
        events.sort_by_key(|e| e.category != DEFAULT_CATEGORY);
        for event in events {
            self.app_events
                .register(&event.name, Some(&event.category), &[], level - 1, 0);
        }
    }

    fn record(&mut self, line: &str, event: Option<&EventHandle>) {
        debug!(line, "recording");
        self.has_auto_recordings |= line.starts_with(AUTO_PREFIX);
        let blocked = event.is_some_and(|e| self.blocked_top_level.contains(e.name()));
        let count = if blocked {
            self.scripts.len().saturating_sub(1)
        } else {
            self.scripts.len()
        };
        for script in &mut self.scripts[..count] {
            if let Err(e) = script.record(line) {
                let err = Error::sink_write(
                    &script.path().display().to_string(),
                    line,
                    &format!("{:#}", e),
                );
                error!(code = ?err.code, "{}", err.message);
            }
        }
    }
}
