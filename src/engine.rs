//! The script engine - what an application talks to
//!
//! Owns the recording core for the lifetime of the process: the recorder
//! shared with background threads, the signal interceptor and any file
//! pollers. Dropping the engine shuts everything down once.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use storytext_recorder::prelude::*;
use storytext_recorder::FilePoller;
use tracing::{debug, info};

/// Pause the replayer uses when it is driven by time rather than events
pub const REPLAY_TIME_DELAY: Duration = Duration::from_millis(1);

pub struct ScriptEngine {
    config: RecorderConfig,
    recorder: Option<SharedRecorder>,
    #[cfg(unix)]
    interceptor: Option<SignalInterceptor>,
    pollers: Vec<FilePoller>,
    shut_down: bool,
}

impl ScriptEngine {
    pub fn new(config: RecorderConfig) -> Result<Self> {
        let recorder = config
            .record_script
            .is_some()
            .then(|| ScriptRecorder::from_config(&config).into_shared());

        #[cfg(unix)]
        let interceptor = match &recorder {
            Some(shared) if config.intercept_signals => Some(SignalInterceptor::install(shared.clone())?),
            _ => None,
        };

        if let Some(path) = &config.record_script {
            info!(path = %path.display(), "recording use case");
        }

        Ok(Self {
            config,
            recorder,
            #[cfg(unix)]
            interceptor,
            pollers: Vec::new(),
            shut_down: false,
        })
    }

    /// Reads `USECASE_RECORD_SCRIPT` and friends
    pub fn from_env() -> Result<Self> {
        Self::new(RecorderConfig::from_env()?)
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn recorder(&self) -> Option<&SharedRecorder> {
        self.recorder.as_ref()
    }

    pub fn recorder_active(&self) -> bool {
        self.recorder.is_some()
    }

    pub fn replayer_active(&self) -> bool {
        self.config.replay_script.is_some()
    }

    pub fn write_event(&self, occurrence: &Occurrence) {
        if let Some(recorder) = &self.recorder {
            recorder.lock().write_event(occurrence);
        }
    }

    /// Tells the recorder the application reached a point the replayer must
    /// wait for. Safe to call from any thread.
    pub fn application_event(
        &self,
        name: &str,
        category: Option<&str>,
        superseded_by: &[String],
        delay: u32,
    ) {
        if let Some(recorder) = &self.recorder {
            recorder
                .lock()
                .register_application_event(name, category, superseded_by, delay);
        }
    }

    pub fn application_event_rename(
        &self,
        old_name: &str,
        new_name: &str,
        old_category: Option<&str>,
        new_category: Option<&str>,
    ) {
        if old_category == new_category {
            return;
        }
        if let Some(recorder) = &self.recorder {
            recorder
                .lock()
                .application_event_rename(old_name, new_name, old_category, new_category);
        }
    }

    pub fn application_event_delay(&self, name: &str) {
        if let Some(recorder) = &self.recorder {
            recorder.lock().application_event_delay(name);
        }
    }

    /// Loads a shortcut file. A file that can't be read is an error even when
    /// nothing is being recorded.
    pub fn register_shortcut(&self, path: impl AsRef<Path>) -> Result<()> {
        let shortcut = Arc::new(ShortcutScript::load(path)?);
        debug!(shortcut = shortcut.shortcut_name(), "registered shortcut");
        if let Some(recorder) = &self.recorder {
            recorder.lock().register_shortcut(shortcut);
        }
        Ok(())
    }

    /// Records `event_name` as an application event once `path` appears or
    /// disappears. Returns false when not recording.
    pub fn poll_file(&mut self, path: impl AsRef<Path>, event_name: Option<&str>) -> bool {
        let Some(recorder) = &self.recorder else {
            return false;
        };
        self.pollers
            .push(FilePoller::start(path, event_name, recorder.clone()));
        true
    }

    /// Events occurring while suspended are not recorded
    pub fn suspend(&self) {
        if let Some(recorder) = &self.recorder {
            recorder.lock().suspend();
        }
    }

    pub fn resume(&self) {
        if let Some(recorder) = &self.recorder {
            recorder.lock().resume();
        }
    }

    /// Stops pollers and signal interception, then closes every script.
    /// Only the first call does anything.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for poller in self.pollers.drain(..) {
            poller.stop();
        }
        #[cfg(unix)]
        if let Some(interceptor) = self.interceptor.take() {
            interceptor.uninstall();
        }
        if let Some(recorder) = &self.recorder {
            recorder.lock().close_scripts();
            debug!("recording closed");
        }
    }
}

impl Drop for ScriptEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
