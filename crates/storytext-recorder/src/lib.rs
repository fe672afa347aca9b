//! storytext-recorder - Recording core for GUI use-case scripts
//!
//! Turns user-level GUI events into a plain-text script with one domain
//! command per line. Toolkit adapters describe their events through the
//! [`UserEvent`] trait; everything else is toolkit independent.
//!
//! ## What ends up in the script
//!
//! - Each recordable event as `<event name> <argument>`
//! - State changes (typing, selecting) coalesced to their final value
//! - Delayed events after the lower-level events they depend on
//! - `wait for ...` lines for application events the replayer must wait on
//! - `receive signal SIGNAME` lines for OS signals (unix)
//! - Shortcut invocations in place of the commands they stand for

pub mod app_events;
pub mod config;
pub mod error;
pub mod events;
pub mod filepoll;
pub mod recorder;
pub mod shortcut;
#[cfg(unix)]
pub mod signals;
pub mod storage;

pub use app_events::{ApplicationEvent, ApplicationEventRegistry};
pub use config::RecorderConfig;
pub use error::{Error, ErrorCode, Result};
pub use events::{choose_event, EventHandle, Occurrence, UserEvent};
pub use filepoll::FilePoller;
pub use recorder::{ScriptRecorder, SharedRecorder};
pub use shortcut::{ShortcutScript, ShortcutTracker};
#[cfg(unix)]
pub use signals::{AppHandler, Signal, SignalInterceptor, SignalTable};
pub use storage::RecordScript;

pub mod prelude {
    pub use crate::config::RecorderConfig;
    pub use crate::error::{Error, ErrorCode, Result};
    pub use crate::events::{EventHandle, Occurrence, UserEvent};
    pub use crate::recorder::{ScriptRecorder, SharedRecorder};
    pub use crate::shortcut::ShortcutScript;
    #[cfg(unix)]
    pub use crate::signals::{AppHandler, Signal, SignalInterceptor};
}
