//! # storytext
//!
//! Record GUI use cases as plain-text scripts a tester can read.
//!
//! An application (or its toolkit adapter) creates one [`ScriptEngine`]
//! at start-up, reports each user event to it and tells it whenever the
//! application reaches a point a replay would have to wait for. The script
//! ends up containing domain-level commands rather than mouse coordinates.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use storytext::prelude::*;
//!
//! // USECASE_RECORD_SCRIPT=/tmp/usecase enables recording
//! let mut engine = ScriptEngine::from_env()?;
//! engine.application_event("main window shown", None, &[], 0);
//! engine.shutdown();
//! # Ok::<(), storytext::Error>(())
//! ```

pub mod engine;

pub use engine::{ScriptEngine, REPLAY_TIME_DELAY};

// Re-export the recording core
pub use storytext_recorder as recorder;
pub use storytext_recorder::{Error, ErrorCode, EventHandle, Occurrence, RecorderConfig, Result, UserEvent};

pub mod prelude {
    pub use crate::engine::{ScriptEngine, REPLAY_TIME_DELAY};
    pub use storytext_recorder::prelude::*;
}
