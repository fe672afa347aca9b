//! The event contract every recordable occurrence implements
//!
//! Toolkit adapters implement [`UserEvent`] for each widget signal they
//! observe and hand the recorder an [`Occurrence`]: the event plus the raw
//! arguments the toolkit supplied. The occurrence is resolved once, at the
//! adapter boundary, and the recorder never searches arguments for events.

use crate::error::{Error, Result};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Prefix of the barrier line written for application events
pub const WAIT_COMMAND: &str = "wait for";
/// Prefix of the line written when the process receives an OS signal
pub const SIGNAL_COMMAND: &str = "receive signal";
/// Lines starting with this denote auto-generated (unnamed) events
pub const AUTO_PREFIX: &str = "Auto.";

/// Raw arguments from the toolkit, kept opaque to the recorder
pub type EventArgs = [Value];

/// Shared handle to an event definition
pub type EventHandle = Arc<dyn UserEvent>;

/// A user action on a GUI, usually tied to one widget and named by the
/// application programmer.
///
/// The recorder calls [`should_record`](UserEvent::should_record) and writes
/// nothing if it returns false, so widgets whose state did not change in a
/// meaningful way can stay silent. Otherwise
/// [`output_for_script`](UserEvent::output_for_script) is written. The
/// replayer calls [`generate`](UserEvent::generate) to simulate the event
/// again.
pub trait UserEvent: Send + Sync {
    fn name(&self) -> &str;

    fn should_record(&self, _args: &EventArgs) -> bool {
        true
    }

    /// Must parse back into the same event on the replay side
    fn output_for_script(&self, _args: &EventArgs) -> String {
        self.name().to_string()
    }

    fn generate(&self, argument: &str) -> Result<()> {
        let description = if argument.is_empty() {
            self.name().to_string()
        } else {
            format!("{} {}", self.name(), argument)
        };
        Err(Error::script_error(&description))
    }

    /// State-change events are held back and only written once a different
    /// occurrence arrives, so only the final value is recorded.
    fn is_state_change(&self) -> bool {
        false
    }

    /// 0 writes immediately; N waits until everything below N has drained.
    fn delay_level(&self, _args: &EventArgs) -> u32 {
        0
    }

    /// If true, a pending state change immediately followed by this
    /// occurrence is dropped.
    fn implies(&self, _prior_output: &str, prior_event: &dyn UserEvent, _args: &EventArgs) -> bool {
        std::ptr::addr_eq(self as *const Self, prior_event as *const dyn UserEvent)
    }

    /// Consult `implies` even when `should_record` rejected the occurrence
    fn check_previous_when_rejected(&self) -> bool {
        false
    }

    fn is_preferred(&self) -> bool {
        false
    }

    fn warning(&self) -> Option<String> {
        None
    }
}

impl fmt::Debug for dyn UserEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserEvent({:?})", self.name())
    }
}

/// One observed event firing, bundled with its raw arguments
#[derive(Debug, Clone)]
pub struct Occurrence {
    pub event: EventHandle,
    pub args: Vec<Value>,
}

impl Occurrence {
    pub fn new(event: EventHandle, args: Vec<Value>) -> Self {
        Self { event, args }
    }

    pub fn bare(event: EventHandle) -> Self {
        Self::new(event, Vec::new())
    }

    pub fn should_record(&self) -> bool {
        self.event.should_record(&self.args)
    }

    pub fn output_for_script(&self) -> String {
        self.event.output_for_script(&self.args)
    }

    pub fn delay_level(&self) -> u32 {
        self.event.delay_level(&self.args)
    }

    pub fn implies(&self, prior_output: &str, prior_event: &dyn UserEvent) -> bool {
        self.event.implies(prior_output, prior_event, &self.args)
    }
}

/// When several events match one occurrence, a preferred one wins outright,
/// otherwise the first candidate is taken.
pub fn choose_event(candidates: &[EventHandle]) -> Option<&EventHandle> {
    candidates
        .iter()
        .find(|e| e.is_preferred())
        .or_else(|| candidates.first())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scriptable events shared by the recorder tests

    use super::*;

    #[derive(Debug, Default, Clone)]
    pub struct TestEvent {
        pub name: String,
        pub state_change: bool,
        pub delay: u32,
        pub preferred: bool,
        pub check_rejected: bool,
    }

    impl TestEvent {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                ..Default::default()
            }
        }

        pub fn state_change(mut self) -> Self {
            self.state_change = true;
            self
        }

        pub fn delayed(mut self, level: u32) -> Self {
            self.delay = level;
            self
        }

        pub fn check_rejected(mut self) -> Self {
            self.check_rejected = true;
            self
        }

        pub fn handle(self) -> EventHandle {
            Arc::new(self)
        }
    }

    /// First argument is the rendered value, `null` means "don't record"
    impl UserEvent for TestEvent {
        fn name(&self) -> &str {
            &self.name
        }

        fn should_record(&self, args: &EventArgs) -> bool {
            !matches!(args.first(), Some(Value::Null))
        }

        fn output_for_script(&self, args: &EventArgs) -> String {
            match args.first() {
                Some(Value::String(s)) => format!("{} {}", self.name, s),
                _ => self.name.clone(),
            }
        }

        fn is_state_change(&self) -> bool {
            self.state_change
        }

        fn delay_level(&self, _args: &EventArgs) -> u32 {
            self.delay
        }

        fn check_previous_when_rejected(&self) -> bool {
            self.check_rejected
        }

        fn is_preferred(&self) -> bool {
            self.preferred
        }
    }

    pub fn occ(event: &EventHandle, value: &str) -> Occurrence {
        Occurrence::new(event.clone(), vec![Value::String(value.to_string())])
    }
}
