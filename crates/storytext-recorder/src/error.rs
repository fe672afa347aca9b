//! Structured errors for the recording core

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("[{code:?}] {message}")]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// An event could not regenerate its occurrence during replay
    ScriptError,
    /// A shortcut file could not be read when registering it
    ShortcutUnreadable,
    SinkWrite,
    SignalInstall,
    InvalidConfig,
    Unknown,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            suggestions: Vec::new(),
            context: None,
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn script_error(description: &str) -> Self {
        Self::new(
            ErrorCode::ScriptError,
            format!("Don't know how to generate for '{}'", description),
        )
    }

    pub fn shortcut_unreadable(path: &str, reason: &str) -> Self {
        Self::new(
            ErrorCode::ShortcutUnreadable,
            format!("Cannot read shortcut '{}': {}", path, reason),
        )
        .with_suggestions(vec![
            "Check the shortcut file exists and is readable text".to_string(),
        ])
    }

    pub fn sink_write(path: &str, line: &str, reason: &str) -> Self {
        Self::new(
            ErrorCode::SinkWrite,
            format!("Unable to record '{}' to file '{}': {}", line, path, reason),
        )
    }

    pub fn signal_install(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::SignalInstall, reason)
    }

    pub fn invalid_config(var: &str, value: &str) -> Self {
        Self::new(
            ErrorCode::InvalidConfig,
            format!("Invalid value '{}' for {}", value, var),
        )
        .with_context(serde_json::json!({ "variable": var, "value": value }))
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Self::new(ErrorCode::Unknown, format!("{:#}", e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorCode::Unknown, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let e = Error::script_error("click OK");
        assert_eq!(e.to_string(), "[ScriptError] Don't know how to generate for 'click OK'");
    }

    #[test]
    fn serializes_for_tooling() {
        let e = Error::invalid_config("USECASE_REPLAY_DELAY", "soon");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["code"], "INVALID_CONFIG");
        assert_eq!(json["context"]["variable"], "USECASE_REPLAY_DELAY");
        assert!(json.get("suggestions").is_none());
    }
}
