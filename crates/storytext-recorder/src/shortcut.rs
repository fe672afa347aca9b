//! Shortcuts - named macros matched against the live recorded stream
//!
//! A shortcut file holds the script lines it replaces. A `$` in a command
//! matches any text; whatever it matched is substituted into the `$`
//! markers of the shortcut name when the invocation line is written.

use crate::error::{Error, Result};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// A shortcut's reference sequence, read once from disk
#[derive(Debug)]
pub struct ShortcutScript {
    path: PathBuf,
    name: String,
    commands: Vec<String>,
    pointer: usize,
}

impl ShortcutScript {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let shown = path.display().to_string();
        if !path.is_file() {
            return Err(Error::shortcut_unreadable(&shown, "no such file"));
        }
        let text = fs::read_to_string(path)
            .map_err(|e| Error::shortcut_unreadable(&shown, &e.to_string()))?;
        let commands = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(String::from)
            .collect();
        Ok(Self::from_commands(path, commands))
    }

    pub fn from_commands(path: impl AsRef<Path>, commands: Vec<String>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = shortcut_name(&path);
        Self {
            path,
            name,
            commands,
            pointer: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name as the user wrote it: file stem with `_` as spaces
    pub fn shortcut_name(&self) -> &str {
        &self.name
    }

    /// The invocation line, with captured arguments filled in
    pub fn shortcut_name_with_args(&self, args: &[String]) -> String {
        let mut name = self.name.to_lowercase();
        for arg in args {
            name = name.replacen('$', arg, 1);
        }
        name
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Next expected command, or `None` once the end is reached
    pub fn get_command(&mut self) -> Option<&str> {
        let command = self.commands.get(self.pointer)?;
        self.pointer += 1;
        Some(command)
    }

    /// Commands consumed before the one most recently returned
    pub fn commands_so_far(&self) -> &[String] {
        &self.commands[..self.pointer.saturating_sub(1)]
    }

    pub fn has_terminated(&self) -> bool {
        self.pointer >= self.commands.len()
    }

    pub fn rewind(&mut self) {
        self.pointer = 0;
    }
}

fn shortcut_name(path: &Path) -> String {
    let base = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = base.split('.').next().unwrap_or_default();
    stem.replace('_', " ").replace('#', "_")
}

fn command_pattern(command: &str) -> Option<Regex> {
    let parts: Vec<String> = command.split('$').map(regex::escape).collect();
    Regex::new(&format!("^{}$", parts.join("(.*)"))).ok()
}

/// Online matcher for one shortcut on one sink.
///
/// The sink owns the recorded history; the tracker only remembers where in
/// it the current partial match began. Completing the shortcut replaces
/// everything from there on with the invocation line.
#[derive(Debug)]
pub struct ShortcutTracker {
    script: Arc<ShortcutScript>,
    patterns: Vec<Regex>,
    /// Index of the next command to match
    next: usize,
    /// History position of the first matched line
    match_start: usize,
    args_used: Vec<String>,
}

impl ShortcutTracker {
    pub fn new(script: Arc<ShortcutScript>) -> Self {
        let patterns = script
            .commands()
            .iter()
            .map(|c| command_pattern(c))
            .collect::<Option<Vec<_>>>()
            .unwrap_or_else(|| {
                warn!(shortcut = script.shortcut_name(), "shortcut commands don't compile, it will never match");
                Vec::new()
            });
        Self {
            script,
            patterns,
            next: 0,
            match_start: 0,
            args_used: Vec::new(),
        }
    }

    pub fn shortcut_name(&self) -> &str {
        self.script.shortcut_name()
    }

    /// Total commands in the reference sequence
    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }

    pub fn is_longer_than(&self, other: &ShortcutTracker) -> bool {
        self.len() > other.len()
    }

    fn reset(&mut self) {
        self.next = 0;
        self.args_used.clear();
    }

    fn has_started(&self) -> bool {
        self.next > 0
    }

    fn is_complete(&self) -> bool {
        !self.patterns.is_empty() && self.next == self.patterns.len()
    }

    /// Feeds the line recorded at `position` in the sink's history; true once
    /// the whole shortcut has matched.
    pub fn update_completes(&mut self, line: &str, position: usize) -> bool {
        if self.is_complete() {
            debug!(shortcut = self.shortcut_name(), "ignoring, nothing left to match");
            return false;
        }
        let Some(pattern) = self.patterns.get(self.next) else {
            return false;
        };
        if let Some(caps) = pattern.captures(line) {
            if self.next == 0 {
                self.match_start = position;
            }
            self.args_used.extend(
                caps.iter()
                    .skip(1)
                    .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default()),
            );
            self.next += 1;
            debug!(shortcut = self.shortcut_name(), line, "matched");
            return self.is_complete();
        }
        if self.has_started() {
            self.reset();
            debug!(shortcut = self.shortcut_name(), line, "reset after partial match");
            return self.update_completes(line, position);
        }
        false
    }

    /// The rewritten history: lines before the match followed by the
    /// invocation
    pub fn get_new_commands(&mut self, history: &[String]) -> Vec<String> {
        let invocation = self.script.shortcut_name_with_args(&self.args_used);
        let start = self.match_start.min(history.len());
        let mut commands = history[..start].to_vec();
        commands.push(invocation);
        self.reset();
        commands
    }

    /// Another tracker on the same sink completed and the history now has
    /// `history_len` lines. A partial match survives only if it began
    /// before the rewritten tail.
    pub fn rerecord(&mut self, history_len: usize) {
        if self.is_complete() || (self.has_started() && self.match_start >= history_len) {
            self.reset();
        }
    }

    /// True when no match is in progress and the next line must be the first command
    pub fn is_at_start(&self) -> bool {
        !self.has_started()
    }
}
