//! Record scripts - one line per command, written through to disk
//!
//! The file is only created on the first successful write, so a sink that
//! never records anything leaves no file behind.

use crate::shortcut::{ShortcutScript, ShortcutTracker};
use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub struct RecordScript {
    path: PathBuf,
    file: Option<File>,
    written: bool,
    /// Lines as they currently stand in the file
    history: Vec<String>,
    trackers: Vec<ShortcutTracker>,
}

impl RecordScript {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: None,
            written: false,
            history: Vec::new(),
            trackers: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once anything has been written, even after `close`
    pub fn has_recorded(&self) -> bool {
        self.written
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Lines recorded before registration stay out of the match
    pub fn register_shortcut(&mut self, shortcut: Arc<ShortcutScript>) {
        self.trackers.push(ShortcutTracker::new(shortcut));
    }

    pub fn shortcut_count(&self) -> usize {
        self.trackers.len()
    }

    /// Append a line, then let the shortcut trackers look at it. If one or
    /// more shortcuts complete, the longest wins (earliest registered on a
    /// tie) and the file is rewritten with the invocation in place of the
    /// matched lines.
    pub fn record(&mut self, line: &str) -> Result<()> {
        self.write_line(line)?;
        self.history.push(line.to_string());
        let position = self.history.len() - 1;

        let mut best: Option<usize> = None;
        for i in 0..self.trackers.len() {
            if !self.trackers[i].update_completes(line, position) {
                continue;
            }
            let longer = match best {
                Some(b) => self.trackers[i].is_longer_than(&self.trackers[b]),
                None => true,
            };
            if longer {
                best = Some(i);
            }
        }

        if let Some(b) = best {
            let new_commands = self.trackers[b].get_new_commands(&self.history);
            debug!(
                shortcut = self.trackers[b].shortcut_name(),
                path = %self.path.display(),
                "shortcut completed, rewriting script"
            );
            self.rerecord(&new_commands)?;
            let len = self.history.len();
            for (i, tracker) in self.trackers.iter_mut().enumerate() {
                if i != b {
                    tracker.rerecord(len);
                }
            }
        }
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        let file = match &mut self.file {
            Some(f) => f,
            slot => {
                // reopened after close: keep what is already there
                let opened = if self.written {
                    OpenOptions::new().append(true).open(&self.path)
                } else {
                    File::create(&self.path)
                };
                slot.insert(opened.with_context(|| format!("opening {}", self.path.display()))?)
            }
        };
        writeln!(file, "{}", line)?;
        file.flush()?;
        self.written = true;
        Ok(())
    }

    /// Replace the whole file with `commands`. Written to a sibling temp
    /// file first and renamed over the script.
    pub fn rerecord(&mut self, commands: &[String]) -> Result<()> {
        self.close();
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let tmp = tempfile::NamedTempFile::new_in(&dir)
            .with_context(|| format!("creating temporary file in {}", dir.display()))?;
        {
            let mut w = BufWriter::new(tmp.as_file());
            for command in commands {
                writeln!(w, "{}", command)?;
            }
            w.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .with_context(|| format!("reopening {}", self.path.display()))?;
        self.file = Some(file);
        self.written = true;
        self.history = commands.to_vec();
        Ok(())
    }

    pub fn rename(&mut self, new_path: impl AsRef<Path>) -> Result<()> {
        let new_path = new_path.as_ref().to_path_buf();
        let was_open = self.file.is_some();
        self.close();
        if self.written {
            fs::rename(&self.path, &new_path).with_context(|| {
                format!("renaming {} to {}", self.path.display(), new_path.display())
            })?;
            if was_open {
                self.file = Some(OpenOptions::new().append(true).open(&new_path)?);
            }
        }
        self.path = new_path;
        Ok(())
    }

    pub fn close(&mut self) {
        self.file = None;
    }
}

impl std::fmt::Debug for RecordScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordScript")
            .field("path", &self.path)
            .field("open", &self.file.is_some())
            .field("written", &self.written)
            .field("shortcuts", &self.trackers.len())
            .finish()
    }
}
