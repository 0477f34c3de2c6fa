//! Line-oriented access to host configuration files
//!
//! Every edit Shipwright makes is a full read-modify-write of one plain-text
//! file. ConfigStore holds the file as the exact line sequence it was read
//! as; mutations touch single lines and everything else is written back
//! verbatim, trailing newline included.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// A config file held as its ordered line sequence
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    lines: Vec<String>,
}

impl ConfigStore {
    /// Read a file into its line sequence.
    ///
    /// A file ending in a newline keeps a final empty element, so joining
    /// the sequence back with `\n` reproduces the file byte for byte.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::StoreUnreadable {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            lines: content.split('\n').map(str::to_string).collect(),
        })
    }

    /// Lines as read, in file order
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Splice a line in before `index`
    pub fn insert_line(&mut self, index: usize, line: impl Into<String>) {
        self.lines.insert(index, line.into());
    }

    /// Overwrite the line at `index`
    pub fn replace_line(&mut self, index: usize, line: impl Into<String>) {
        self.lines[index] = line.into();
    }

    /// Append a line, keeping the trailing newline if the file had one
    pub fn push_line(&mut self, line: impl Into<String>) {
        match self.lines.last().map(String::as_str) {
            Some("") => {
                let index = self.lines.len() - 1;
                self.lines.insert(index, line.into());
            }
            _ => self.lines.push(line.into()),
        }
    }

    /// Write the line sequence back to the file it was read from
    pub fn save(&self) -> Result<()> {
        fs::write(&self.path, self.lines.join("\n")).map_err(|e| Error::StoreUnwritable {
            path: self.path.clone(),
            source: e,
        })
    }
}
