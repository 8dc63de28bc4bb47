//! Reader for the keyed config format: UTF-8 text with `[section]`
//! headers and `key=value` lines. Comments start with `#`. Layer data
//! rows are pulled through `raw_line` because they are not keyed.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub struct FileParser {
    lines: Vec<String>,
    cursor: usize,
    path: PathBuf,

    pub section: String,
    pub new_section: bool,
    pub key: String,
    pub val: String,
    pub line_number: usize,
}

impl FileParser {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("FileParser: cannot open '{}'", path.display()))?;
        let reader = BufReader::new(file);
        let lines = reader
            .lines()
            .collect::<std::io::Result<Vec<_>>>()
            .with_context(|| format!("FileParser: read error in '{}'", path.display()))?;
        Ok(Self::from_lines(lines, path.to_path_buf()))
    }

    /// Parse from an in-memory string. Used by tests and script buffers.
    pub fn from_string(content: &str) -> Self {
        let lines = content.lines().map(str::to_string).collect();
        Self::from_lines(lines, PathBuf::from("<memory>"))
    }

    fn from_lines(lines: Vec<String>, path: PathBuf) -> Self {
        Self {
            lines,
            cursor: 0,
            path,
            section: String::new(),
            new_section: false,
            key: String::new(),
            val: String::new(),
            line_number: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Advance to the next `key=value` line. Returns false at end of file.
    pub fn next(&mut self) -> bool {
        self.new_section = false;

        while self.cursor < self.lines.len() {
            let line = self.lines[self.cursor].trim().to_string();
            self.cursor += 1;
            self.line_number = self.cursor;

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                self.section = line[1..line.len() - 1].trim().to_string();
                self.new_section = true;
                continue;
            }

            if let Some(eq) = line.find('=') {
                self.key = line[..eq].trim().to_string();
                self.val = line[eq + 1..].trim().to_string();
                return true;
            }

            self.error(&format!("line is neither a section nor a key: '{}'", line));
        }
        false
    }

    /// Read the next line verbatim, without key/value splitting.
    /// Used for `[layer] data=` rows.
    pub fn raw_line(&mut self) -> Option<String> {
        if self.cursor < self.lines.len() {
            let line = self.lines[self.cursor].clone();
            self.cursor += 1;
            self.line_number = self.cursor;
            Some(line)
        } else {
            None
        }
    }

    /// Log a data error with file position context. The directive is
    /// skipped; loading continues.
    pub fn error(&self, msg: &str) {
        log::error!(
            "{}:{} [{}] {}={}: {}",
            self.path.display(),
            self.line_number,
            self.section,
            self.key,
            self.val,
            msg
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_and_keys() {
        let mut p = FileParser::from_string(
            "# a comment\n\
             [header]\n\
             width=8\n\
             height=4\n\
             \n\
             [layer]\n\
             type=collision\n",
        );
        assert!(p.next());
        assert!(p.new_section);
        assert_eq!(p.section, "header");
        assert_eq!((p.key.as_str(), p.val.as_str()), ("width", "8"));
        assert!(p.next());
        assert!(!p.new_section);
        assert_eq!((p.key.as_str(), p.val.as_str()), ("height", "4"));
        assert!(p.next());
        assert!(p.new_section);
        assert_eq!(p.section, "layer");
        assert_eq!(p.val, "collision");
        assert!(!p.next());
    }

    #[test]
    fn raw_lines_follow_data_key() {
        let mut p = FileParser::from_string("[layer]\ndata=\n1,2,3,\n4,5,6,\n");
        assert!(p.next());
        assert_eq!(p.key, "data");
        assert_eq!(p.raw_line().unwrap(), "1,2,3,");
        assert_eq!(p.raw_line().unwrap(), "4,5,6,");
        assert!(p.raw_line().is_none());
    }

    #[test]
    fn values_may_contain_equals() {
        let mut p = FileParser::from_string("[s]\nk=a=b\n");
        assert!(p.next());
        assert_eq!(p.val, "a=b");
    }
}
