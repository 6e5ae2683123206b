//! Idempotent line-oriented file edits: ensure a line is present (replacing
//! the last match) or absent. Files are only rewritten when something
//! actually changed.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use regex::Regex;

use crate::error::BootstrapError;

/// How a line is selected: by regex search or by exact content comparison
/// (ignoring trailing line terminators).
pub enum Matcher {
    Pattern(Regex),
    Exact(String),
}

impl Matcher {
    pub fn pattern(pattern: &str) -> Result<Self, BootstrapError> {
        let re = Regex::new(pattern).map_err(|e| BootstrapError::Config {
            message: format!("invalid pattern '{pattern}': {e}"),
        })?;
        Ok(Matcher::Pattern(re))
    }

    pub fn exact(line: &str) -> Self {
        Matcher::Exact(line.to_string())
    }

    fn matches(&self, line: &str) -> bool {
        let stripped = line.trim_end_matches(['\r', '\n']);
        match self {
            Matcher::Pattern(re) => re.is_match(stripped),
            Matcher::Exact(exact) => exact == stripped,
        }
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>, BootstrapError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path).map_err(|e| BootstrapError::Io {
        context: format!("reading {}", path.display()),
        source: e,
    })?;
    Ok(content.split_inclusive('\n').map(String::from).collect())
}

fn write_lines(path: &Path, lines: &[String]) -> Result<(), BootstrapError> {
    let mut file = File::create(path).map_err(|e| BootstrapError::Io {
        context: format!("opening {} for writing", path.display()),
        source: e,
    })?;
    for line in lines {
        file.write_all(line.as_bytes())
            .map_err(|e| BootstrapError::Io {
                context: format!("writing {}", path.display()),
                source: e,
            })?;
    }
    file.flush().map_err(|e| BootstrapError::Io {
        context: format!("flushing {}", path.display()),
        source: e,
    })?;
    Ok(())
}

/// Ensure `line` is present in the file. If the matcher hits, the *last*
/// matching line is replaced; otherwise the line is appended. Exactly one
/// line is ever added or changed. Returns whether the file was modified.
pub fn present(path: &Path, matcher: &Matcher, line: &str) -> Result<bool, BootstrapError> {
    let mut lines = read_lines(path)?;

    let last_match = lines.iter().rposition(|l| matcher.matches(l));
    let new_line = format!("{line}\n");

    let changed = match last_match {
        Some(idx) => {
            if lines[idx] == new_line {
                false
            } else {
                lines[idx] = new_line;
                true
            }
        }
        None => {
            // Ensure the previous final line has a terminator before appending
            if let Some(last) = lines.last()
                && !last.ends_with('\n')
            {
                let fixed = format!("{last}\n");
                *lines.last_mut().expect("non-empty") = fixed;
            }
            lines.push(new_line);
            true
        }
    };

    if changed {
        write_lines(path, &lines)?;
    }
    Ok(changed)
}

/// Remove every line the matcher hits. Returns whether the file was modified.
pub fn absent(path: &Path, matcher: &Matcher) -> Result<bool, BootstrapError> {
    if !path.exists() {
        return Ok(false);
    }
    let lines = read_lines(path)?;
    let kept: Vec<String> = lines
        .iter()
        .filter(|l| !matcher.matches(l))
        .cloned()
        .collect();

    let changed = kept.len() != lines.len();
    if changed {
        write_lines(path, &kept)?;
    }
    Ok(changed)
}
