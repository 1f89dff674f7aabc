//! File name filters for directory watches.

use std::path::Path;

use regex::Regex;

use crate::error::{MonitorError, Result};

/// Filter applied to the file name of every change under a watched directory.
#[derive(Debug, Clone)]
pub enum PathFilter {
    /// Match everything.
    All,

    /// Regular expression matched against the whole file name.
    Regex(Regex),

    /// Glob pattern matched against the file name.
    Glob(glob::Pattern),
}

impl PathFilter {
    /// Parse a filter string.
    ///
    /// An empty string or `.*` matches everything. Anything else is compiled
    /// as a regular expression anchored to the full file name; strings that
    /// are not valid regular expressions but are valid globs (such as
    /// `*.txt`) are used as globs.
    pub fn parse(filter: &str) -> Result<Self> {
        if filter.is_empty() || filter == ".*" {
            return Ok(Self::All);
        }

        match Regex::new(&format!("^(?:{filter})$")) {
            Ok(regex) => Ok(Self::Regex(regex)),
            Err(regex_err) => glob::Pattern::new(filter).map(Self::Glob).map_err(|glob_err| {
                MonitorError::InvalidArgument(format!(
                    "filter {filter:?} is neither a regex ({regex_err}) nor a glob ({glob_err})"
                ))
            }),
        }
    }

    /// Whether a change at `path` passes the filter.
    pub fn matches(&self, path: &Path) -> bool {
        let name = match path.file_name() {
            Some(name) => name.to_string_lossy(),
            None => return matches!(self, Self::All),
        };

        match self {
            Self::All => true,
            Self::Regex(regex) => regex.is_match(&name),
            Self::Glob(pattern) => pattern.matches(&name),
        }
    }
}
