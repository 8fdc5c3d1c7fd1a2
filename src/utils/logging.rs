//! Log lines for extract and snapshot files
//!
//! Every file the pipeline reads or writes is logged once when it is opened
//! and once with its row count when it is done.

use std::fmt;
use std::path::Path;
use std::time::Duration;

/// What is being done to a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    Read,
    Write,
}

impl FileAction {
    const fn past(self) -> &'static str {
        match self {
            Self::Read => "Read",
            Self::Write => "Wrote",
        }
    }
}

impl fmt::Display for FileAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "Reading",
            Self::Write => "Writing",
        })
    }
}

pub fn log_file_start(action: FileAction, kind: &str, path: &Path) {
    log::debug!("{action} {kind} file {}", path.display());
}

/// Log a finished read or write with its row count
pub fn log_file_done(action: FileAction, path: &Path, rows: usize, elapsed: Duration) {
    log::info!(
        "{} {rows} rows {} {} in {elapsed:?}",
        action.past(),
        if action == FileAction::Read { "from" } else { "to" },
        path.display()
    );
}
