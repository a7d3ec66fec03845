//! Optional diagnostic log file.
//!
//! Without a path no subscriber is installed and every `tracing` event in the
//! crate is a disabled callsite.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;

use crate::error::{Error, Result};

pub fn init(log_file: Option<&Path>) -> Result<()> {
    let Some(path) = log_file.filter(|path| !path.as_os_str().is_empty()) else {
        return Ok(());
    };

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| Error::LogFile {
            path: path.to_path_buf(),
            source,
        })?;

    tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .with_max_level(Level::DEBUG)
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_path_installs_nothing() {
        assert!(init(None).is_ok());
    }

    #[test]
    fn empty_path_disables_logging() {
        assert!(init(Some(Path::new(""))).is_ok());
    }

    #[test]
    fn unopenable_path_is_reported() {
        let path = std::env::temp_dir()
            .join("lid-lock-missing-dir")
            .join("nested")
            .join("lid.log");
        let err = init(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::LogFile { .. }));
    }
}
