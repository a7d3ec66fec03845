//! Error type shared by the daemon and its Win32 bindings.

use std::path::PathBuf;

/// Everything that can go wrong while talking to the OS.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A Win32 call failed. `message` is the `FormatMessageA` text for `code`.
    #[error("{call}: [{code}] {message}")]
    Win32 {
        call: &'static str,
        code: u32,
        message: String,
    },

    #[error("cannot open log file {}: {source}", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Object names are handed to the OS as C strings.
    #[error("object name {0:?} contains a NUL byte")]
    InvalidName(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn win32_error_reads_like_the_log_line() {
        let err = Error::Win32 {
            call: "LockWorkStation",
            code: 5,
            message: "Access is denied.".to_string(),
        };
        assert_eq!(err.to_string(), "LockWorkStation: [5] Access is denied.");
    }

    #[test]
    fn log_file_error_keeps_its_source() {
        let err = Error::LogFile {
            path: PathBuf::from("C:\\nowhere\\lid.log"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("lid.log"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
