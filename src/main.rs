//! This program creates a message-only window in order to register for
//! lid switch, monitor power and monitor removal notifications. Once every
//! display is gone from a local session we lock the workstation.
#![cfg_attr(windows, windows_subsystem = "windows")]
#![cfg_attr(not(windows), allow(dead_code))]

mod census;
mod daemon;
mod engine;
mod error;
mod event;
mod logging;
#[cfg(windows)]
mod wynapi;

use std::ffi::OsString;
use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "lid-lock", version, about)]
struct Args {
    /// Append diagnostic log lines to this file. Every word on the command
    /// line is part of the path.
    #[arg(
        value_name = "LOG_FILE",
        num_args = 0..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    words: Vec<OsString>,
}

impl Args {
    /// Only `--help` and `--version` stop the program here. Anything clap
    /// rejects is taken verbatim as the log path, so every invocation reaches
    /// the singleton check.
    fn from_command_line<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        match Self::try_parse_from(args.iter().cloned()) {
            Ok(parsed) => Ok(parsed),
            Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                Err(err)
            }
            Err(_) => Ok(Self {
                words: args.into_iter().skip(1).collect(),
            }),
        }
    }

    fn log_file(&self) -> Option<PathBuf> {
        let mut path = OsString::new();
        for (index, word) in self.words.iter().enumerate() {
            if index > 0 {
                path.push(" ");
            }
            path.push(word);
        }
        (!path.is_empty()).then(|| PathBuf::from(path))
    }
}

fn main() {
    let args = match Args::from_command_line(std::env::args_os()) {
        Ok(args) => args,
        Err(err) => err.exit(),
    };

    // Computed in its own call so the singleton handle is closed before exit
    let code = run(args.log_file());
    std::process::exit(code);
}

#[cfg(windows)]
fn run(log_file: Option<PathBuf>) -> i32 {
    daemon::run(&wynapi::Win32, log_file.as_deref())
}

#[cfg(not(windows))]
fn run(_log_file: Option<PathBuf>) -> i32 {
    eprintln!("lid-lock only runs on Windows");
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_file(args: &[&str]) -> Option<PathBuf> {
        Args::from_command_line(args.iter().copied())
            .unwrap()
            .log_file()
    }

    #[test]
    fn log_file_is_optional() {
        assert_eq!(log_file(&["lid-lock"]), None);
    }

    #[test]
    fn single_word_is_the_log_file() {
        assert_eq!(
            log_file(&["lid-lock", "C:\\Temp\\lidlock.log"]),
            Some(PathBuf::from("C:\\Temp\\lidlock.log"))
        );
    }

    #[test]
    fn unquoted_words_are_joined_into_one_path() {
        assert_eq!(
            log_file(&["lid-lock", "C:\\My", "Logs\\lid.log"]),
            Some(PathBuf::from("C:\\My Logs\\lid.log"))
        );
    }

    #[test]
    fn dash_prefixed_path_is_accepted() {
        assert_eq!(log_file(&["lid-lock", "-lid.log"]), Some(PathBuf::from("-lid.log")));
        assert_eq!(
            log_file(&["lid-lock", "--debug", "lid.log"]),
            Some(PathBuf::from("--debug lid.log"))
        );
    }

    #[test]
    fn help_still_stops_before_the_daemon() {
        let err = Args::from_command_line(["lid-lock", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }
}
