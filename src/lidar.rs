// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Common error handling and clock utilities shared by every pipeline stage.

use edgefirst_schemas::builtin_interfaces::Time;
use std::fmt;

/// How the hosting node reacts to an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// The current input unit (datagram or cloud message) is dropped, a
    /// warning is logged and the pipeline continues with the next one.
    Recoverable,
    /// The pipeline instance cannot continue and the process should exit.
    Fatal,
}

/// Common error type for the Velodyne pipeline.
#[derive(Debug)]
pub enum Error {
    /// I/O error (socket, file operations)
    Io(std::io::Error),
    /// Invalid configuration, raised at construction time
    Config(String),
    /// Datagram does not match the expected fixed layout
    MalformedPacket(String),
    /// Input cloud is not in the configured input frame
    FrameMismatch { expected: String, actual: String },
    /// More points passed the filter than the output cloud can hold
    CapacityExceeded { capacity: usize },
    /// Input cloud field layout cannot be interpreted
    InvalidLayout(String),
    /// CDR serialization or deserialization failure
    Serialize(String),
    /// Publish/subscribe transport failure
    Transport(String),
    /// System time error
    SystemTime(std::time::SystemTimeError),
}

impl Error {
    /// Classify the error into the recoverable or fatal channel.
    pub fn severity(&self) -> Severity {
        match self {
            Error::MalformedPacket(_)
            | Error::FrameMismatch { .. }
            | Error::CapacityExceeded { .. }
            | Error::InvalidLayout(_) => Severity::Recoverable,
            Error::Io(_)
            | Error::Config(_)
            | Error::Serialize(_)
            | Error::Transport(_)
            | Error::SystemTime(_) => Severity::Fatal,
        }
    }

    #[inline]
    pub fn is_recoverable(&self) -> bool {
        self.severity() == Severity::Recoverable
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::Config(msg) => write!(f, "configuration error: {}", msg),
            Error::MalformedPacket(msg) => write!(f, "malformed packet: {}", msg),
            Error::FrameMismatch { expected, actual } => write!(
                f,
                "cloud from unexpected frame: expected {}, got {}",
                expected, actual
            ),
            Error::CapacityExceeded { capacity } => {
                write!(f, "overran cloud point capacity of {}", capacity)
            }
            Error::InvalidLayout(msg) => write!(f, "invalid point cloud layout: {}", msg),
            Error::Serialize(msg) => write!(f, "serialization error: {}", msg),
            Error::Transport(msg) => write!(f, "transport error: {}", msg),
            Error::SystemTime(err) => write!(f, "system time error: {}", err),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<std::time::SystemTimeError> for Error {
    fn from(err: std::time::SystemTimeError) -> Self {
        Error::SystemTime(err)
    }
}

/// Get current timestamp in nanoseconds.
///
/// On Linux, uses `CLOCK_MONOTONIC_RAW` for best accuracy.
/// On other platforms, falls back to `SystemTime`.
#[cfg(target_os = "linux")]
pub fn timestamp() -> Result<u64, Error> {
    let mut tp = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let err = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC_RAW, &mut tp) };
    if err != 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    Ok(tp.tv_sec as u64 * 1_000_000_000 + tp.tv_nsec as u64)
}

#[cfg(not(target_os = "linux"))]
pub fn timestamp() -> Result<u64, Error> {
    let now = std::time::SystemTime::now();
    let duration = now.duration_since(std::time::UNIX_EPOCH)?;
    Ok(duration.as_nanos() as u64)
}

/// Convert a nanosecond timestamp into a message header stamp.
#[inline]
pub fn time_from_nanos(nanos: u64) -> Time {
    Time {
        sec: (nanos / 1_000_000_000) as i32,
        nanosec: (nanos % 1_000_000_000) as u32,
    }
}

/// Current time as a message header stamp, zero if the clock is unavailable.
pub fn now() -> Time {
    time_from_nanos(timestamp().unwrap_or(0))
}
