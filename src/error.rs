//! Error taxonomy for boot management.
//!
//! Configuration errors, I/O and device errors, external tool failures and
//! logical mismatches are kept apart so callers can tell "nothing matched"
//! from "the disk said no".

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::caps::Capabilities;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("path does not exist: {0}")]
    NotFound(PathBuf),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot probe {device}: {reason}")]
    Probe { device: PathBuf, reason: String },

    #[error("no bootloader provides the required capabilities ({0})")]
    NoBootloader(Capabilities),

    #[error("cannot initialise bootloader {0}")]
    BootloaderInit(&'static str),

    #[error("no active bootloader")]
    NoActiveBootloader,

    #[error("system configuration is not sane: {0}")]
    InsaneConfig(&'static str),

    #[error("UEFI bootloader {0} did not provide a kernel destination")]
    MissingKernelDestination(&'static str),

    #[error("no kernels discovered in {0}")]
    NoKernels(PathBuf),

    #[error("no matching kernel for {0}")]
    NoMatchingKernel(String),

    #[error("refusing to remove {0}: it is the running kernel")]
    KernelInUse(String),

    #[error("refusing to remove {0}: it is the only kernel")]
    LastKernel(String),

    #[error("queued kernel is no longer present: {0}")]
    StaleQueue(PathBuf),

    #[error("'{program}' failed (exit code {code})")]
    Command { program: String, code: i32 },

    #[error("short write to {device}: expected {expected} bytes, wrote {written}")]
    ShortWrite {
        device: PathBuf,
        expected: usize,
        written: usize,
    },

    #[error("cannot mount {device} on {target}: {source}")]
    Mount {
        device: PathBuf,
        target: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot determine boot device")]
    NoBootDevice,

    #[error("unknown bootloader operation ({0:#x})")]
    UnknownOperation(u32),
}

impl Error {
    /// Wrap an I/O error with a description of what was being attempted.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Logical mismatch, as opposed to an I/O or device failure.
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Error::NoMatchingKernel(_))
    }
}

/// Attach context to `io::Result`s, in the spirit of `anyhow::Context`.
pub trait IoContext<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::io(f(), e))
    }
}
