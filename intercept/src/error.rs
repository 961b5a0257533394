//! Error types for the DNS query tracing library

use std::fmt;

/// Library result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while capturing and attributing DNS queries
#[derive(Debug)]
pub enum Error {
    /// eBPF program loading, attaching or ring buffer error
    Ebpf(Box<dyn std::error::Error + Send + Sync>),
    /// ETW session could not be created or enabled
    Trace(String),
    /// Runtime requirements not met (permissions, kernel version, etc.)
    RuntimeRequirements(String),
    /// Invalid configuration or parameters
    InvalidConfig(String),
    /// The capture thread died without reporting a result
    CaptureThread(String),
    /// I/O error (file operations, etc.)
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Ebpf(e) => write!(f, "eBPF error: {}", e),
            Error::Trace(msg) => write!(f, "ETW trace error: {}", msg),
            Error::RuntimeRequirements(msg) => write!(f, "Runtime requirements not met: {}", msg),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::CaptureThread(msg) => write!(f, "Capture thread failed: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Ebpf(e) => Some(&**e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

#[cfg(target_os = "linux")]
impl From<libbpf_rs::Error> for Error {
    fn from(err: libbpf_rs::Error) -> Self {
        Error::Ebpf(Box::new(err))
    }
}
