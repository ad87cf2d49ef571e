use std::fmt;

/// Why the proxy subprocess did not report a bound port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    Spawn(String),
    Stderr(String),
    Exited(Option<i32>),
    Cancelled,
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn(msg) => write!(f, "Failed to start proxy: {msg}"),
            Self::Stderr(msg) => write!(f, "Proxy reported an error: {msg}"),
            Self::Exited(Some(code)) => write!(f, "Proxy exited with status {code} before binding a port"),
            Self::Exited(None) => write!(f, "Proxy exited before binding a port"),
            Self::Cancelled => write!(f, "Proxy start was cancelled"),
        }
    }
}

impl std::error::Error for ProxyError {}
