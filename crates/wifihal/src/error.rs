//! Error types for HAL operations.
//!
//! Two layers live here. [`Error`] is the rich Rust error carried through
//! `Result`; [`WifiError`] is the flat status taxonomy HAL callers and the
//! control socket speak. [`Error::status`] projects the former onto the latter.

use std::fmt;
use std::io;

/// Result type for HAL operations.
pub type Result<T> = std::result::Result<T, Error>;

/// HAL status codes (mirrors `wifi_error`).
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WifiError {
    Success = 0,
    Unknown = -1,
    Uninitialized = -2,
    NotSupported = -3,
    NotAvailable = -4,
    InvalidArgs = -5,
    InvalidRequestId = -6,
    TimedOut = -7,
    TooManyRequests = -8,
    OutOfMemory = -9,
    Busy = -10,
}

impl WifiError {
    /// Numeric status code.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Check if this status is a success.
    pub fn is_success(self) -> bool {
        self == WifiError::Success
    }
}

impl fmt::Display for WifiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WifiError::Success => "success",
            WifiError::Unknown => "unknown error",
            WifiError::Uninitialized => "uninitialized",
            WifiError::NotSupported => "not supported",
            WifiError::NotAvailable => "not available",
            WifiError::InvalidArgs => "invalid arguments",
            WifiError::InvalidRequestId => "invalid request id",
            WifiError::TimedOut => "timed out",
            WifiError::TooManyRequests => "too many requests",
            WifiError::OutOfMemory => "out of memory",
            WifiError::Busy => "busy",
        };
        write!(f, "{} ({})", name, self.code())
    }
}

/// Map a kernel status (negative errno, as carried in `nlmsgerr`) to a HAL status.
pub fn map_kernel_error(err: i32) -> WifiError {
    if err >= 0 {
        return WifiError::Success;
    }
    match -err {
        libc::EOPNOTSUPP => WifiError::NotSupported,
        libc::EAGAIN => WifiError::NotAvailable,
        libc::EINVAL => WifiError::InvalidArgs,
        libc::ETIMEDOUT => WifiError::TimedOut,
        libc::ENOMEM => WifiError::OutOfMemory,
        libc::EBUSY => WifiError::Busy,
        libc::ENOBUFS => WifiError::TooManyRequests,
        _ => WifiError::Unknown,
    }
}

fn strerror(errno: &i32) -> io::Error {
    io::Error::from_raw_os_error(*errno)
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Socket, sysfs and control socket failures.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Config file parsing.
    #[error("config: {0}")]
    Json(#[from] serde_json::Error),

    /// The kernel or driver answered with a negative errno.
    #[error("{context}: {} (errno {errno})", strerror(.errno))]
    Kernel {
        /// Positive errno.
        errno: i32,
        /// What was being done when it failed.
        context: String,
    },

    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("malformed netlink message: {0}")]
    InvalidMessage(String),

    #[error("malformed attribute: {0}")]
    InvalidAttribute(String),

    #[error("invalid argument: {0}")]
    InvalidArgs(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    /// Adding to a request would push it past its size limit.
    #[error("request would grow to {size} bytes, limit is {limit}")]
    MessageTooLarge { size: usize, limit: usize },

    /// A request was used before `create()` or after it was sent.
    #[error("request has not been created")]
    NotCreated,

    #[error("timed out waiting for the driver")]
    TimedOut,

    /// Before `initialize` or after `cleanup`.
    #[error("HAL is not initialized")]
    Uninitialized,

    #[error("no generic netlink family named {name}")]
    FamilyNotFound { name: String },

    #[error("no interface named {name}")]
    InterfaceNotFound { name: String },

    /// Control socket protocol violation.
    #[error("control socket: {0}")]
    Ctrl(String),
}

impl Error {
    /// Kernel error from the negative errno carried in an `NLMSG_ERROR`.
    pub fn from_errno(errno: i32) -> Self {
        Self::Kernel {
            errno: -errno,
            context: "kernel error".into(),
        }
    }

    /// Name the operation a kernel error came from. Other errors pass
    /// through untouched.
    pub fn with_context(self, operation: impl Into<String>) -> Self {
        match self {
            Self::Kernel { errno, .. } => Self::Kernel {
                errno,
                context: operation.into(),
            },
            other => other,
        }
    }

    /// Positive errno behind a kernel or I/O error.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel { errno, .. } => Some(*errno),
            Self::Io(e) => e.raw_os_error(),
            _ => None,
        }
    }

    /// Project this error onto the HAL status taxonomy.
    pub fn status(&self) -> WifiError {
        match self {
            Self::Kernel { .. } | Self::Io(_) => self
                .errno()
                .map_or(WifiError::Unknown, |errno| map_kernel_error(-errno)),
            Self::InvalidArgs(_) | Self::InterfaceNotFound { .. } => WifiError::InvalidArgs,
            Self::NotSupported(_) => WifiError::NotSupported,
            Self::MessageTooLarge { .. } => WifiError::OutOfMemory,
            Self::TimedOut => WifiError::TimedOut,
            Self::Uninitialized => WifiError::Uninitialized,
            Self::Json(_)
            | Self::Truncated { .. }
            | Self::InvalidMessage(_)
            | Self::InvalidAttribute(_)
            | Self::NotCreated
            | Self::FamilyNotFound { .. }
            | Self::Ctrl(_) => WifiError::Unknown,
        }
    }

    pub fn is_not_supported(&self) -> bool {
        self.status() == WifiError::NotSupported
    }

    /// ENOENT or ENODEV from the kernel, or a failed name lookup.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Kernel { errno, .. } => matches!(*errno, libc::ENOENT | libc::ENODEV),
            Self::InterfaceNotFound { .. } | Self::FamilyNotFound { .. } => true,
            _ => false,
        }
    }
}
