use std::time::Duration;

use thiserror::Error;

use crate::kind::Domain;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    #[error("Failed to start {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("{program} timed out after {}s", after.as_secs_f32())]
    Timeout { program: String, after: Duration },

    #[error("{program} exited with {}{}", exit_label(*code), stderr_summary(stderr))]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Unparseable {backend} output at line {line_no}: {line}")]
    Parse {
        backend: &'static str,
        line_no: usize,
        line: String,
    },

    #[error("Elevation failed: {0}")]
    Privilege(PrivilegeFailure),

    #[error("{}", unsupported_message(*domain, *backend, operation))]
    UnsupportedBackend {
        domain: Domain,
        backend: Option<&'static str>,
        operation: &'static str,
    },

    #[error("Refused: {0}")]
    DomainInvariant(String),

    #[error("Invalid {field}: {reason}")]
    InvalidArgument { field: &'static str, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error ({kind}): {message}")]
    Io {
        kind: std::io::ErrorKind,
        message: String,
    },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeFailure {
    #[error("a credential is required")]
    CredentialRequired,
    #[error("the credential was rejected")]
    CredentialRejected,
    #[error("the account is not allowed to elevate")]
    NotPermitted,
}

/// Machine-checkable error category for front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Spawn,
    Timeout,
    NonZeroExit,
    Parse,
    Privilege,
    UnsupportedBackend,
    DomainInvariant,
    InvalidArgument,
    Cancelled,
    Io,
}

impl ErrorKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spawn => "spawn",
            Self::Timeout => "timeout",
            Self::NonZeroExit => "non-zero-exit",
            Self::Parse => "parse",
            Self::Privilege => "privilege",
            Self::UnsupportedBackend => "unsupported-backend",
            Self::DomainInvariant => "domain-invariant",
            Self::InvalidArgument => "invalid-argument",
            Self::Cancelled => "cancelled",
            Self::Io => "io",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AdminError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Spawn { .. } => ErrorKind::Spawn,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::NonZeroExit { .. } => ErrorKind::NonZeroExit,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Privilege(_) => ErrorKind::Privilege,
            Self::UnsupportedBackend { .. } => ErrorKind::UnsupportedBackend,
            Self::DomainInvariant(_) => ErrorKind::DomainInvariant,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io { .. } => ErrorKind::Io,
        }
    }

    pub fn no_backend(domain: Domain, operation: &'static str) -> Self {
        Self::UnsupportedBackend {
            domain,
            backend: None,
            operation,
        }
    }

    pub fn unsupported(domain: Domain, backend: &'static str, operation: &'static str) -> Self {
        Self::UnsupportedBackend {
            domain,
            backend: Some(backend),
            operation,
        }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            reason: reason.into(),
        }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self::DomainInvariant(message.into())
    }
}

impl From<std::io::Error> for AdminError {
    fn from(err: std::io::Error) -> Self {
        AdminError::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

fn exit_label(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

const STDERR_SUMMARY_LIMIT: usize = 160;

/// Last meaningful stderr line, so the message stays one line long.
fn stderr_summary(stderr: &str) -> String {
    let Some(line) = stderr
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| !line.is_empty() && !line.starts_with("WARNING: apt does not have"))
    else {
        return String::new();
    };

    if line.chars().count() > STDERR_SUMMARY_LIMIT {
        let cut: String = line.chars().take(STDERR_SUMMARY_LIMIT).collect();
        format!(": {cut}…")
    } else {
        format!(": {line}")
    }
}

fn unsupported_message(domain: Domain, backend: Option<&str>, operation: &str) -> String {
    match backend {
        Some(backend) => format!("{operation} is not supported by {backend}"),
        None => format!("No {domain} backend detected (needed for {operation})"),
    }
}
