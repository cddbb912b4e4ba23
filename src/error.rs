//! Error taxonomy for weapon dispatch
//!
//! Every precondition failure aborts the whole call. Unrecognized operation
//! names are deliberately NOT represented here: they degrade to a notice and
//! a `false` return (see `arsenal::Kaboom::kaboom`).

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KaboomError {
    #[error("function not supported on Windows (aren't things already broken enough?)")]
    PlatformUnsupported,

    #[error("{message}")]
    InsufficientPrivilege {
        message: String,
        hint: Option<String>,
    },

    #[error("{0} not found")]
    ConfigurationMissing(String),

    #[error("{message}")]
    InvalidArgument {
        message: String,
        hint: Option<String>,
    },

    #[error("'{}' is not a writable directory", .0.display())]
    NotWritableDirectory(PathBuf),

    #[error("syntax error in \"{statement}\": {detail}")]
    SyntaxError { statement: String, detail: String },

    #[error("unsupported backend category: '{name}'")]
    UnsupportedCategory { name: String, hint: String },

    /// Unrecoverable; callers must stop the process.
    #[error("{0}")]
    Fatal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl KaboomError {
    pub fn invalid(message: impl Into<String>) -> Self {
        KaboomError::InvalidArgument {
            message: message.into(),
            hint: None,
        }
    }

    /// Optional hint listing valid alternatives
    pub fn hint(&self) -> Option<&str> {
        match self {
            KaboomError::InsufficientPrivilege { hint, .. }
            | KaboomError::InvalidArgument { hint, .. } => hint.as_deref(),
            KaboomError::UnsupportedCategory { hint, .. } => Some(hint),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, KaboomError::Fatal(_))
    }
}

#[cfg(unix)]
impl From<nix::errno::Errno> for KaboomError {
    fn from(errno: nix::errno::Errno) -> Self {
        KaboomError::Io(errno.into())
    }
}

pub type Result<T> = std::result::Result<T, KaboomError>;
