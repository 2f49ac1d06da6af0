//! Optimistic client for the shelf service.
//!
//! A [`Reconciler`] keeps a TTL-bounded [`Mirror`] of sibling lists, applies predicted
//! mutations immediately, and reconciles with the server once a [`Transport`] answers.

use tabshelf_core::ErrorKind;

pub mod cache;
pub mod config;
pub mod reconciler;
pub mod transport;

pub use cache::Mirror;
pub use config::{ClientConfig, DEFAULT_CACHE_TTL};
pub use reconciler::{
    placeholder_resource, placeholder_section, placeholder_space, placeholder_workspace,
    Reconciler, Ticket,
};
pub use transport::{Action, HttpEntity, HttpTransport, Outcome, Transport};

/// Failure of a client action. Both variants roll the optimistic state back the same way.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("server rejected request ({}): {message}", kind.as_str())]
    Rejected { kind: ErrorKind, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
}

impl ClientError {
    /// Server-side classification, `None` for network failures.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Rejected { kind, .. } => Some(*kind),
            Self::Transport(_) => None,
        }
    }
}
