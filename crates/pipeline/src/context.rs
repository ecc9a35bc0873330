//! Shared processing context.
//!
//! Every worker spawned for one pipeline run shares a single context holding
//! the run name and the cancellation token the workers select against.

use tokio_util::sync::CancellationToken;

/// Shared context for one pipeline run.
#[derive(Debug, Clone)]
pub struct Context {
    /// Name of the pipeline run, used in log output.
    pub name: String,
    /// The cancellation token
    pub token: CancellationToken,
}

impl Context {
    /// Create a new context with the specified cancellation token.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            name: "pipeline".to_string(),
            token,
        }
    }

    pub fn with_name(name: impl Into<String>, token: CancellationToken) -> Self {
        Self {
            name: name.into(),
            token,
        }
    }

    /// Derive the context handed to workers: same name, child token.
    ///
    /// Cancelling the parent token cancels the child, but not the other way
    /// around, so a failing run never cancels its caller.
    pub(crate) fn child(&self) -> Self {
        Self {
            name: self.name.clone(),
            token: self.token.child_token(),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}
