//! Authentication of an import run
//!
//! A run logs in before touching the repository and logs out during
//! finalization. The login context is held for the whole run.

use crate::error::SetupError;

/// Authenticated context of one run
pub trait LoginContext: Send {
    /// Principal the run acts as
    fn principal(&self) -> &str;

    fn logout(self: Box<Self>);
}

/// Source of login contexts
pub trait Authenticator: Send + Sync {
    fn login(&self) -> Result<Box<dyn LoginContext>, SetupError>;
}

/// Authenticator that always succeeds as the system principal
#[derive(Debug, Default, Clone)]
pub struct Anonymous;

struct SystemLogin;

impl LoginContext for SystemLogin {
    fn principal(&self) -> &str {
        "system"
    }

    fn logout(self: Box<Self>) {
        tracing::trace!("System login released");
    }
}

impl Authenticator for Anonymous {
    fn login(&self) -> Result<Box<dyn LoginContext>, SetupError> {
        Ok(Box::new(SystemLogin))
    }
}
