//! Session identity

use crate::error::ConfigResult;
use crate::validation::{validate_required_string, Validatable};
use serde::{Deserialize, Serialize};

/// `(session, username)` attached to every emitted header, plus how the
/// kernel is hosted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub session_id: String,
    pub username: String,
    /// Running inside a host process: shutdown returns control to the host
    /// instead of exiting.
    #[serde(default = "crate::domains::utils::default_false")]
    pub embedded: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            username: "kernel".to_string(),
            embedded: false,
        }
    }
}

impl Validatable for SessionConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.session_id, "session_id", self.domain_name())?;
        validate_required_string(&self.username, "username", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "session"
    }
}
