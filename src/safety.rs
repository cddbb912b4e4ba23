//! Safety gate run before any weapon is touched
//!
//! Checks, in order: platform, superuser session, disclaimer.

use crate::config::{Settings, DISCLAIMER};
use crate::error::{KaboomError, Result};
use crate::host::Host;

pub fn validate(host: &dyn Host, settings: &Settings) -> Result<()> {
    if cfg!(windows) {
        return Err(KaboomError::PlatformUnsupported);
    }

    if !host.session_is_superuser() {
        return Err(KaboomError::InsufficientPrivilege {
            message: "must run this function as a superuser".to_string(),
            hint: None,
        });
    }

    // Exact, case-sensitive match
    if settings.disclaimer.is_empty() || settings.disclaimer != DISCLAIMER {
        return Err(KaboomError::InsufficientPrivilege {
            message: format!(
                "for safety, pg_kaboom.disclaimer must be explicitly set to '{}'",
                DISCLAIMER
            ),
            hint: Some("set it in the [pg_kaboom] table of kaboom.toml or via --disclaimer".to_string()),
        });
    }

    tracing::debug!("safety gate passed");
    Ok(())
}
