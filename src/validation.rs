//! Validation for the identifiers accepted at the HTTP edge:
//! `issue_key` and `project_key` (§6). Narrowed from a free-text
//! content validator to a strict identifier allowlist, since every
//! workflow endpoint now only ever receives short project/issue keys,
//! never free-form task content.

use regex::Regex;

use crate::{OrchestratorError, Result};

pub const MAX_KEY_LENGTH: usize = 64;

/// Conservative allowlist: letters, digits, dash, underscore. Covers
/// typical tracker keys (`PROJ-123`) without admitting path separators,
/// quotes, or shell metacharacters.
static SAFE_KEY_REGEX: &str = r"^[A-Za-z0-9_-]+$";

#[derive(Clone)]
pub struct KeyValidator {
    safe_key_regex: Regex,
}

impl KeyValidator {
    pub fn new() -> Result<Self> {
        let safe_key_regex = Regex::new(SAFE_KEY_REGEX).map_err(|e| OrchestratorError::Config(format!("invalid key regex: {e}")))?;
        Ok(Self { safe_key_regex })
    }

    pub fn validate(&self, key: &str) -> Result<()> {
        if key.is_empty() || key.len() > MAX_KEY_LENGTH {
            return Err(OrchestratorError::BadInput {
                message: format!("key must be non-empty and under {MAX_KEY_LENGTH} characters"),
            });
        }
        if !self.safe_key_regex.is_match(key) {
            return Err(OrchestratorError::BadInput {
                message: "key contains invalid characters".to_string(),
            });
        }
        Ok(())
    }
}
