//! Shared-secret check guarding the stage endpoints.

use super::error::PipelineError;

/// Header carrying the internal secret on every stage call
pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";

#[derive(Clone)]
pub struct InternalAuth {
    secret: String,
}

impl InternalAuth {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Check a presented credential; an unconfigured secret rejects everything
    pub fn verify(&self, presented: Option<&str>) -> Result<(), PipelineError> {
        if self.secret.is_empty() {
            return Err(PipelineError::Unauthorized(
                "internal secret is not configured".to_string(),
            ));
        }
        match presented {
            None => Err(PipelineError::Unauthorized(format!(
                "missing {} header",
                INTERNAL_SECRET_HEADER
            ))),
            Some(value) if constant_time_eq(value.as_bytes(), self.secret.as_bytes()) => Ok(()),
            Some(_) => Err(PipelineError::Unauthorized(
                "invalid internal secret".to_string(),
            )),
        }
    }
}

impl std::fmt::Debug for InternalAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InternalAuth")
            .field("configured", &!self.secret.is_empty())
            .finish()
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
