use crate::TokenPool;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Reason a token pool notification was rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolRejection {
    MissingNamespace,
    MissingName,
}

impl std::fmt::Display for PoolRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolRejection::MissingNamespace => write!(f, "Token pool has no namespace"),
            PoolRejection::MissingName => write!(f, "Token pool has no name"),
        }
    }
}

impl std::error::Error for PoolRejection {}

#[derive(Debug, Clone, Copy, Default)]
pub struct PoolValidator;

impl PoolValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a token pool reported by the ledger
    /// Returns Ok(()) if it can be confirmed, Err(PoolRejection) if not
    pub fn validate(&self, pool: &TokenPool) -> Result<(), PoolRejection> {
        debug!("Validating token pool {:?} in namespace '{}'", pool.id, pool.namespace);

        // 1. Namespace
        self.check_namespace(pool)?;

        // 2. Name
        self.check_name(pool)?;

        Ok(())
    }

    fn check_namespace(&self, pool: &TokenPool) -> Result<(), PoolRejection> {
        if pool.namespace.trim().is_empty() {
            warn!("Token pool {:?} rejected: no namespace", pool.id);
            return Err(PoolRejection::MissingNamespace);
        }
        Ok(())
    }

    fn check_name(&self, pool: &TokenPool) -> Result<(), PoolRejection> {
        if pool.name.trim().is_empty() {
            warn!("Token pool {:?} in '{}' rejected: no name", pool.id, pool.namespace);
            return Err(PoolRejection::MissingName);
        }
        Ok(())
    }
}
