//! Caller identity confirmation
//!
//! Authentication itself happens upstream; the resolver only needs a way to
//! re-confirm an identity before retrying a write the store rejected.

use crate::error::Result;
use async_trait::async_trait;
use tracing::debug;

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Re-confirm that `user_id` is an authenticated identity
    ///
    /// Implementations backed by a session service refresh the session here.
    async fn confirm_identity(&self, user_id: &str) -> Result<bool>;
}

/// Identity asserted by the upstream gateway via the `x-user-id` header
///
/// Any well-formed id is accepted; there is no session to refresh.
#[derive(Debug, Default, Clone, Copy)]
pub struct GatewayIdentity;

#[async_trait]
impl IdentityProvider for GatewayIdentity {
    async fn confirm_identity(&self, user_id: &str) -> Result<bool> {
        let valid = is_well_formed_user_id(user_id);
        debug!(user_id = %user_id, valid, "Confirmed gateway identity");
        Ok(valid)
    }
}

/// Non-empty, at most 128 characters, no whitespace or control characters
pub fn is_well_formed_user_id(user_id: &str) -> bool {
    !user_id.is_empty()
        && user_id.len() <= 128
        && !user_id.chars().any(|c| c.is_whitespace() || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_shape() {
        assert!(is_well_formed_user_id("8d9c2f1a-user"));
        assert!(!is_well_formed_user_id(""));
        assert!(!is_well_formed_user_id("has space"));
        assert!(!is_well_formed_user_id(&"x".repeat(129)));
    }

    #[tokio::test]
    async fn test_gateway_identity_confirms_well_formed_ids() {
        let identity = GatewayIdentity;
        assert!(identity.confirm_identity("user-1").await.unwrap());
        assert!(!identity.confirm_identity("").await.unwrap());
    }
}
