//! Authorization collaborator.
//!
//! The core never inspects tokens itself; this engine resolves a bearer
//! token to a principal and answers group-membership questions against the
//! externally-maintained membership mirror. With no signing secret
//! configured, every token resolves to the anonymous principal.

use std::sync::Arc;

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::warn;

use crate::error::{DomainError, DomainResult};
use crate::store::SharedStore;

#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    role: Option<String>,
    #[allow(dead_code)]
    exp: usize,
}

pub struct AuthEngine {
    secret: Option<String>,
    store: SharedStore,
}

impl AuthEngine {
    pub fn new(secret: Option<String>, store: SharedStore) -> Arc<Self> {
        Arc::new(Self { secret, store })
    }

    /// Resolve a bearer token to a principal. Invalid or unverifiable tokens
    /// fall through to anonymous (`None`); role defaults to `hunter`.
    pub fn resolve_principal(&self, token: &str) -> Option<Principal> {
        let secret = self.secret.as_ref()?;

        let validation = Validation::new(Algorithm::HS256);
        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        ) {
            Ok(data) => Some(Principal {
                user_id: data.claims.sub,
                role: data.claims.role.unwrap_or_else(|| "hunter".to_string()),
            }),
            Err(e) => {
                warn!("Token rejected: {e}");
                None
            }
        }
    }

    /// Membership gate for group-scoped routes. Runs before any group data is
    /// touched.
    pub async fn require_membership(&self, user_id: &str, group_id: &str) -> DomainResult<()> {
        let store = self.store.read().await;
        if store.is_group_member(group_id, user_id) {
            Ok(())
        } else {
            Err(DomainError::PermissionDenied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::GroupMember;
    use crate::store::{shared, TelemetryStore};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        role: Option<String>,
        exp: usize,
    }

    fn token(secret: &str, sub: &str, role: Option<&str>, exp: usize) -> String {
        encode(
            &Header::default(),
            &TestClaims {
                sub: sub.to_string(),
                role: role.map(|r| r.to_string()),
                exp,
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn far_future() -> usize {
        (chrono::Utc::now().timestamp() + 3600) as usize
    }

    #[test]
    fn valid_token_resolves_with_role() {
        let auth = AuthEngine::new(
            Some("s3cret".to_string()),
            shared(TelemetryStore::default()),
        );

        let principal = auth
            .resolve_principal(&token("s3cret", "alice", Some("guide"), far_future()))
            .unwrap();
        assert_eq!(principal.user_id, "alice");
        assert_eq!(principal.role, "guide");

        let default_role = auth
            .resolve_principal(&token("s3cret", "bob", None, far_future()))
            .unwrap();
        assert_eq!(default_role.role, "hunter");
    }

    #[test]
    fn bad_signature_or_missing_secret_is_anonymous() {
        let store = shared(TelemetryStore::default());

        let auth = AuthEngine::new(Some("s3cret".to_string()), store.clone());
        assert!(auth
            .resolve_principal(&token("wrong-secret", "alice", None, far_future()))
            .is_none());

        let no_secret = AuthEngine::new(None, store);
        assert!(no_secret
            .resolve_principal(&token("s3cret", "alice", None, far_future()))
            .is_none());
    }

    #[tokio::test]
    async fn membership_gate() {
        let store = shared(TelemetryStore::default());
        {
            let mut guard = store.write().await;
            guard.add_group_member(GroupMember {
                group_id: "g1".to_string(),
                user_id: "alice".to_string(),
                user_name: "Alice".to_string(),
                joined_at: chrono::Utc::now(),
            });
        }
        let auth = AuthEngine::new(None, store);

        assert!(auth.require_membership("alice", "g1").await.is_ok());
        assert!(matches!(
            auth.require_membership("bob", "g1").await,
            Err(DomainError::PermissionDenied)
        ));
    }
}
