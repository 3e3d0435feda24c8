//! Credential seam.
//!
//! Token acquisition and refresh belong to an external authentication library.
//! The client only needs a bearer token and the identity of the signed-in
//! principal, both read through [`TokenCredential`].

use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;

use crate::error::ApimError;

/// Bearer token plus the principal it was issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub user_id: String,
    pub object_id: String,
    pub tenant_id: String,
}

#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Returns a token valid for the resource manager audience.
    async fn get_token(&self) -> Result<AccessToken, ApimError>;
}

/// Claims the client reads from a resource-manager access token.
#[derive(Debug, Deserialize)]
struct PrincipalClaims {
    oid: Option<String>,
    tid: Option<String>,
    upn: Option<String>,
    unique_name: Option<String>,
    preferred_username: Option<String>,
}

/// Credential backed by an already issued token.
#[derive(Debug, Clone)]
pub struct StaticTokenCredential {
    token: AccessToken,
}

impl StaticTokenCredential {
    pub fn new(token: AccessToken) -> Self {
        Self { token }
    }

    /// Builds a credential from a raw JWT, reading the principal from its claims.
    ///
    /// The signature is not verified: the token is only forwarded to the resource
    /// manager, which performs the real validation.
    pub fn from_jwt(raw: &str) -> Result<Self, ApimError> {
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<PrincipalClaims>(raw, &DecodingKey::from_secret(&[]), &validation)
            .map_err(|err| ApimError::Credential(format!("unreadable access token: {}", err)))?;
        let claims = data.claims;

        let object_id = claims
            .oid
            .ok_or_else(|| ApimError::Credential("access token has no 'oid' claim".to_string()))?;
        let tenant_id = claims
            .tid
            .ok_or_else(|| ApimError::Credential("access token has no 'tid' claim".to_string()))?;
        let user_id = claims
            .upn
            .or(claims.unique_name)
            .or(claims.preferred_username)
            .unwrap_or_else(|| object_id.clone());

        Ok(Self {
            token: AccessToken {
                token: raw.to_string(),
                user_id,
                object_id,
                tenant_id,
            },
        })
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(&self) -> Result<AccessToken, ApimError> {
        Ok(self.token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    fn jwt(claims: serde_json::Value) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"not-the-real-key"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_from_jwt_reads_principal() {
        let raw = jwt(json!({
            "oid": "00000000-0000-0000-0000-000000000001",
            "tid": "00000000-0000-0000-0000-0000000000aa",
            "upn": "someone@contoso.com",
            "aud": "https://management.core.windows.net/",
            "exp": 1
        }));

        let credential = StaticTokenCredential::from_jwt(&raw).unwrap();
        let token = credential.get_token().await.unwrap();
        assert_eq!(token.user_id, "someone@contoso.com");
        assert_eq!(token.object_id, "00000000-0000-0000-0000-000000000001");
        assert_eq!(token.tenant_id, "00000000-0000-0000-0000-0000000000aa");
        assert_eq!(token.token, raw);
    }

    #[test]
    fn test_from_jwt_falls_back_to_object_id() {
        let raw = jwt(json!({ "oid": "oid-1", "tid": "tid-1" }));
        let credential = StaticTokenCredential::from_jwt(&raw).unwrap();
        assert_eq!(credential.token.user_id, "oid-1");
    }

    #[test]
    fn test_from_jwt_requires_oid() {
        let raw = jwt(json!({ "tid": "tid-1" }));
        let err = StaticTokenCredential::from_jwt(&raw).unwrap_err();
        assert!(matches!(err, ApimError::Credential(_)));
    }

    #[test]
    fn test_from_jwt_rejects_garbage() {
        let err = StaticTokenCredential::from_jwt("not-a-token").unwrap_err();
        assert!(matches!(err, ApimError::Credential(_)));
    }
}
