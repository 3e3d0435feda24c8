//! Inputs collected by the wizards for creating child resources.

use std::collections::BTreeMap;

use crate::apim::contracts::{AuthorizationProviderPropertyContract, OAuthSettingsContract};
use crate::error::ApimError;

/// Catalog parameters that map onto dedicated OAuth settings fields.
pub const CLIENT_ID_PARAMETER: &str = "clientId";
pub const CLIENT_SECRET_PARAMETER: &str = "clientSecret";
pub const SCOPES_PARAMETER: &str = "scopes";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildDraft {
    AuthorizationProvider(AuthorizationProviderDraft),
    Authorization(AuthorizationDraft),
    Permission(PermissionDraft),
}

impl ChildDraft {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            ChildDraft::AuthorizationProvider(_) => "an authorization provider",
            ChildDraft::Authorization(_) => "an authorization",
            ChildDraft::Permission(_) => "a permission",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorizationProviderDraft {
    pub name: String,
    pub identity_provider: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Option<String>,
    /// Remaining identity-provider specific parameters.
    pub parameters: BTreeMap<String, String>,
}

impl AuthorizationProviderDraft {
    /// Builds a draft from the answered catalog parameters, lifting
    /// `clientId`, `clientSecret` and `scopes` out of the parameter map.
    pub fn from_parameters(
        name: impl Into<String>,
        identity_provider: impl Into<String>,
        mut parameters: BTreeMap<String, String>,
    ) -> Self {
        let client_id = parameters.remove(CLIENT_ID_PARAMETER).unwrap_or_default();
        let client_secret = parameters
            .remove(CLIENT_SECRET_PARAMETER)
            .unwrap_or_default();
        let scopes = parameters
            .remove(SCOPES_PARAMETER)
            .filter(|scopes| !scopes.is_empty());
        Self {
            name: name.into(),
            identity_provider: identity_provider.into(),
            client_id,
            client_secret,
            scopes,
            parameters,
        }
    }

    pub fn validate(&self) -> Result<(), ApimError> {
        if self.name.trim().is_empty() {
            return Err(ApimError::MissingContext(
                "Expected Authorization Provider name.",
            ));
        }
        if self.identity_provider.trim().is_empty() {
            return Err(ApimError::MissingContext("Expected identity provider."));
        }
        if self.client_id.trim().is_empty() {
            return Err(ApimError::MissingContext("Expected client id."));
        }
        if self.client_secret.trim().is_empty() {
            return Err(ApimError::MissingContext("Expected client secret."));
        }
        Ok(())
    }

    pub fn to_properties(&self) -> AuthorizationProviderPropertyContract {
        AuthorizationProviderPropertyContract {
            display_name: self.name.clone(),
            identity_provider: self.identity_provider.clone(),
            oauth_settings: OAuthSettingsContract {
                client_id: self.client_id.clone(),
                client_secret: Some(self.client_secret.clone()),
                scopes: self.scopes.clone(),
                redirect_url: None,
                parameters: self.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationDraft {
    pub name: String,
}

impl AuthorizationDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn validate(&self) -> Result<(), ApimError> {
        if self.name.trim().is_empty() {
            return Err(ApimError::MissingContext("Expected Authorization name."));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDraft {
    pub name: String,
    pub object_id: String,
    pub tenant_id: String,
}

impl PermissionDraft {
    pub fn validate(&self) -> Result<(), ApimError> {
        if self.name.trim().is_empty()
            || self.object_id.trim().is_empty()
            || self.tenant_id.trim().is_empty()
        {
            return Err(ApimError::MissingContext(
                "Expected Authorization Permission information.",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_parameters_are_lifted() {
        let parameters = BTreeMap::from([
            ("clientId".to_string(), "id".to_string()),
            ("clientSecret".to_string(), "secret".to_string()),
            ("scopes".to_string(), "User.Read".to_string()),
            ("resourceUri".to_string(), "https://graph.microsoft.com".to_string()),
        ]);

        let draft = AuthorizationProviderDraft::from_parameters("graph", "aad", parameters);
        assert!(draft.validate().is_ok());

        let properties = draft.to_properties();
        assert_eq!(properties.display_name, "graph");
        assert_eq!(properties.oauth_settings.client_id, "id");
        assert_eq!(properties.oauth_settings.client_secret.as_deref(), Some("secret"));
        assert_eq!(properties.oauth_settings.scopes.as_deref(), Some("User.Read"));
        assert_eq!(properties.oauth_settings.parameters.len(), 1);
        assert!(properties.oauth_settings.parameters.contains_key("resourceUri"));
    }

    #[test]
    fn test_missing_secret_fails_fast() {
        let draft = AuthorizationProviderDraft::from_parameters(
            "github",
            "github",
            BTreeMap::from([("clientId".to_string(), "id".to_string())]),
        );
        assert!(matches!(
            draft.validate(),
            Err(ApimError::MissingContext("Expected client secret."))
        ));
    }

    #[test]
    fn test_permission_requires_all_fields() {
        let draft = PermissionDraft {
            name: "me".to_string(),
            object_id: String::new(),
            tenant_id: "tid".to_string(),
        };
        assert!(draft.validate().is_err());
        assert!(AuthorizationDraft::new(" ").validate().is_err());
    }
}
