//! Interactive command flows.
//!
//! Each command gathers its inputs through the host with the wizard driver,
//! then delegates the remote work to the resource tree or the service client.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info};

use crate::apim::ApimService;
use crate::apim::contracts::{
    AuthorizationProviderContract, LoginLinkRequestContract, ServiceProviderContract,
};
use crate::callback::{AuthorizationCallbackOutcome, parse_authorization_callback};
use crate::config::{IdentityDiscoveryConfig, RedirectConfig};
use crate::error::{ApimError, ResultExt};
use crate::host::Host;
use crate::policy::{IdentityType, PolicyPurpose, PolicySnippet, generate_policy};
use crate::tree::draft::{CLIENT_ID_PARAMETER, CLIENT_SECRET_PARAMETER, SCOPES_PARAMETER};
use crate::tree::{
    AuthorizationDraft, AuthorizationProviderDraft, ChildDraft, NodeId, NodeKind,
    PermissionDraft, ResourceTree,
};
use crate::wizard::{PickOption, PromptStep, parameter_prompt, run_steps};

/// Label of the option that asks for a permission's principal explicitly.
pub const CUSTOM_OPTION_LABEL: &str = "Custom...";

#[derive(Debug, Clone, Copy)]
enum Collection {
    AuthorizationProviders,
    Authorizations,
    Permissions,
}

impl Collection {
    fn matches(self, kind: &NodeKind) -> bool {
        matches!(
            (self, kind),
            (Collection::AuthorizationProviders, NodeKind::AuthorizationProviders)
                | (Collection::Authorizations, NodeKind::Authorizations)
                | (Collection::Permissions, NodeKind::Permissions)
        )
    }

    fn owned_by(self, kind: &NodeKind) -> bool {
        matches!(
            (self, kind),
            (Collection::AuthorizationProviders, NodeKind::Service)
                | (Collection::Authorizations, NodeKind::AuthorizationProvider(_))
                | (Collection::Permissions, NodeKind::Authorization(_))
        )
    }

    fn owner(self) -> &'static str {
        match self {
            Collection::AuthorizationProviders => "an API Management service",
            Collection::Authorizations => "an authorization provider",
            Collection::Permissions => "an authorization",
        }
    }
}

/// Accepts either the collection node itself or the node that owns it.
async fn resolve_collection(
    tree: &mut ResourceTree,
    node: NodeId,
    collection: Collection,
) -> Result<NodeId, ApimError> {
    let kind = &tree.node(node)?.kind;
    if collection.matches(kind) {
        return Ok(node);
    }
    if collection.owned_by(kind) {
        for child in tree.load_children(node).await? {
            if tree
                .get(child)
                .is_some_and(|child| collection.matches(&child.kind))
            {
                return Ok(child);
            }
        }
    }
    Err(ApimError::Unsupported(format!(
        "Select {} to continue.",
        collection.owner()
    )))
}

/// Provider and authorization names of an authorization node.
fn authorization_names(tree: &ResourceTree, node: NodeId) -> Result<(String, String), ApimError> {
    let node = tree.node(node)?;
    if !matches!(node.kind, NodeKind::Authorization(_)) {
        return Err(ApimError::Unsupported(
            "Select an authorization to continue.".to_string(),
        ));
    }
    Ok((
        node.scope.authorization_provider()?.to_string(),
        node.scope.authorization()?.to_string(),
    ))
}

pub async fn create_authorization_provider<H>(
    tree: &mut ResourceTree,
    host: &H,
    node: NodeId,
) -> Result<NodeId, ApimError>
where
    H: Host + ?Sized,
{
    let collection = resolve_collection(tree, node, Collection::AuthorizationProviders).await?;

    let name = run_steps(
        host,
        &[PromptStep::input("name", "Enter Authorization Provider name ...")
            .required("Expected Authorization Provider name.")],
    )
    .await?
    .require("name", "Expected Authorization Provider name.")?
    .to_string();

    let catalog = tree.service().list_service_providers().await?;
    if catalog.is_empty() {
        return Err(ApimError::MissingContext(
            "No identity providers are available for this service.",
        ));
    }
    let options = catalog
        .iter()
        .map(|provider| PickOption::new(&provider.id).with_description(&provider.display_name))
        .collect();
    let picked = run_steps(
        host,
        &[PromptStep::pick("identityProvider", "Select Identity Provider ...", options)],
    )
    .await?
    .picked("identityProvider")
    .and_then(|index| catalog.get(index))
    .ok_or(ApimError::MissingContext("Expected identity provider."))?;

    let parameters = ask_provider_parameters(host, picked, None).await?;
    let draft = AuthorizationProviderDraft::from_parameters(name, &picked.id, parameters);

    let created = tree
        .create_child(collection, ChildDraft::AuthorizationProvider(draft), host)
        .await?;
    Ok(created)
}

/// Re-asks the parameters of an existing provider with its current values as defaults.
pub async fn edit_authorization_provider<H>(
    tree: &mut ResourceTree,
    host: &H,
    node: NodeId,
) -> Result<(), ApimError>
where
    H: Host + ?Sized,
{
    let NodeKind::AuthorizationProvider(current) = &tree.node(node)?.kind else {
        return Err(ApimError::Unsupported(
            "Select an authorization provider to continue.".to_string(),
        ));
    };
    let current = current.clone();

    let catalog = tree.service().list_service_providers().await?;
    let template = catalog
        .iter()
        .find(|provider| provider.id == current.properties.identity_provider)
        .ok_or_else(|| {
            ApimError::Unsupported(format!(
                "Identity provider '{}' is not offered by this service.",
                current.properties.identity_provider
            ))
        })?;

    let parameters = ask_provider_parameters(host, template, Some(&current)).await?;
    let draft = AuthorizationProviderDraft::from_parameters(
        current.name.clone(),
        current.properties.identity_provider.clone(),
        parameters,
    );
    tree.update_authorization_provider(node, &draft, host).await
}

async fn ask_provider_parameters<H>(
    host: &H,
    template: &ServiceProviderContract,
    existing: Option<&AuthorizationProviderContract>,
) -> Result<BTreeMap<String, String>, ApimError>
where
    H: Host + ?Sized,
{
    let current = |name: &str| -> Option<String> {
        let settings = &existing?.properties.oauth_settings;
        let value = match name {
            CLIENT_ID_PARAMETER => Some(settings.client_id.clone()),
            CLIENT_SECRET_PARAMETER => settings.client_secret.clone(),
            SCOPES_PARAMETER => settings.scopes.clone(),
            other => settings.parameters.get(other).cloned(),
        };
        value.filter(|value| !value.is_empty())
    };

    let mut steps: Vec<PromptStep> = template
        .parameters
        .iter()
        .map(|parameter| {
            let display_name = if parameter.display_name.is_empty() {
                parameter.name.as_str()
            } else {
                parameter.display_name.as_str()
            };
            let step = PromptStep::input(
                &parameter.name,
                parameter_prompt(
                    display_name,
                    parameter.description.as_deref(),
                    parameter.default.as_deref(),
                ),
            )
            .with_default(current(&parameter.name).or_else(|| parameter.default.clone()));
            match parameter.name.as_str() {
                CLIENT_ID_PARAMETER => step.required("Expected client id."),
                CLIENT_SECRET_PARAMETER => step.password().required("Expected client secret."),
                _ => step,
            }
        })
        .collect();

    // Some identity providers take no scopes parameter; ask explicitly.
    if !template.declares(SCOPES_PARAMETER) {
        steps.push(
            PromptStep::input(SCOPES_PARAMETER, "Enter scopes...")
                .with_default(current(SCOPES_PARAMETER)),
        );
    }
    // Templates without client credentials still need them for the OAuth settings.
    if !template.declares(CLIENT_ID_PARAMETER) {
        steps.push(
            PromptStep::input(CLIENT_ID_PARAMETER, "Enter Client Id ...")
                .with_default(current(CLIENT_ID_PARAMETER))
                .required("Expected client id."),
        );
    }
    if !template.declares(CLIENT_SECRET_PARAMETER) {
        steps.push(
            PromptStep::input(CLIENT_SECRET_PARAMETER, "Enter Client Secret ...")
                .password()
                .required("Expected client secret."),
        );
    }

    let answers = run_steps(host, &steps).await?;
    Ok(answers
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect())
}

/// Creates an authorization and immediately starts its login flow.
pub async fn create_authorization<H>(
    tree: &mut ResourceTree,
    host: &H,
    node: NodeId,
    redirect: &RedirectConfig,
) -> Result<NodeId, ApimError>
where
    H: Host + ?Sized,
{
    let collection = resolve_collection(tree, node, Collection::Authorizations).await?;

    let name = run_steps(
        host,
        &[PromptStep::input("name", "Enter Authorization name ...")
            .required("Expected Authorization name.")],
    )
    .await?
    .require("name", "Expected Authorization name.")?
    .to_string();

    let created = tree
        .create_child(
            collection,
            ChildDraft::Authorization(AuthorizationDraft::new(name)),
            host,
        )
        .await?;
    authorize(tree, host, created, redirect).await?;
    Ok(created)
}

/// Requests a login link for an authorization and hands it to the host browser.
pub async fn authorize<H>(
    tree: &ResourceTree,
    host: &H,
    node: NodeId,
    redirect: &RedirectConfig,
) -> Result<String, ApimError>
where
    H: Host + ?Sized,
{
    let (provider, authorization) = authorization_names(tree, node)?;
    let request = LoginLinkRequestContract {
        post_login_redirect_url: redirect.post_login_redirect_url(),
    };

    let response = tree
        .service()
        .get_login_link(&provider, &authorization, &request)
        .await
        .with_operation(|| {
            format!(
                "Failed to get a login link for authorization '{}'.",
                authorization
            )
        })?;
    debug!(authorization = %authorization, "Login link acquired");

    host.open(&response.login_link).await?;
    Ok(response.login_link)
}

/// Reports the result of the OAuth redirect back to the user.
pub async fn handle_authorization_callback<H>(
    host: &H,
    query: &str,
) -> AuthorizationCallbackOutcome
where
    H: Host + ?Sized,
{
    let outcome = parse_authorization_callback(query);
    match &outcome {
        AuthorizationCallbackOutcome::Success => host.info(&outcome.message()).await,
        AuthorizationCallbackOutcome::Failed(_) => host.warn(&outcome.message()).await,
    }
    outcome
}

/// Grants a principal access to an authorization.
pub async fn create_authorization_permission<H>(
    tree: &mut ResourceTree,
    host: &H,
    node: NodeId,
    discovery: &IdentityDiscoveryConfig,
) -> Result<NodeId, ApimError>
where
    H: Host + ?Sized,
{
    let collection = resolve_collection(tree, node, Collection::Permissions).await?;
    let token = tree.service().credential().get_token().await?;

    let mut options = vec![
        PickOption::new(&token.user_id)
            .with_description(&token.object_id)
            .with_detail("Current User"),
    ];

    let service = tree.service().get_service().await?;
    if let Some(principal_id) = service
        .identity
        .as_ref()
        .and_then(|identity| identity.principal_id.as_deref())
    {
        options.push(
            PickOption::new(&service.name)
                .with_description(principal_id)
                .with_detail("Current APIM Service"),
        );
    }

    if discovery.enabled {
        let identities = tree
            .service()
            .query_managed_identities(Duration::from_millis(discovery.timeout_ms))
            .await;
        debug!(count = identities.len(), "Discovered managed identities");
        options.extend(identities.into_iter().filter_map(|resource| {
            let principal_id = resource.identity?.principal_id?;
            Some(
                PickOption::new(resource.name)
                    .with_description(principal_id)
                    .with_detail(resource.kind),
            )
        }));
    }

    options.push(PickOption::new(CUSTOM_OPTION_LABEL));

    let picked = run_steps(
        host,
        &[PromptStep::pick("identity", "Select Identity ...", options.clone())],
    )
    .await?
    .picked("identity")
    .and_then(|index| options.get(index))
    .cloned()
    .ok_or(ApimError::MissingContext("Expected an identity."))?;

    let draft = if picked.label == CUSTOM_OPTION_LABEL {
        let answers = run_steps(
            host,
            &[
                PromptStep::input("name", "Enter Permission name ...")
                    .required("Expected permission name."),
                PromptStep::input("objectId", "Enter Object Id ...")
                    .required("Expected object id."),
                PromptStep::input("tenantId", "Enter Tenant Id ...")
                    .with_default(Some(token.tenant_id.clone()))
                    .required("Expected tenant id."),
            ],
        )
        .await?;
        PermissionDraft {
            name: answers.require("name", "Expected permission name.")?.to_string(),
            object_id: answers.require("objectId", "Expected object id.")?.to_string(),
            tenant_id: answers.require("tenantId", "Expected tenant id.")?.to_string(),
        }
    } else {
        PermissionDraft {
            name: picked.label,
            object_id: picked.description,
            tenant_id: token.tenant_id,
        }
    };

    tree.create_child(collection, ChildDraft::Permission(draft), host)
        .await
}

/// Builds a policy snippet for an authorization and copies it to the clipboard.
pub async fn copy_authorization_policy<H>(
    tree: &ResourceTree,
    host: &H,
    node: NodeId,
) -> Result<PolicySnippet, ApimError>
where
    H: Host + ?Sized,
{
    let (provider, authorization) = authorization_names(tree, node)?;

    let purposes = PolicyPurpose::ALL
        .iter()
        .map(|purpose| PickOption::new(purpose.label()))
        .collect();
    let identities = IdentityType::ALL
        .iter()
        .map(|identity| PickOption::new(identity.as_str()).with_description(identity.description()))
        .collect();

    let answers = run_steps(
        host,
        &[
            PromptStep::pick("purpose", "How do you want to use the policy?", purposes),
            PromptStep::pick(
                "identityType",
                "Which identity type do you want to use?",
                identities,
            ),
        ],
    )
    .await?;
    let purpose = answers
        .picked("purpose")
        .and_then(|index| PolicyPurpose::ALL.get(index).copied())
        .ok_or(ApimError::MissingContext("Expected a policy purpose."))?;
    let identity = answers
        .picked("identityType")
        .and_then(|index| IdentityType::ALL.get(index).copied())
        .ok_or(ApimError::MissingContext("Expected an identity type."))?;

    let snippet = generate_policy(purpose, identity, &provider, &authorization);
    host.write_text(&snippet.text).await?;
    host.info(&format!("Policy copied to clipboard. {}", snippet.note))
        .await;
    Ok(snippet)
}

pub async fn delete_node<H>(
    tree: &mut ResourceTree,
    host: &H,
    node: NodeId,
) -> Result<(), ApimError>
where
    H: Host + ?Sized,
{
    tree.delete(node, host).await
}

/// Issues a gateway token valid for `num_of_days` and copies it to the clipboard.
pub async fn generate_gateway_token<H>(
    service: &ApimService,
    host: &H,
    gateway: &str,
    num_of_days: u32,
    key_type: &str,
) -> Result<String, ApimError>
where
    H: Host + ?Sized,
{
    if num_of_days == 0 {
        return Err(ApimError::MissingContext(
            "The token must be valid for at least one day.",
        ));
    }
    let token = service
        .generate_new_gateway_token(gateway, num_of_days, key_type)
        .await
        .with_operation(|| format!("Failed to generate a token for gateway '{}'.", gateway))?;
    info!(gateway = %gateway, num_of_days, "Gateway token generated");

    host.write_text(&token).await?;
    host.info(&format!(
        "Token for gateway '{}' copied to clipboard. It expires in {} day(s).",
        gateway, num_of_days
    ))
    .await;
    Ok(token)
}

/// Turns on the system-assigned managed identity of the service.
pub async fn enable_managed_identity<H>(
    service: &ApimService,
    host: &H,
) -> Result<Option<String>, ApimError>
where
    H: Host + ?Sized,
{
    let updated = service
        .turn_on_managed_identity()
        .await
        .with_operation(|| {
            format!(
                "Failed to turn on managed identity for '{}'.",
                service.service_name()
            )
        })?;
    let principal_id = updated
        .identity
        .and_then(|identity| identity.principal_id);
    match &principal_id {
        Some(principal_id) => {
            host.info(&format!(
                "Managed identity of '{}' is on (principal id {}).",
                updated.name, principal_id
            ))
            .await
        }
        None => {
            host.warn(&format!(
                "Managed identity of '{}' was requested but no principal id was returned yet.",
                updated.name
            ))
            .await
        }
    }
    Ok(principal_id)
}
