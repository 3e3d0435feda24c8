use apim_authorizations::callback::AuthorizationCallbackOutcome;
use apim_authorizations::commands;
use apim_authorizations::config::{IdentityDiscoveryConfig, RedirectConfig};
use apim_authorizations::tree::{NodeKind, ResourceTree};
use apim_authorizations::wizard::PromptKind;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_json, body_partial_json, method, path},
};

mod test_utils;
use test_utils::{ScriptedHost, navigate, pick, resource_path, service, service_path, text};

async fn mount_catalog(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(resource_path("/serviceProviders")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                {
                    "id": "aad",
                    "displayName": "Azure Active Directory",
                    "parameters": [
                        { "name": "clientId", "displayName": "Client id" },
                        { "name": "clientSecret", "displayName": "Client secret" },
                        { "name": "scopes", "displayName": "Scopes" },
                        { "name": "resourceUri", "displayName": "Resource URL", "description": "The resource to access", "default": "https://graph.microsoft.com" }
                    ]
                },
                {
                    "id": "github",
                    "displayName": "GitHub",
                    "parameters": [
                        { "name": "clientId", "displayName": "Client id" },
                        { "name": "clientSecret", "displayName": "Client secret" }
                    ]
                }
            ]
        })))
        .mount(server)
        .await;
}

async fn mount_github_provider(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(resource_path("/authorizationProviders")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{
                "name": "github",
                "properties": {
                    "displayName": "github",
                    "identityProvider": "github",
                    "oauthSettings": { "clientId": "old-id", "scopes": "repo" }
                }
            }]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(resource_path("/authorizationProviders/github/authorizations")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "name": "me", "properties": { "status": "Connected" } }]
        })))
        .mount(server)
        .await;
}

fn provider_response(name: &str, identity_provider: &str) -> serde_json::Value {
    json!({
        "name": name,
        "properties": {
            "displayName": name,
            "identityProvider": identity_provider,
            "oauthSettings": {
                "clientId": "id",
                "redirectUrl": "https://authorization-manager.consent.azure-apim.net/redirect/apim/svc-1"
            }
        }
    })
}

#[tokio::test]
async fn test_provider_wizard_lifts_oauth_settings() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;

    Mock::given(method("PUT"))
        .and(path(resource_path("/authorizationProviders/github")))
        .and(body_json(json!({
            "properties": {
                "displayName": "github",
                "identityProvider": "github",
                "oauthSettings": { "clientId": "id", "clientSecret": "secret", "scopes": "repo user" }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(provider_response("github", "github")))
        .expect(1)
        .mount(&server)
        .await;

    let mut tree = ResourceTree::new(service(&server));
    let root = tree.root();
    let host = ScriptedHost::new(vec![
        text("github"),
        pick(1),
        text("id"),
        text("secret"),
        text("repo user"),
    ]);

    let created = commands::create_authorization_provider(&mut tree, &host, root)
        .await
        .unwrap();

    assert_eq!(tree.node(created).unwrap().label(), "github");
    assert_eq!(
        host.prompt_keys(),
        vec!["name", "identityProvider", "clientId", "clientSecret", "scopes"]
    );
    assert!(host.infos()[0].contains("Please add redirect uri"));
}

#[tokio::test]
async fn test_provider_wizard_applies_catalog_defaults() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;

    Mock::given(method("PUT"))
        .and(path(resource_path("/authorizationProviders/graph")))
        .and(body_partial_json(json!({
            "properties": {
                "identityProvider": "aad",
                "oauthSettings": {
                    "clientId": "id",
                    "clientSecret": "secret",
                    "scopes": "User.Read",
                    "parameters": { "resourceUri": "https://graph.microsoft.com" }
                }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(provider_response("graph", "aad")))
        .expect(1)
        .mount(&server)
        .await;

    let mut tree = ResourceTree::new(service(&server));
    let root = tree.root();
    let host = ScriptedHost::new(vec![
        text("graph"),
        pick(0),
        text("id"),
        text("secret"),
        text("User.Read"),
        text(""),
    ]);

    commands::create_authorization_provider(&mut tree, &host, root)
        .await
        .unwrap();

    let prompts = host.prompts.lock().unwrap().clone();
    let resource_prompt = prompts.last().unwrap();
    match &resource_prompt.kind {
        PromptKind::Input {
            prompt, default, ..
        } => {
            assert_eq!(
                prompt,
                "Enter Resource URL... (The resource to access. Default is https://graph.microsoft.com)"
            );
            assert_eq!(default.as_deref(), Some("https://graph.microsoft.com"));
        }
        other => panic!("unexpected prompt: {:?}", other),
    }
}

#[tokio::test]
async fn test_abandoned_wizard_creates_nothing() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;

    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut tree = ResourceTree::new(service(&server));
    let root = tree.root();
    let host = ScriptedHost::new(vec![text("github"), pick(1), text("id")]);

    let err = commands::create_authorization_provider(&mut tree, &host, root)
        .await
        .unwrap_err();
    assert!(err.is_cancellation());
}

#[tokio::test]
async fn test_edit_provider_keeps_current_values() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    mount_github_provider(&server).await;

    Mock::given(method("PUT"))
        .and(path(resource_path("/authorizationProviders/github")))
        .and(body_json(json!({
            "properties": {
                "displayName": "github",
                "identityProvider": "github",
                "oauthSettings": { "clientId": "old-id", "clientSecret": "new-secret", "scopes": "repo" }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(provider_response("github", "github")))
        .expect(1)
        .mount(&server)
        .await;

    let mut tree = ResourceTree::new(service(&server));
    let provider = navigate(&mut tree, &["github"]).await;
    let host = ScriptedHost::new(vec![text(""), text("new-secret"), text("")]);

    commands::edit_authorization_provider(&mut tree, &host, provider)
        .await
        .unwrap();

    assert_eq!(host.prompt_keys(), vec!["clientId", "clientSecret", "scopes"]);
    assert_eq!(
        host.infos(),
        vec!["Updated AuthorizationProvider 'github' successfully."]
    );
    match &tree.node(provider).unwrap().kind {
        NodeKind::AuthorizationProvider(contract) => {
            assert_eq!(contract.properties.oauth_settings.client_id, "id");
        }
        other => panic!("unexpected node: {:?}", other),
    }
}

#[tokio::test]
async fn test_create_authorization_starts_login_flow() {
    let server = MockServer::start().await;
    mount_github_provider(&server).await;

    Mock::given(method("PUT"))
        .and(path(resource_path("/authorizationProviders/github/authorizations/ci")))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "name": "ci",
            "properties": { "status": "Error" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(resource_path(
            "/authorizationProviders/github/authorizations/ci/permissions/me@contoso.com",
        )))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "name": "me@contoso.com",
            "properties": { "objectId": "oid-me", "tenantId": "tid-1" }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(resource_path(
            "/authorizationProviders/github/authorizations/ci/getLoginLinks",
        )))
        .and(body_json(json!({
            "postLoginRedirectUrl": "vscode://ms-azuretools.vscode-apimanagement/authorize-authorization-callback"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "loginLink": "https://login.example/consent?id=ci"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut tree = ResourceTree::new(service(&server));
    let provider = navigate(&mut tree, &["github"]).await;
    let host = ScriptedHost::new(vec![text("ci")]);

    let created =
        commands::create_authorization(&mut tree, &host, provider, &RedirectConfig::default())
            .await
            .unwrap();

    assert_eq!(tree.node(created).unwrap().label(), "ci");
    assert_eq!(host.opened(), vec!["https://login.example/consent?id=ci"]);
}

#[tokio::test]
async fn test_permission_wizard_custom_identity() {
    let server = MockServer::start().await;
    mount_github_provider(&server).await;

    Mock::given(method("GET"))
        .and(path(service_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "svc-1",
            "identity": { "type": "SystemAssigned", "principalId": "principal-svc" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(resource_path(
            "/authorizationProviders/github/authorizations/me/permissions/reader",
        )))
        .and(body_json(json!({
            "properties": { "objectId": "oid-9", "tenantId": "tid-1" }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "name": "reader",
            "properties": { "objectId": "oid-9", "tenantId": "tid-1" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut tree = ResourceTree::new(service(&server));
    let authorization = navigate(&mut tree, &["github", "me"]).await;
    let host = ScriptedHost::new(vec![pick(2), text("reader"), text("oid-9"), text("")]);

    let created = commands::create_authorization_permission(
        &mut tree,
        &host,
        authorization,
        &IdentityDiscoveryConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(tree.node(created).unwrap().description().as_deref(), Some("oid-9"));

    let prompts = host.prompts.lock().unwrap().clone();
    match &prompts[0].kind {
        PromptKind::Pick { options, .. } => {
            let labels: Vec<&str> = options.iter().map(|o| o.label.as_str()).collect();
            assert_eq!(labels, vec!["me@contoso.com", "svc-1", "Custom..."]);
            assert_eq!(options[0].description, "oid-me");
            assert_eq!(options[0].detail, "Current User");
            assert_eq!(options[1].description, "principal-svc");
            assert_eq!(options[1].detail, "Current APIM Service");
        }
        other => panic!("unexpected prompt: {:?}", other),
    }
}

#[tokio::test]
async fn test_permission_wizard_service_identity() {
    let server = MockServer::start().await;
    mount_github_provider(&server).await;

    Mock::given(method("GET"))
        .and(path(service_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "svc-1",
            "identity": { "type": "SystemAssigned", "principalId": "principal-svc" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(resource_path(
            "/authorizationProviders/github/authorizations/me/permissions/svc-1",
        )))
        .and(body_json(json!({
            "properties": { "objectId": "principal-svc", "tenantId": "tid-1" }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "name": "svc-1",
            "properties": { "objectId": "principal-svc", "tenantId": "tid-1" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut tree = ResourceTree::new(service(&server));
    let authorization = navigate(&mut tree, &["github", "me"]).await;
    let host = ScriptedHost::new(vec![pick(1)]);

    commands::create_authorization_permission(
        &mut tree,
        &host,
        authorization,
        &IdentityDiscoveryConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(host.infos(), vec!["Successfully created permission \"svc-1\"."]);
}

#[tokio::test]
async fn test_permission_wizard_offers_discovered_identities() {
    let server = MockServer::start().await;
    mount_github_provider(&server).await;

    Mock::given(method("GET"))
        .and(path(service_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "svc-1",
            "identity": { "type": "SystemAssigned", "principalId": "principal-svc" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/providers/Microsoft.ResourceGraph/resources"))
        .and(body_partial_json(json!({ "subscriptions": ["sub-1"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "name": "orders-app", "type": "microsoft.web/sites", "identity": { "type": "SystemAssigned", "principalId": "p-orders" } },
                { "name": "legacy-app", "type": "microsoft.web/sites", "identity": { "type": "None" } }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path(resource_path(
            "/authorizationProviders/github/authorizations/me/permissions/orders-app",
        )))
        .and(body_json(json!({
            "properties": { "objectId": "p-orders", "tenantId": "tid-1" }
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "name": "orders-app",
            "properties": { "objectId": "p-orders", "tenantId": "tid-1" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let mut tree = ResourceTree::new(service(&server));
    let authorization = navigate(&mut tree, &["github", "me"]).await;
    let host = ScriptedHost::new(vec![pick(2)]);
    let discovery = IdentityDiscoveryConfig {
        enabled: true,
        ..IdentityDiscoveryConfig::default()
    };

    let created =
        commands::create_authorization_permission(&mut tree, &host, authorization, &discovery)
            .await
            .unwrap();

    assert_eq!(tree.node(created).unwrap().label(), "orders-app");
    let prompts = host.prompts.lock().unwrap().clone();
    match &prompts[0].kind {
        PromptKind::Pick { options, .. } => {
            let labels: Vec<&str> = options.iter().map(|o| o.label.as_str()).collect();
            assert_eq!(
                labels,
                vec!["me@contoso.com", "svc-1", "orders-app", "Custom..."]
            );
            assert_eq!(options[2].description, "p-orders");
            assert_eq!(options[2].detail, "microsoft.web/sites");
        }
        other => panic!("unexpected prompt: {:?}", other),
    }
}

#[tokio::test]
async fn test_copy_policy_writes_clipboard() {
    let server = MockServer::start().await;
    mount_github_provider(&server).await;

    let mut tree = ResourceTree::new(service(&server));
    let authorization = navigate(&mut tree, &["github", "me"]).await;
    let host = ScriptedHost::new(vec![pick(0), pick(1)]);

    let snippet = commands::copy_authorization_policy(&tree, &host, authorization)
        .await
        .unwrap();

    assert_eq!(host.clipboard(), vec![snippet.text.clone()]);
    assert!(snippet.text.contains("context-variable-name=\"github-me-context\""));
    assert!(snippet.text.contains("identity-type=\"jwt\""));
    assert!(host.infos()[0].starts_with("Policy copied to clipboard. For 'jwt' identity-type"));
}

#[tokio::test]
async fn test_gateway_token_is_copied() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(resource_path("/gateways/gw1/token")))
        .and(body_json(json!({ "keyType": "secondary", "expiry": "2024-01-31T00:00:00.000Z" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": "GatewayKey gw1" })))
        .expect(1)
        .mount(&server)
        .await;

    let host = ScriptedHost::default();
    let token = commands::generate_gateway_token(&service(&server), &host, "gw1", 30, "secondary")
        .await
        .unwrap();

    assert_eq!(token, "GatewayKey gw1");
    assert_eq!(host.clipboard(), vec!["GatewayKey gw1"]);
}

#[tokio::test]
async fn test_callback_outcomes_are_reported() {
    let host = ScriptedHost::default();

    let failed = commands::handle_authorization_callback(&host, "error=ZXJyb3I%3D").await;
    assert_eq!(failed, AuthorizationCallbackOutcome::Failed("error".to_string()));
    assert_eq!(host.warnings(), vec!["Authorization failed. error"]);

    let succeeded = commands::handle_authorization_callback(&host, "").await;
    assert_eq!(succeeded, AuthorizationCallbackOutcome::Success);
    assert_eq!(host.infos(), vec!["Authorized successfully."]);
}
