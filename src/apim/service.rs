//! API Management control-plane client.
//!
//! Every operation is one HTTP round trip against the resource manager: acquire
//! a bearer token, send, check the status, parse the body. Nothing is retried
//! and list operations only ever fetch the first page.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use metrics::counter;
use reqwest::Method;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::json;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::apim::contracts::{
    ApimServiceContract, AuthorizationContract, AuthorizationPermissionContract,
    AuthorizationPermissionPropertyContract, AuthorizationProviderContract,
    AuthorizationProviderPropertyContract, GatewayApiContract, GatewayContract, GatewayToken,
    GatewayTokenRequest, ListPage, LoginLinkRequestContract, LoginLinkResponseContract,
    ManagedIdentityResource, MasterSubscription, ServiceProviderContract,
};
use crate::config::AppConfig;
use crate::credentials::TokenCredential;
use crate::error::ApimError;

/// Page size requested by every list call.
pub const LIST_PAGE_SIZE: u32 = 100;

const DEFAULT_API_VERSION: &str = "2018-06-01-preview";
const DEFAULT_AUTHORIZATION_PROVIDER_API_VERSION: &str = "2021-04-01-preview";
const RESOURCE_GRAPH_API_VERSION: &str = "2019-04-01";
const MANAGED_IDENTITY_QUERY: &str =
    "Resources | where type =~ 'Microsoft.Web/sites' | where notempty(identity) | project name, type, identity";
const CLIENT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

/// Source of "now", injectable so token expiry can be tested deterministically.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Client bound to one API Management service instance.
#[derive(Clone)]
pub struct ApimService {
    http: reqwest::Client,
    credential: Arc<dyn TokenCredential>,
    endpoint: String,
    subscription_id: String,
    resource_group: String,
    service_name: String,
    base_url: String,
    api_version: String,
    authorization_provider_api_version: String,
    clock: Clock,
}

impl ApimService {
    /// Create a client for `{endpoint}/subscriptions/{sub}/resourceGroups/{rg}/.../service/{name}`.
    pub fn new(
        credential: Arc<dyn TokenCredential>,
        endpoint: &str,
        subscription_id: &str,
        resource_group: &str,
        service_name: &str,
    ) -> Self {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let base_url = site_url(&endpoint, subscription_id, resource_group, service_name);
        Self {
            http: reqwest::Client::new(),
            credential,
            endpoint,
            subscription_id: subscription_id.to_string(),
            resource_group: resource_group.to_string(),
            service_name: service_name.to_string(),
            base_url,
            api_version: DEFAULT_API_VERSION.to_string(),
            authorization_provider_api_version: DEFAULT_AUTHORIZATION_PROVIDER_API_VERSION
                .to_string(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Create a client from loaded configuration.
    pub fn from_config(
        config: &AppConfig,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self, ApimError> {
        let (subscription_id, resource_group, service_name) = config.service_coordinates()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self::new(
            credential,
            &config.resource_manager_endpoint,
            &subscription_id,
            &resource_group,
            &service_name,
        )
        .with_http_client(http)
        .with_api_versions(
            &config.api_version,
            &config.authorization_provider_api_version,
        ))
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_api_versions(mut self, api_version: &str, authorization_provider: &str) -> Self {
        self.api_version = api_version.to_string();
        self.authorization_provider_api_version = authorization_provider.to_string();
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    pub fn credential(&self) -> &Arc<dyn TokenCredential> {
        &self.credential
    }

    // ---- service ---------------------------------------------------------

    pub async fn get_service(&self) -> Result<ApimServiceContract, ApimError> {
        let url = self.service_url(&[], false)?;
        self.send(Method::GET, url, None::<&()>).await
    }

    /// Turn on the system-assigned managed identity of the service.
    pub async fn turn_on_managed_identity(&self) -> Result<ApimServiceContract, ApimError> {
        let url = self.service_url(&[], false)?;
        let body = json!({ "identity": { "type": "systemassigned" } });
        self.send(Method::PATCH, url, Some(&body)).await
    }

    pub async fn get_subscription_master_key(&self) -> Result<MasterSubscription, ApimError> {
        let url = self.service_url(&["subscriptions", "master"], false)?;
        self.send(Method::GET, url, None::<&()>).await
    }

    // ---- gateways --------------------------------------------------------

    pub async fn list_gateways(&self) -> Result<Vec<GatewayContract>, ApimError> {
        let url = self.service_url(&["gateways"], true)?;
        self.list(url).await
    }

    pub async fn list_gateway_apis(
        &self,
        gateway_name: &str,
    ) -> Result<Vec<GatewayApiContract>, ApimError> {
        let url = self.service_url(&["gateways", gateway_name, "apis"], true)?;
        self.list(url).await
    }

    pub async fn create_gateway_api(
        &self,
        gateway_name: &str,
        api_name: &str,
    ) -> Result<GatewayApiContract, ApimError> {
        let url = self.service_url(&["gateways", gateway_name, "apis", api_name], false)?;
        self.send(Method::PUT, url, Some(&json!({}))).await
    }

    pub async fn delete_gateway_api(
        &self,
        gateway_name: &str,
        api_name: &str,
    ) -> Result<(), ApimError> {
        let url = self.service_url(&["gateways", gateway_name, "apis", api_name], false)?;
        self.send_no_content(Method::DELETE, url).await
    }

    /// Generate a gateway access token expiring `num_of_days` days from now.
    pub async fn generate_new_gateway_token(
        &self,
        gateway_name: &str,
        num_of_days: u32,
        key_type: &str,
    ) -> Result<String, ApimError> {
        let expiry = format_expiry(token_expiry((self.clock)(), num_of_days)?);
        let url = self.service_url(&["gateways", gateway_name, "token"], false)?;
        let body = GatewayTokenRequest {
            key_type: key_type.to_string(),
            expiry,
        };
        let token: GatewayToken = self.send(Method::POST, url, Some(&body)).await?;
        Ok(token.value)
    }

    // ---- authorization providers ----------------------------------------

    /// Read-only catalog of identity-provider templates.
    pub async fn list_service_providers(
        &self,
    ) -> Result<Vec<ServiceProviderContract>, ApimError> {
        let url = self.provider_url(&["serviceProviders"], true)?;
        self.list(url).await
    }

    pub async fn list_authorization_providers(
        &self,
    ) -> Result<Vec<AuthorizationProviderContract>, ApimError> {
        let url = self.provider_url(&["authorizationProviders"], true)?;
        self.list(url).await
    }

    /// Create or replace an authorization provider (PUT upsert).
    pub async fn create_authorization_provider(
        &self,
        authorization_provider_name: &str,
        properties: &AuthorizationProviderPropertyContract,
    ) -> Result<AuthorizationProviderContract, ApimError> {
        let url = self.provider_url(
            &["authorizationProviders", authorization_provider_name],
            false,
        )?;
        let body = json!({ "properties": properties });
        self.send(Method::PUT, url, Some(&body)).await
    }

    pub async fn delete_authorization_provider(
        &self,
        authorization_provider_name: &str,
    ) -> Result<(), ApimError> {
        let url = self.provider_url(
            &["authorizationProviders", authorization_provider_name],
            false,
        )?;
        self.send_no_content(Method::DELETE, url).await
    }

    // ---- authorizations --------------------------------------------------

    pub async fn list_authorizations(
        &self,
        authorization_provider_name: &str,
    ) -> Result<Vec<AuthorizationContract>, ApimError> {
        let url = self.provider_url(
            &["authorizationProviders", authorization_provider_name, "authorizations"],
            true,
        )?;
        self.list(url).await
    }

    pub async fn create_authorization(
        &self,
        authorization_provider_name: &str,
        authorization_name: &str,
    ) -> Result<AuthorizationContract, ApimError> {
        let url = self.provider_url(
            &[
                "authorizationProviders",
                authorization_provider_name,
                "authorizations",
                authorization_name,
            ],
            false,
        )?;
        self.send(Method::PUT, url, Some(&json!({}))).await
    }

    pub async fn delete_authorization(
        &self,
        authorization_provider_name: &str,
        authorization_name: &str,
    ) -> Result<(), ApimError> {
        let url = self.provider_url(
            &[
                "authorizationProviders",
                authorization_provider_name,
                "authorizations",
                authorization_name,
            ],
            false,
        )?;
        self.send_no_content(Method::DELETE, url).await
    }

    /// Request the consent URL that starts the OAuth flow of an authorization.
    pub async fn get_login_link(
        &self,
        authorization_provider_name: &str,
        authorization_name: &str,
        body: &LoginLinkRequestContract,
    ) -> Result<LoginLinkResponseContract, ApimError> {
        let url = self.provider_url(
            &[
                "authorizationProviders",
                authorization_provider_name,
                "authorizations",
                authorization_name,
                "getLoginLinks",
            ],
            false,
        )?;
        self.send(Method::POST, url, Some(body)).await
    }

    // ---- permissions -----------------------------------------------------

    pub async fn list_authorization_permissions(
        &self,
        authorization_provider_name: &str,
        authorization_name: &str,
    ) -> Result<Vec<AuthorizationPermissionContract>, ApimError> {
        let url = self.provider_url(
            &[
                "authorizationProviders",
                authorization_provider_name,
                "authorizations",
                authorization_name,
                "permissions",
            ],
            true,
        )?;
        self.list(url).await
    }

    pub async fn create_authorization_permission(
        &self,
        authorization_provider_name: &str,
        authorization_name: &str,
        permission_name: &str,
        object_id: &str,
        tenant_id: &str,
    ) -> Result<AuthorizationPermissionContract, ApimError> {
        let url = self.provider_url(
            &[
                "authorizationProviders",
                authorization_provider_name,
                "authorizations",
                authorization_name,
                "permissions",
                permission_name,
            ],
            false,
        )?;
        let properties = AuthorizationPermissionPropertyContract {
            object_id: object_id.to_string(),
            tenant_id: tenant_id.to_string(),
        };
        let body = json!({ "properties": properties });
        self.send(Method::PUT, url, Some(&body)).await
    }

    pub async fn delete_authorization_permission(
        &self,
        authorization_provider_name: &str,
        authorization_name: &str,
        permission_name: &str,
    ) -> Result<(), ApimError> {
        let url = self.provider_url(
            &[
                "authorizationProviders",
                authorization_provider_name,
                "authorizations",
                authorization_name,
                "permissions",
                permission_name,
            ],
            false,
        )?;
        self.send_no_content(Method::DELETE, url).await
    }

    // ---- resource graph --------------------------------------------------

    /// Web apps in the subscription that carry a managed identity.
    ///
    /// Failures of any kind, including the timeout, yield an empty list.
    pub async fn query_managed_identities(
        &self,
        timeout: Duration,
    ) -> Vec<ManagedIdentityResource> {
        let url = format!(
            "{}/providers/Microsoft.ResourceGraph/resources?api-version={}",
            self.endpoint, RESOURCE_GRAPH_API_VERSION
        );
        let body = json!({
            "subscriptions": [self.subscription_id],
            "options": { "resultFormat": "objectArray" },
            "query": MANAGED_IDENTITY_QUERY,
        });

        #[derive(serde::Deserialize)]
        struct GraphResult {
            #[serde(default)]
            data: Vec<ManagedIdentityResource>,
        }

        match self
            .send_with_timeout::<GraphResult, _>(Method::POST, url, Some(&body), Some(timeout))
            .await
        {
            Ok(result) => result
                .data
                .into_iter()
                .filter(|resource| {
                    resource
                        .identity
                        .as_ref()
                        .is_some_and(|identity| identity.principal_id.is_some())
                })
                .collect(),
            Err(err) => {
                warn!(error = %err, "Managed identity discovery failed; continuing without results");
                Vec::new()
            }
        }
    }

    // ---- plumbing --------------------------------------------------------

    fn service_url(&self, segments: &[&str], paged: bool) -> Result<String, ApimError> {
        versioned_url(&self.base_url, segments, &self.api_version, paged)
    }

    fn provider_url(&self, segments: &[&str], paged: bool) -> Result<String, ApimError> {
        versioned_url(
            &self.base_url,
            segments,
            &self.authorization_provider_api_version,
            paged,
        )
    }

    async fn list<T: DeserializeOwned>(&self, url: String) -> Result<Vec<T>, ApimError> {
        let page: ListPage<T> = self.send(Method::GET, url, None::<&()>).await?;
        if let Some(next_link) = page.next_link {
            debug!(next_link = %next_link, "Ignoring continuation link; only the first page is fetched");
        }
        Ok(page.value)
    }

    async fn send<T, B>(&self, method: Method, url: String, body: Option<&B>) -> Result<T, ApimError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_with_timeout(method, url, body, None).await
    }

    async fn send_no_content(&self, method: Method, url: String) -> Result<(), ApimError> {
        self.execute(method, url, None::<&()>, None).await.map(|_| ())
    }

    async fn send_with_timeout<T, B>(
        &self,
        method: Method,
        url: String,
        body: Option<&B>,
        timeout: Option<Duration>,
    ) -> Result<T, ApimError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let text = self.execute(method, url, body, timeout).await?;
        let parsed = if text.trim().is_empty() {
            serde_json::from_str("null")?
        } else {
            serde_json::from_str(&text)?
        };
        Ok(parsed)
    }

    /// Issue one request and return the body text of a successful response.
    async fn execute<B>(
        &self,
        method: Method,
        url: String,
        body: Option<&B>,
        timeout: Option<Duration>,
    ) -> Result<String, ApimError>
    where
        B: Serialize + ?Sized,
    {
        let token = self.credential.get_token().await?;
        let request_id = Uuid::new_v4();

        let mut request = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(&token.token)
            .header(CLIENT_REQUEST_ID_HEADER, request_id.to_string())
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        debug!(method = %method, url = %url, request_id = %request_id, "Sending control-plane request");

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                record_outcome(&method, "transport_error");
                warn!(method = %method, url = %url, request_id = %request_id, error = %err, "Control-plane request failed");
                return Err(err.into());
            }
        };

        let status = response.status().as_u16();
        let text = response.text().await?;

        if status >= 400 {
            record_outcome(&method, "error");
            let err = ApimError::remote(status, &text);
            warn!(
                method = %method,
                url = %url,
                request_id = %request_id,
                status,
                error = %err,
                "Control-plane request rejected"
            );
            return Err(err);
        }

        record_outcome(&method, "success");
        info!(method = %method, url = %url, request_id = %request_id, status, "Control-plane request completed");
        Ok(text)
    }
}

fn record_outcome(method: &Method, outcome: &'static str) {
    counter!(
        "apim_requests_total",
        "method" => method.as_str().to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

fn site_url(endpoint: &str, subscription_id: &str, resource_group: &str, service_name: &str) -> String {
    format!(
        "{}/subscriptions/{}/resourceGroups/{}/providers/Microsoft.ApiManagement/service/{}",
        endpoint, subscription_id, resource_group, service_name
    )
}

/// Appends resource names as percent-encoded path segments, so names such as
/// guest UPNs (`user_domain#EXT#@tenant`) stay inside their segment.
fn versioned_url(
    base_url: &str,
    segments: &[&str],
    api_version: &str,
    paged: bool,
) -> Result<String, ApimError> {
    let mut url = Url::parse(base_url)?;
    url.path_segments_mut()
        .map_err(|_| ApimError::Unsupported(format!("'{}' cannot carry a resource path", base_url)))?
        .pop_if_empty()
        .extend(segments);
    let query = if paged {
        format!("api-version={}&$top={}", api_version, LIST_PAGE_SIZE)
    } else {
        format!("api-version={}", api_version)
    };
    url.set_query(Some(&query));
    Ok(url.into())
}

/// Expiry instant of a gateway token: the same UTC wall-clock time `num_of_days` later.
pub fn token_expiry(now: DateTime<Utc>, num_of_days: u32) -> Result<DateTime<Utc>, ApimError> {
    TimeDelta::try_days(i64::from(num_of_days))
        .and_then(|days| now.checked_add_signed(days))
        .ok_or(ApimError::MissingContext("The token expiry is out of range."))
}

/// ISO-8601 instant with millisecond precision, as the token endpoint expects.
pub fn format_expiry(expiry: DateTime<Utc>) -> String {
    expiry.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_token_expiry_advances_utc_date() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let expiry = token_expiry(now, 7).unwrap();
        assert_eq!(expiry, Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap());
        assert_eq!(format_expiry(expiry), "2024-01-08T00:00:00.000Z");
    }

    #[test]
    fn test_token_expiry_crosses_month_boundary() {
        let now = Utc.with_ymd_and_hms(2024, 2, 27, 13, 45, 10).unwrap();
        assert_eq!(
            token_expiry(now, 3).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 13, 45, 10).unwrap()
        );
    }

    #[test]
    fn test_token_expiry_out_of_range_is_an_error() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let err = token_expiry(now, u32::MAX).unwrap_err();
        assert!(matches!(
            err,
            ApimError::MissingContext("The token expiry is out of range.")
        ));
    }

    #[test]
    fn test_versioned_url_shapes() {
        let base = site_url("https://management.azure.com", "sub", "rg", "svc");
        assert_eq!(
            base,
            "https://management.azure.com/subscriptions/sub/resourceGroups/rg/providers/Microsoft.ApiManagement/service/svc"
        );
        assert_eq!(
            versioned_url(&base, &["gateways"], "2018-06-01-preview", true).unwrap(),
            format!("{}/gateways?api-version=2018-06-01-preview&$top=100", base)
        );
        assert_eq!(
            versioned_url(&base, &[], "2018-06-01-preview", false).unwrap(),
            format!("{}?api-version=2018-06-01-preview", base)
        );
    }

    #[test]
    fn test_versioned_url_encodes_resource_names() {
        let base = site_url("https://management.azure.com", "sub", "rg", "svc");
        let url = versioned_url(
            &base,
            &["permissions", "guest_contoso.com#EXT#@t.onmicrosoft.com", "a?b/c"],
            "2021-04-01-preview",
            false,
        )
        .unwrap();
        assert_eq!(
            url,
            format!(
                "{}/permissions/guest_contoso.com%23EXT%23@t.onmicrosoft.com/a%3Fb%2Fc?api-version=2021-04-01-preview",
                base
            )
        );
    }
}
