//! The remote portal client.
//!
//! Two HTTP clients back each `PortalClient`: the login client never follows
//! redirects (the authentication response carries the session cookie on a
//! 302, and following it would lose the `Set-Cookie` header), while the
//! invoke client follows a bounded number of redirects.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, SET_COOKIE};
use reqwest::redirect::Policy;
use reqwest::Method;
use tracing::{debug, warn};

use pgw_core::{GatewayError, GatewayResult, QuerySpec};

/// Name of the portal's session cookie.
pub const SESSION_COOKIE: &str = "JSESSIONID";

/// Fixed portal paths.
const LOGIN_PATH: &str = "/admin/api/login";
const CURRENT_PORTAL_PATH: &str = "/admin/api/currentPortal";
const PORTALS_PATH: &str = "/admin/api/portals";

/// Configuration for connecting to a remote portal.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Skip TLS certificate verification on the downstream connection.
    pub insecure: bool,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Redirects followed by non-login calls.
    pub max_redirects: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            insecure: true,
            timeout_secs: 10,
            max_redirects: 5,
        }
    }
}

/// A downstream response, passed through verbatim.
#[derive(Debug, Clone)]
pub struct PortalResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

/// Client for one remote portal host.
pub struct PortalClient {
    base_url: String,
    /// Follows up to `max_redirects` redirects.
    http: reqwest::Client,
    /// Never follows redirects; used only for the credential exchange.
    login_http: reqwest::Client,
}

impl PortalClient {
    /// Build a client for `host`. A bare hostname gets an `https://` scheme;
    /// hosts that already carry a scheme are used as-is.
    pub fn new(host: &str, config: &ClientConfig) -> GatewayResult<Self> {
        let base_url = if host.contains("://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("https://{host}")
        };

        let timeout = Duration::from_secs(config.timeout_secs);

        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .redirect(Policy::limited(config.max_redirects))
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Other(format!("failed to create client: {e}")))?;

        let login_http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .redirect(Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Other(format!("failed to create client: {e}")))?;

        Ok(Self {
            base_url,
            http,
            login_http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange credentials for a portal session token.
    ///
    /// Both 2xx and 3xx responses are inspected for the session cookie, since
    /// portals commonly answer the login POST with a 302. An error status is
    /// a rejection even when it carries a cookie: portals set `JSESSIONID` on
    /// error pages too, and such a token is not an authenticated session.
    pub async fn authenticate(&self, username: &str, password: &str) -> GatewayResult<String> {
        let url = format!("{}{LOGIN_PATH}", self.base_url);
        debug!(%url, username, "authenticating against portal");

        let response = self
            .login_http
            .post(&url)
            .form(&[("j_username", username), ("j_password", password)])
            .send()
            .await
            .map_err(upstream_err)?;

        let status = response.status();
        debug!(status = status.as_u16(), "login response");

        if status.is_client_error() || status.is_server_error() {
            return Err(GatewayError::UpstreamAuth(format!(
                "login rejected with status {status}"
            )));
        }

        match extract_session_cookie(response.headers()) {
            Some(token) => Ok(token),
            None => Err(GatewayError::UpstreamAuth(
                "no JSESSIONID cookie in login response".into(),
            )),
        }
    }

    /// Issue an authenticated call and return the downstream response
    /// verbatim, whatever its status.
    pub async fn invoke(
        &self,
        token: &str,
        method: &str,
        path: &str,
        body: Option<String>,
        extra_headers: &BTreeMap<String, String>,
    ) -> GatewayResult<PortalResponse> {
        let method = Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| GatewayError::BadRequest(format!("invalid method: {method}")))?;
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, %url, "invoking portal");

        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        headers.insert(
            reqwest::header::COOKIE,
            HeaderValue::from_str(&format!("{SESSION_COOKIE}={token}"))
                .map_err(|e| GatewayError::BadRequest(format!("invalid session token: {e}")))?,
        );
        for (name, value) in extra_headers {
            let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
                warn!(header = %name, "skipping invalid header name");
                continue;
            };
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.insert(name, value);
                }
                Err(_) => warn!(header = %name, "skipping invalid header value"),
            }
        }

        let mut request = self.http.request(method, &url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(upstream_err)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await.map_err(upstream_err)?;

        Ok(PortalResponse {
            status,
            headers,
            body,
        })
    }

    /// Switch the remote "current portal" context to the global
    /// administrative scope. Tenant listing is only valid from there.
    pub async fn browse_global(&self, token: &str) -> GatewayResult<u16> {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/xml".to_string());

        let response = self
            .invoke(
                token,
                "PUT",
                CURRENT_PORTAL_PATH,
                Some("<val></val>".to_string()),
                &headers,
            )
            .await?;

        if !(200..300).contains(&response.status) {
            return Err(GatewayError::Upstream(format!(
                "browse to global admin failed with status {}",
                response.status
            )));
        }
        Ok(response.status)
    }

    /// Run the tenant-listing query. The caller must have switched to the
    /// global administrative scope first.
    pub async fn query_tenants(
        &self,
        token: &str,
        start_from: u32,
        count_limit: u32,
    ) -> GatewayResult<Vec<String>> {
        let query = QuerySpec::new(start_from, count_limit, vec!["name".into()]);
        let xml = query.to_xml()?;

        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "text/plain".to_string());

        let response = self
            .invoke(token, "POST", PORTALS_PATH, Some(xml), &headers)
            .await?;

        if !(200..300).contains(&response.status) {
            return Err(GatewayError::Upstream(format!(
                "tenant query failed with status {}",
                response.status
            )));
        }

        Ok(pgw_core::decode_tenant_names(&response.body))
    }
}

/// Pull the session cookie value out of `Set-Cookie` response headers.
fn extract_session_cookie(headers: &HeaderMap) -> Option<String> {
    let prefix = format!("{SESSION_COOKIE}=");
    for value in headers.get_all(SET_COOKIE) {
        let Ok(cookie) = value.to_str() else { continue };
        if let Some(rest) = cookie.strip_prefix(&prefix) {
            let token = rest.split(';').next().unwrap_or(rest).trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }
    None
}

fn upstream_err(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Upstream(e.to_string())
    }
}
