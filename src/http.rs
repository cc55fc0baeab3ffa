//! Shared HTTP transport for the provider adapters.
//!
//! Every adapter talks to its upstream through a [`Transport`]. The request helpers here
//! send the request, read the body and translate transport failures and HTTP statuses
//! into the crate's provider error taxonomy, so `reqwest` errors never escape an adapter.

use crate::{Error, Provider, Result};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

const USER_AGENT_VALUE: &str = "TempMailWatcher/2.0 (https://github.com/zebbern/temp-mail-watcher)";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

pub(crate) type Param<'a> = (&'a str, Cow<'a, str>);

/// Which part of the provider lifecycle a request belongs to.
///
/// Auth-style statuses mean "the service refused" while setting up an address, but
/// "the session is gone" once polling an established one. A missing single message only
/// means that message is gone.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Setup,
    Session,
    Message,
}

/// How a request carries the session credential.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Auth<'a> {
    None,
    Bearer(&'a str),
    /// The credential is a URL path segment; it is masked in logs and error reasons.
    InPath(&'a str),
}

#[derive(Copy, Clone, Debug)]
enum ApiMethod {
    Get,
    Post,
}

/// HTTP client shared by all adapters.
///
/// Cheap to clone; the underlying `reqwest` connection pool and cookie jar are shared.
#[derive(Clone)]
pub struct Transport {
    http: reqwest::Client,
    proxy: Option<String>,
    user_agent: String,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("http", &"<reqwest::Client>")
            .field("proxy", &self.proxy)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Transport {
    /// Create a [`TransportBuilder`] with default settings.
    pub fn builder() -> TransportBuilder {
        TransportBuilder::new()
    }

    /// Build a transport with default settings.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the TLS backend cannot be initialised.
    pub fn new() -> Result<Self> {
        TransportBuilder::new().build()
    }

    /// Proxy URL configured for this transport, if any.
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Browser-facing user agent sent with every request.
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub(crate) async fn get_json(
        &self,
        provider: Provider,
        phase: Phase,
        url: &str,
        params: &[Param<'_>],
        auth: Auth<'_>,
    ) -> Result<Value> {
        let request = self.http.get(url).query(params);
        self.execute(provider, phase, ApiMethod::Get, url, params, request, auth)
            .await
    }

    pub(crate) async fn post_json(
        &self,
        provider: Provider,
        phase: Phase,
        url: &str,
        body: &Value,
        auth: Auth<'_>,
    ) -> Result<Value> {
        let request = self.http.post(url).json(body);
        self.execute(provider, phase, ApiMethod::Post, url, &[], request, auth)
            .await
    }

    pub(crate) async fn post_form(
        &self,
        provider: Provider,
        phase: Phase,
        url: &str,
        params: &[Param<'_>],
        form: &[Param<'_>],
    ) -> Result<Value> {
        let request = self.http.post(url).query(params).form(form);
        self.execute(provider, phase, ApiMethod::Post, url, params, request, Auth::None)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        provider: Provider,
        phase: Phase,
        method: ApiMethod,
        url: &str,
        params: &[Param<'_>],
        request: reqwest::RequestBuilder,
        auth: Auth<'_>,
    ) -> Result<Value> {
        let url = redact_url(url, auth);
        tracing::debug!(
            %provider,
            method = ?method,
            url = %url,
            query = %redact_params(params),
            "provider request"
        );

        let response = request
            .headers(Self::headers(provider, auth)?)
            .send()
            .await
            .map_err(|e| transport_error(provider, e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error(provider, e))?;

        tracing::debug!(
            %provider,
            status = status.as_u16(),
            bytes = body.len(),
            "provider response"
        );

        if !status.is_success() {
            return Err(classify_status(provider, phase, status, &url, &body));
        }

        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }

        serde_json::from_slice(&body).map_err(|e| {
            Error::malformed(
                provider,
                format!("invalid JSON from {url}: {e} (body snippet: {})", snippet(&body)),
            )
        })
    }

    fn headers(provider: Provider, auth: Auth<'_>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
        );
        if let Auth::Bearer(token) = auth {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| Error::malformed(provider, "session token is not a valid header"))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }
}

/// Builder for a [`Transport`].
///
/// # Defaults
/// - No proxy
/// - `danger_accept_invalid_certs = false`
/// - `TempMailWatcher/2.0` user agent
/// - 15 second timeout per request
#[derive(Debug, Clone)]
pub struct TransportBuilder {
    proxy: Option<String>,
    danger_accept_invalid_certs: bool,
    user_agent: String,
    timeout: Duration,
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            proxy: None,
            danger_accept_invalid_certs: false,
            user_agent: USER_AGENT_VALUE.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Route every request through a proxy (`http://`, `https://` or `socks5://`).
    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    /// Accept invalid TLS certificates.
    ///
    /// # Security
    /// Only useful for traffic inspection in controlled environments.
    pub fn danger_accept_invalid_certs(mut self, value: bool) -> Self {
        self.danger_accept_invalid_certs = value;
        self
    }

    /// Override the user agent string.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Per-request timeout. A hung provider blocks its poll cycle at most this long.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the [`Transport`].
    ///
    /// # Errors
    /// Returns [`Error::Config`] for an invalid proxy URL or user agent.
    pub fn build(self) -> Result<Transport> {
        let mut builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(self.danger_accept_invalid_certs)
            .user_agent(self.user_agent.clone())
            .timeout(self.timeout);

        if let Some(proxy_url) = &self.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| Error::Config(format!("invalid proxy `{proxy_url}`: {e}")))?;
            builder = builder.proxy(proxy);
        }

        // GuerrillaMail ties the sid token to a PHPSESSID cookie.
        let http = builder
            .cookie_store(true)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Transport {
            http,
            proxy: self.proxy,
            user_agent: self.user_agent,
        })
    }
}

fn transport_error(provider: Provider, err: reqwest::Error) -> Error {
    let err = err.without_url();
    let reason = if err.is_timeout() {
        format!("request timed out: {err}")
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    };
    Error::unavailable(provider, reason)
}

fn classify_status(
    provider: Provider,
    phase: Phase,
    status: StatusCode,
    url: &str,
    body: &[u8],
) -> Error {
    let reason = format!(
        "HTTP {} for {} (body snippet: {})",
        status.as_u16(),
        url,
        snippet(body)
    );

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Error::unavailable(provider, reason);
    }

    match (phase, status) {
        (Phase::Message, StatusCode::NOT_FOUND | StatusCode::GONE) => {
            Error::malformed(provider, reason)
        }
        (
            Phase::Session | Phase::Message,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN,
        )
        | (Phase::Session, StatusCode::NOT_FOUND) => Error::SessionExpired { provider },
        _ => Error::rejected(provider, reason),
    }
}

fn redact_url(url: &str, auth: Auth<'_>) -> String {
    match auth {
        Auth::InPath(secret) if !secret.is_empty() => url.replace(secret, "<redacted>"),
        _ => url.to_string(),
    }
}

fn snippet(body: &[u8]) -> String {
    String::from_utf8_lossy(body).chars().take(200).collect()
}

fn redact_params(params: &[Param<'_>]) -> String {
    if params.is_empty() {
        return "<none>".to_string();
    }
    params
        .iter()
        .map(|(key, value)| {
            if key.to_lowercase().contains("token") {
                format!("{key}=<redacted>")
            } else {
                format!("{key}={value}")
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;
    use serde_json::json;

    fn transport() -> Transport {
        Transport::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn get_json_parses_body_and_sends_bearer() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/messages")
                .query_param("page", "1")
                .header("Authorization", "Bearer tok");
            then.status(200).json_body(json!({ "ok": true }));
        });

        let value = transport()
            .get_json(
                Provider::MailTm,
                Phase::Session,
                &server.url("/messages"),
                &[("page", Cow::Borrowed("1"))],
                Auth::Bearer("tok"),
            )
            .await
            .unwrap();

        assert_eq!(value, json!({ "ok": true }));
        mock.assert();
    }

    #[tokio::test]
    async fn server_errors_and_rate_limits_are_unavailable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/down");
            then.status(503).body("maintenance");
        });
        server.mock(|when, then| {
            when.method(GET).path("/slow-down");
            then.status(429).body("too many");
        });

        let t = transport();
        for path in ["/down", "/slow-down"] {
            let err = t
                .get_json(Provider::MailGw, Phase::Session, &server.url(path), &[], Auth::None)
                .await
                .unwrap_err();
            assert!(
                matches!(err, Error::ProviderUnavailable { .. }),
                "{path}: {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn unauthorized_depends_on_phase() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(401).body("bad credentials");
        });

        let t = transport();
        let url = server.url("/token");

        let setup = t
            .post_json(Provider::MailTm, Phase::Setup, &url, &json!({}), Auth::None)
            .await
            .unwrap_err();
        assert!(matches!(setup, Error::ProviderRejected { .. }));
        assert!(setup.to_string().contains("bad credentials"));

        let session = t
            .post_json(Provider::MailTm, Phase::Session, &url, &json!({}), Auth::None)
            .await
            .unwrap_err();
        assert!(matches!(session, Error::SessionExpired { .. }));
    }

    #[tokio::test]
    async fn invalid_json_is_malformed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/html");
            then.status(200).body("<html>captcha</html>");
        });

        let err = transport()
            .get_json(
                Provider::GuerrillaMail,
                Phase::Session,
                &server.url("/html"),
                &[],
                Auth::None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn connection_refused_is_unavailable() {
        let err = transport()
            .get_json(
                Provider::TempMailLol,
                Phase::Session,
                "http://127.0.0.1:9/",
                &[],
                Auth::None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProviderUnavailable { .. }));
    }

    #[test]
    fn invalid_proxy_is_a_config_error() {
        let err = Transport::builder().proxy("not a url").build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn missing_message_is_malformed_but_revoked_token_is_expired() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/messages/gone");
            then.status(404).body("not found");
        });
        server.mock(|when, then| {
            when.method(GET).path("/messages/locked");
            then.status(401).body("expired");
        });

        let t = transport();
        let gone = t
            .get_json(
                Provider::MailTm,
                Phase::Message,
                &server.url("/messages/gone"),
                &[],
                Auth::Bearer("tok"),
            )
            .await
            .unwrap_err();
        assert!(matches!(gone, Error::MalformedResponse { .. }), "{gone:?}");

        let locked = t
            .get_json(
                Provider::MailTm,
                Phase::Message,
                &server.url("/messages/locked"),
                &[],
                Auth::Bearer("tok"),
            )
            .await
            .unwrap_err();
        assert!(matches!(locked, Error::SessionExpired { .. }), "{locked:?}");
    }

    #[tokio::test]
    async fn path_credentials_stay_out_of_error_reasons() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/auth/s3cret-token");
            then.status(400).body("bad request");
        });

        let err = transport()
            .get_json(
                Provider::TempMailLol,
                Phase::Session,
                &server.url("/auth/s3cret-token"),
                &[],
                Auth::InPath("s3cret-token"),
            )
            .await
            .unwrap_err();
        let reason = err.to_string();
        assert!(!reason.contains("s3cret-token"), "{reason}");
        assert!(reason.contains("/auth/<redacted>"), "{reason}");
    }

    #[test]
    fn in_path_credentials_are_redacted_from_urls() {
        assert_eq!(
            redact_url("https://api.example/auth/abc123", Auth::InPath("abc123")),
            "https://api.example/auth/<redacted>"
        );
        assert_eq!(
            redact_url("https://api.example/messages", Auth::Bearer("abc123")),
            "https://api.example/messages"
        );
    }

    #[test]
    fn token_params_are_redacted() {
        let params = [
            ("f", Cow::Borrowed("check_email")),
            ("sid_token", Cow::Borrowed("s3cret")),
        ];
        assert_eq!(redact_params(&params), "f=check_email&sid_token=<redacted>");
        assert_eq!(redact_params(&[]), "<none>");
    }
}
