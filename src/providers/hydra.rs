//! mail.tm / mail.gw adapter.
//!
//! Both services run the same Hydra (JSON-LD) API: pick a domain, register an account
//! with a random password, exchange the credentials for a bearer token, then list and
//! fetch messages with that token.

use chrono::Utc;
use serde_json::{Value, json};
use std::borrow::Cow;

use super::{RawMessage, json_snippet, list_field, opt_str, str_field};
use crate::http::{Auth, Phase, Transport};
use crate::models::SessionToken;
use crate::normalize::{non_empty, parse_timestamp, random_string, value_to_string};
use crate::{Address, AddressOptions, Error, MessageBody, NormalizedMessage, Provider, Result};

const MEMBERS: &str = "hydra:member";

/// Adapter for a Hydra-style API (mail.tm or mail.gw).
#[derive(Debug)]
pub struct Hydra {
    provider: Provider,
    transport: Transport,
    base_url: String,
}

impl Hydra {
    /// Create an adapter for `provider` rooted at `base_url`.
    pub fn new(provider: Provider, transport: Transport, base_url: &str) -> Self {
        Self {
            provider,
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn provider(&self) -> Provider {
        self.provider
    }

    pub(crate) async fn create_address(&mut self, options: &AddressOptions) -> Result<Address> {
        if options.rush || options.alias.is_some() {
            tracing::debug!(provider = %self.provider, "ignoring rush/alias options");
        }

        let domain = self.pick_domain(options.domain.as_deref()).await?;
        let address = format!("{}@{domain}", random_string(10));
        let password = random_string(12);
        let credentials = json!({ "address": address, "password": password });

        self.transport
            .post_json(
                self.provider,
                Phase::Setup,
                &self.url("/accounts"),
                &credentials,
                Auth::None,
            )
            .await?;

        let token_response = self
            .transport
            .post_json(
                self.provider,
                Phase::Setup,
                &self.url("/token"),
                &credentials,
                Auth::None,
            )
            .await?;
        let token = str_field(self.provider, &token_response, "token")?;

        Ok(Address::new(
            address,
            self.provider,
            SessionToken::new(token),
        ))
    }

    /// Choose the requested domain if the service offers it, else the first active one.
    async fn pick_domain(&self, wanted: Option<&str>) -> Result<String> {
        let response = self
            .transport
            .get_json(
                self.provider,
                Phase::Setup,
                &self.url("/domains"),
                &[("page", Cow::Borrowed("1"))],
                Auth::None,
            )
            .await?;

        let domains: Vec<&str> = list_field(self.provider, &response, MEMBERS)?
            .iter()
            .filter(|d| d.get("isActive").and_then(Value::as_bool).unwrap_or(true))
            .filter_map(|d| d.get("domain").and_then(Value::as_str))
            .collect();

        match wanted {
            Some(wanted) => domains
                .iter()
                .find(|d| d.eq_ignore_ascii_case(wanted))
                .map(|d| d.to_string())
                .ok_or_else(|| {
                    Error::rejected(
                        self.provider,
                        format!(
                            "domain `{wanted}` is not offered (available: {})",
                            domains.join(", ")
                        ),
                    )
                }),
            None => domains
                .first()
                .map(|d| d.to_string())
                .ok_or_else(|| Error::rejected(self.provider, "no active domains available")),
        }
    }

    pub(crate) async fn list_messages(&mut self, address: &Address) -> Result<Vec<RawMessage>> {
        let response = self
            .transport
            .get_json(
                self.provider,
                Phase::Session,
                &self.url("/messages"),
                &[("page", Cow::Borrowed("1"))],
                Auth::Bearer(address.session_token().expose()),
            )
            .await?;

        let listed_at = Utc::now();
        Ok(list_field(self.provider, &response, MEMBERS)?
            .iter()
            .map(|item| RawMessage::new(self.provider, item.clone(), listed_at))
            .collect())
    }

    pub(crate) async fn fetch_body(
        &self,
        address: &Address,
        raw: &RawMessage,
    ) -> Result<MessageBody> {
        let id = self.message_id(raw)?;
        let response = self
            .transport
            .get_json(
                self.provider,
                Phase::Message,
                &self.url(&format!("/messages/{id}")),
                &[],
                Auth::Bearer(address.session_token().expose()),
            )
            .await?;

        if !response.is_object() {
            return Err(Error::malformed(
                self.provider,
                format!("message {id} is not an object ({})", json_snippet(&response)),
            ));
        }

        Ok(MessageBody {
            text: non_empty(opt_str(&response, "text")),
            html: non_empty(html_field(&response)),
        })
    }

    pub(crate) fn message_id(&self, raw: &RawMessage) -> Result<String> {
        let data = raw.expect_provider(self.provider)?;
        data.get("id").and_then(value_to_string).ok_or_else(|| {
            Error::malformed(
                self.provider,
                format!("message without `id` ({})", json_snippet(data)),
            )
        })
    }

    pub(crate) fn normalize(
        &self,
        address: &Address,
        raw: &RawMessage,
        body: MessageBody,
    ) -> Result<NormalizedMessage> {
        let id = self.message_id(raw)?;
        let data = raw.data();

        Ok(NormalizedMessage {
            id,
            mailbox: address.value().to_string(),
            from: sender(data),
            subject: opt_str(data, "subject").unwrap_or_default(),
            body_text: body.text,
            body_html: body.html,
            received_at: data
                .get("createdAt")
                .and_then(parse_timestamp)
                .unwrap_or_else(|| raw.listed_at()),
            provider: self.provider,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// `from` is `{address, name}`; render it as `Name <address>` when a name is present.
fn sender(data: &Value) -> String {
    let from = data.get("from");
    let address = from.and_then(|f| opt_str(f, "address")).unwrap_or_default();
    match from.and_then(|f| non_empty(opt_str(f, "name"))) {
        Some(name) if !address.is_empty() => format!("{name} <{address}>"),
        Some(name) => name,
        None => address,
    }
}

/// `html` is an array of parts on the message resource.
fn html_field(data: &Value) -> Option<String> {
    match data.get("html")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => Some(
            parts
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::{address, transport};
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;

    fn adapter(server: &MockServer) -> Hydra {
        Hydra::new(Provider::MailTm, transport(), &server.base_url())
    }

    fn mock_domains(server: &MockServer) {
        server.mock(|when, then| {
            when.method(GET).path("/domains").query_param("page", "1");
            then.status(200).json_body(json!({
                "hydra:member": [
                    { "domain": "retired.example", "isActive": false },
                    { "domain": "mailto.plus", "isActive": true },
                    { "domain": "other.plus", "isActive": true }
                ]
            }));
        });
    }

    #[tokio::test]
    async fn create_address_registers_account_and_fetches_token() {
        let server = MockServer::start();
        mock_domains(&server);
        let accounts = server.mock(|when, then| {
            when.method(POST)
                .path("/accounts")
                .body_contains("@mailto.plus");
            then.status(201).json_body(json!({ "id": "acc-1" }));
        });
        let token = server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200).json_body(json!({ "id": "acc-1", "token": "jwt-1" }));
        });

        let created = adapter(&server)
            .create_address(&AddressOptions::default())
            .await
            .unwrap();

        assert!(created.value().ends_with("@mailto.plus"));
        assert_eq!(created.session_token().expose(), "jwt-1");
        accounts.assert();
        token.assert();
    }

    #[tokio::test]
    async fn requested_domain_is_used_or_rejected() {
        let server = MockServer::start();
        mock_domains(&server);
        server.mock(|when, then| {
            when.method(POST).path("/accounts");
            then.status(201).json_body(json!({}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/token");
            then.status(200).json_body(json!({ "token": "jwt" }));
        });

        let mut hydra = adapter(&server);
        let chosen = hydra
            .create_address(&AddressOptions {
                domain: Some("OTHER.plus".to_string()),
                ..AddressOptions::default()
            })
            .await
            .unwrap();
        assert!(chosen.value().ends_with("@other.plus"));

        let err = hydra
            .create_address(&AddressOptions {
                domain: Some("retired.example".to_string()),
                ..AddressOptions::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProviderRejected { .. }));
    }

    #[tokio::test]
    async fn taken_address_is_rejected() {
        let server = MockServer::start();
        mock_domains(&server);
        server.mock(|when, then| {
            when.method(POST).path("/accounts");
            then.status(422)
                .json_body(json!({ "detail": "address: This value is already used." }));
        });

        let err = adapter(&server)
            .create_address(&AddressOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProviderRejected { .. }));
    }

    #[tokio::test]
    async fn list_and_fetch_with_bearer_token() {
        let server = MockServer::start();
        let list = server.mock(|when, then| {
            when.method(GET)
                .path("/messages")
                .header("Authorization", "Bearer jwt-1");
            then.status(200).json_body(json!({
                "hydra:member": [{
                    "id": "msg-1",
                    "from": { "address": "noreply@example.com", "name": "Example" },
                    "subject": "Verify",
                    "intro": "Click",
                    "createdAt": "2024-05-01T12:30:00+00:00"
                }],
                "hydra:totalItems": 1
            }));
        });
        let fetch = server.mock(|when, then| {
            when.method(GET)
                .path("/messages/msg-1")
                .header("Authorization", "Bearer jwt-1");
            then.status(200).json_body(json!({
                "id": "msg-1",
                "text": "Click the link",
                "html": ["<p>Click</p>", "<p>the link</p>"]
            }));
        });

        let mut hydra = adapter(&server);
        let addr = address(Provider::MailTm, "abc@mailto.plus", "jwt-1");
        let raws = hydra.list_messages(&addr).await.unwrap();
        let body = hydra.fetch_body(&addr, &raws[0]).await.unwrap();
        assert_eq!(body.text.as_deref(), Some("Click the link"));
        assert_eq!(body.html.as_deref(), Some("<p>Click</p>\n<p>the link</p>"));

        let message = hydra.normalize(&addr, &raws[0], body).unwrap();
        assert_eq!(message.id, "msg-1");
        assert_eq!(message.from, "Example <noreply@example.com>");
        assert_eq!(message.mailbox, "abc@mailto.plus");
        assert_eq!(message.received_at.timestamp(), 1_714_566_600);

        list.assert();
        fetch.assert();
    }

    #[tokio::test]
    async fn unauthorized_listing_is_session_expired() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/messages");
            then.status(401).json_body(json!({ "message": "Expired JWT Token" }));
        });

        let err = adapter(&server)
            .list_messages(&address(Provider::MailTm, "a@b.c", "old"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionExpired { provider: Provider::MailTm }));
    }

    #[tokio::test]
    async fn message_deleted_before_fetch_is_malformed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/messages/gone");
            then.status(404).json_body(json!({ "detail": "Not Found" }));
        });

        let hydra = adapter(&server);
        let addr = address(Provider::MailTm, "abc@mailto.plus", "jwt-1");
        let raw = RawMessage::new(Provider::MailTm, json!({ "id": "gone" }), Utc::now());
        let err = hydra.fetch_body(&addr, &raw).await.unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn revoked_token_on_fetch_is_session_expired() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/messages/msg-1");
            then.status(401).json_body(json!({ "message": "Invalid JWT Token" }));
        });

        let hydra = adapter(&server);
        let addr = address(Provider::MailTm, "abc@mailto.plus", "jwt-1");
        let raw = RawMessage::new(Provider::MailTm, json!({ "id": "msg-1" }), Utc::now());
        let err = hydra.fetch_body(&addr, &raw).await.unwrap_err();
        assert!(matches!(err, Error::SessionExpired { provider: Provider::MailTm }));
    }

    #[test]
    fn normalize_is_deterministic_for_mail_gw() {
        let hydra = Hydra::new(Provider::MailGw, transport(), "http://unused/");
        let addr = address(Provider::MailGw, "a@b.c", "t");
        let raw = RawMessage::new(
            Provider::MailGw,
            json!({ "id": "m", "from": { "address": "s@x.y" }, "subject": "hi" }),
            Utc::now(),
        );
        let first = hydra.normalize(&addr, &raw, MessageBody::default()).unwrap();
        let second = hydra.normalize(&addr, &raw, MessageBody::default()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.from, "s@x.y");
        assert_eq!(first.provider, Provider::MailGw);
    }
}
