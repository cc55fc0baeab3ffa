//! tempmail.lol adapter.
//!
//! The inbox endpoint is incremental: each message is delivered once and then dropped
//! upstream. The adapter keeps every message it has received for the current address
//! so `list_messages` still returns the whole mailbox.

use chrono::Utc;
use serde_json::Value;

use super::{RawMessage, json_snippet, list_field, opt_str, str_field};
use crate::http::{Auth, Phase, Transport};
use crate::models::SessionToken;
use crate::normalize::{non_empty, parse_timestamp};
use crate::{Address, AddressOptions, Error, MessageBody, NormalizedMessage, Provider, Result};

const PROVIDER: Provider = Provider::TempMailLol;

/// Adapter for the tempmail.lol API.
#[derive(Debug)]
pub struct TempMailLol {
    transport: Transport,
    base_url: String,
    inbox: Vec<RawMessage>,
}

impl TempMailLol {
    /// Create an adapter rooted at `base_url`.
    pub fn new(transport: Transport, base_url: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            inbox: Vec::new(),
        }
    }

    pub(crate) async fn create_address(&mut self, options: &AddressOptions) -> Result<Address> {
        if options.domain.is_some() || options.alias.is_some() {
            tracing::debug!(provider = %PROVIDER, "ignoring domain/alias options");
        }

        let path = if options.rush {
            "/generate/rush"
        } else {
            "/generate"
        };
        let response = self
            .transport
            .get_json(
                PROVIDER,
                Phase::Setup,
                &format!("{}{path}", self.base_url),
                &[],
                Auth::None,
            )
            .await?;

        let address = str_field(PROVIDER, &response, "address")?;
        let token = str_field(PROVIDER, &response, "token")?;

        self.inbox.clear();
        Ok(Address::new(address, PROVIDER, SessionToken::new(token)))
    }

    pub(crate) async fn list_messages(&mut self, address: &Address) -> Result<Vec<RawMessage>> {
        let token = address.session_token().expose();
        let url = format!("{}/auth/{token}", self.base_url);
        let response = self
            .transport
            .get_json(PROVIDER, Phase::Session, &url, &[], Auth::InPath(token))
            .await?;

        if response.get("token").and_then(Value::as_str) == Some("invalid") {
            return Err(Error::SessionExpired { provider: PROVIDER });
        }

        let listed_at = Utc::now();
        let fresh = match response.get("email") {
            None | Some(Value::Null) => Vec::new(),
            Some(_) => list_field(PROVIDER, &response, "email")?.clone(),
        };
        self.inbox.extend(
            fresh
                .into_iter()
                .map(|item| RawMessage::new(PROVIDER, item, listed_at)),
        );

        Ok(self.inbox.clone())
    }

    pub(crate) fn fetch_body(&self, raw: &RawMessage) -> Result<MessageBody> {
        let data = raw.expect_provider(PROVIDER)?;
        Ok(MessageBody {
            text: non_empty(opt_str(data, "body")),
            html: non_empty(opt_str(data, "html")),
        })
    }

    /// The API has no message id; derive one from the message's own content.
    pub(crate) fn message_id(&self, raw: &RawMessage) -> Result<String> {
        let data = raw.expect_provider(PROVIDER)?;
        if !data.is_object() {
            return Err(Error::malformed(
                PROVIDER,
                format!("message is not an object ({})", json_snippet(data)),
            ));
        }

        let date = data
            .get("date")
            .and_then(parse_timestamp)
            .map(|d| d.timestamp_millis().to_string())
            .unwrap_or_default();
        let from = opt_str(data, "from").unwrap_or_default();
        let subject = opt_str(data, "subject").unwrap_or_default();
        let body_len = opt_str(data, "body").map(|b| b.len()).unwrap_or(0);

        Ok(format!("{date}_{from}_{subject}_{body_len}"))
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
            from: opt_str(data, "from").unwrap_or_default(),
            subject: opt_str(data, "subject").unwrap_or_default(),
            body_text: body.text,
            body_html: body.html,
            received_at: data
                .get("date")
                .and_then(parse_timestamp)
                .unwrap_or_else(|| raw.listed_at()),
            provider: PROVIDER,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::{address, transport};
    use httpmock::Method::GET;
    use httpmock::MockServer;
    use serde_json::json;

    #[tokio::test]
    async fn rush_option_selects_rush_endpoint() {
        let server = MockServer::start();
        let rush = server.mock(|when, then| {
            when.method(GET).path("/generate/rush");
            then.status(200)
                .json_body(json!({ "address": "x1@rush.lol", "token": "tok-r" }));
        });

        let mut lol = TempMailLol::new(transport(), &server.base_url());
        let created = lol
            .create_address(&AddressOptions {
                rush: true,
                ..AddressOptions::default()
            })
            .await
            .unwrap();

        assert_eq!(created.value(), "x1@rush.lol");
        assert_eq!(created.session_token().expose(), "tok-r");
        rush.assert();
    }

    #[tokio::test]
    async fn incremental_inbox_is_returned_as_full_snapshot() {
        let server = MockServer::start();
        let mut first = server.mock(|when, then| {
            when.method(GET).path("/auth/tok");
            then.status(200).json_body(json!({
                "email": [{
                    "from": "a@example.com",
                    "to": "x@lol",
                    "subject": "one",
                    "body": "first",
                    "html": null,
                    "date": 1714566600000_i64
                }],
                "token": "tok"
            }));
        });

        let mut lol = TempMailLol::new(transport(), &server.base_url());
        let addr = address(PROVIDER, "x@lol", "tok");
        let snapshot = lol.list_messages(&addr).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        first.delete();

        server.mock(|when, then| {
            when.method(GET).path("/auth/tok");
            then.status(200).json_body(json!({ "email": [], "token": "tok" }));
        });
        let snapshot = lol.list_messages(&addr).await.unwrap();
        assert_eq!(snapshot.len(), 1, "previously delivered mail stays in the snapshot");

        let body = lol.fetch_body(&snapshot[0]).unwrap();
        assert_eq!(body.text.as_deref(), Some("first"));
        assert_eq!(body.html, None);

        let message = lol.normalize(&addr, &snapshot[0], body).unwrap();
        assert_eq!(message.id, "1714566600000_a@example.com_one_5");
        assert_eq!(message.received_at.timestamp(), 1_714_566_600);
    }

    #[tokio::test]
    async fn invalid_token_is_session_expired() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/auth/tok");
            then.status(200).json_body(json!({ "email": null, "token": "invalid" }));
        });

        let mut lol = TempMailLol::new(transport(), &server.base_url());
        let err = lol
            .list_messages(&address(PROVIDER, "x@lol", "tok"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionExpired { .. }));
    }

    #[test]
    fn derived_id_is_stable_across_polls() {
        let lol = TempMailLol::new(transport(), "http://unused");
        let data = json!({ "from": "a@b.c", "subject": "s", "body": "hello", "date": 1 });
        let earlier = RawMessage::new(PROVIDER, data.clone(), Utc::now());
        let later = RawMessage::new(
            PROVIDER,
            data,
            Utc::now() + chrono::Duration::seconds(30),
        );
        assert_eq!(
            lol.message_id(&earlier).unwrap(),
            lol.message_id(&later).unwrap()
        );

        let addr = address(PROVIDER, "x@lol", "tok");
        let a = lol.normalize(&addr, &earlier, MessageBody::default()).unwrap();
        let b = lol.normalize(&addr, &earlier, MessageBody::default()).unwrap();
        assert_eq!(a, b);
    }
}
