//! dropmail.me adapter (GraphQL).
//!
//! Requests go to `{base}/{auth_token}` where the auth token is any random string the
//! client picks. The `introduceSession` mutation returns a session id and an address;
//! the session is then queried by id. Message bodies come back inside the listing.

use chrono::Utc;
use serde_json::{Value, json};

use super::{RawMessage, json_snippet, opt_str, str_field};
use crate::http::{Auth, Phase, Transport};
use crate::models::SessionToken;
use crate::normalize::{non_empty, parse_timestamp, random_string, value_to_string};
use crate::{Address, AddressOptions, Error, MessageBody, NormalizedMessage, Provider, Result};

const PROVIDER: Provider = Provider::DropMail;

const INTRODUCE_SESSION: &str = r#"
mutation {
  introduceSession {
    id
    expiresAt
    addresses {
      address
    }
  }
}
"#;

const SESSION_MAILS: &str = r#"
query($id: ID!) {
  session(id: $id) {
    mails {
      id
      fromAddr
      headerSubject
      text
      html
      receivedAt
    }
  }
}
"#;

/// Adapter for the dropmail.me GraphQL API.
#[derive(Debug)]
pub struct DropMail {
    transport: Transport,
    endpoint: String,
    auth_token: String,
}

impl DropMail {
    /// Create an adapter rooted at `base_url` with a fresh random auth token.
    pub fn new(transport: Transport, base_url: &str) -> Self {
        let auth_token = random_string(12);
        Self {
            transport,
            endpoint: format!("{}/{auth_token}", base_url.trim_end_matches('/')),
            auth_token,
        }
    }

    pub(crate) async fn create_address(&mut self, options: &AddressOptions) -> Result<Address> {
        if options.rush || options.domain.is_some() || options.alias.is_some() {
            tracing::debug!(provider = %PROVIDER, "ignoring address options");
        }

        let data = self
            .graphql(Phase::Setup, json!({ "query": INTRODUCE_SESSION }))
            .await?;
        let session = data
            .get("introduceSession")
            .filter(|s| s.is_object())
            .ok_or_else(|| {
                Error::rejected(
                    PROVIDER,
                    format!("no session introduced ({})", json_snippet(&data)),
                )
            })?;

        let session_id = str_field(PROVIDER, session, "id")?;
        let address = session
            .get("addresses")
            .and_then(Value::as_array)
            .and_then(|list| list.first())
            .and_then(|first| first.get("address"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::malformed(
                    PROVIDER,
                    format!("session without an address ({})", json_snippet(session)),
                )
            })?;

        Ok(Address::new(address, PROVIDER, SessionToken::new(session_id)))
    }

    pub(crate) async fn list_messages(&mut self, address: &Address) -> Result<Vec<RawMessage>> {
        let request = json!({
            "query": SESSION_MAILS,
            "variables": { "id": address.session_token().expose() }
        });
        let data = self.graphql(Phase::Session, request).await?;

        // Only an explicit `session: null` means the session is gone.
        let session = match data.get("session") {
            Some(session) if session.is_object() => session,
            Some(Value::Null) => return Err(Error::SessionExpired { provider: PROVIDER }),
            _ => {
                return Err(Error::malformed(
                    PROVIDER,
                    format!("session query without a session ({})", json_snippet(&data)),
                ));
            }
        };

        let listed_at = Utc::now();
        Ok(session
            .get("mails")
            .and_then(Value::as_array)
            .map(|mails| {
                mails
                    .iter()
                    .map(|m| RawMessage::new(PROVIDER, m.clone(), listed_at))
                    .collect()
            })
            .unwrap_or_default())
    }

    pub(crate) fn fetch_body(&self, raw: &RawMessage) -> Result<MessageBody> {
        let data = raw.expect_provider(PROVIDER)?;
        Ok(MessageBody {
            text: non_empty(opt_str(data, "text")),
            html: non_empty(opt_str(data, "html")),
        })
    }

    pub(crate) fn message_id(&self, raw: &RawMessage) -> Result<String> {
        let data = raw.expect_provider(PROVIDER)?;
        data.get("id").and_then(value_to_string).ok_or_else(|| {
            Error::malformed(
                PROVIDER,
                format!("mail without `id` ({})", json_snippet(data)),
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
            from: opt_str(data, "fromAddr").unwrap_or_default(),
            subject: opt_str(data, "headerSubject").unwrap_or_default(),
            body_text: body.text,
            body_html: body.html,
            received_at: data
                .get("receivedAt")
                .and_then(parse_timestamp)
                .unwrap_or_else(|| raw.listed_at()),
            provider: PROVIDER,
        })
    }

    /// POST a GraphQL request and return its `data` object.
    async fn graphql(&self, phase: Phase, request: Value) -> Result<Value> {
        let response = self
            .transport
            .post_json(
                PROVIDER,
                phase,
                &self.endpoint,
                &request,
                Auth::InPath(&self.auth_token),
            )
            .await?;

        let data = response.get("data").cloned().unwrap_or(Value::Null);
        let errors = response
            .get("errors")
            .and_then(Value::as_array)
            .filter(|errors| !errors.is_empty());
        if let (Some(errors), false) = (errors, data.is_object()) {
            let messages: Vec<&str> = errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .collect();
            return Err(Error::rejected(PROVIDER, messages.join("; ")));
        }

        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::{address, transport};
    use httpmock::Method::POST;
    use httpmock::MockServer;

    #[tokio::test]
    async fn introduce_session_creates_address() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path_matches(regex::Regex::new(r"^/graphql/[a-z0-9]{12}$").unwrap())
                .body_contains("introduceSession");
            then.status(200).json_body(json!({
                "data": {
                    "introduceSession": {
                        "id": "U2Vzc2lvbjox",
                        "expiresAt": "2024-05-01T13:00:00+00:00",
                        "addresses": [{ "address": "abc@10mail.org" }]
                    }
                }
            }));
        });

        let mut dm = DropMail::new(transport(), &server.url("/graphql"));
        let created = dm.create_address(&AddressOptions::default()).await.unwrap();

        assert_eq!(created.value(), "abc@10mail.org");
        assert_eq!(created.session_token().expose(), "U2Vzc2lvbjox");
        mock.assert();
    }

    #[tokio::test]
    async fn session_query_returns_embedded_bodies() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .body_contains("session(id: $id)")
                .body_contains("U2Vzc2lvbjox");
            then.status(200).json_body(json!({
                "data": {
                    "session": {
                        "mails": [{
                            "id": "mail-1",
                            "fromAddr": "sender@example.com",
                            "headerSubject": "Code",
                            "text": "1234",
                            "html": "<b>1234</b>",
                            "receivedAt": "2024-05-01T12:30:00+00:00"
                        }]
                    }
                }
            }));
        });

        let mut dm = DropMail::new(transport(), &server.url("/graphql"));
        let addr = address(PROVIDER, "abc@10mail.org", "U2Vzc2lvbjox");
        let raws = dm.list_messages(&addr).await.unwrap();
        assert_eq!(raws.len(), 1);

        let body = dm.fetch_body(&raws[0]).unwrap();
        let message = dm.normalize(&addr, &raws[0], body).unwrap();
        assert_eq!(message.id, "mail-1");
        assert_eq!(message.subject, "Code");
        assert_eq!(message.body_text.as_deref(), Some("1234"));
        assert_eq!(message.body_html.as_deref(), Some("<b>1234</b>"));
    }

    #[tokio::test]
    async fn null_session_is_session_expired() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200).json_body(json!({ "data": { "session": null } }));
        });

        let mut dm = DropMail::new(transport(), &server.url("/graphql"));
        let err = dm
            .list_messages(&address(PROVIDER, "abc@10mail.org", "gone"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionExpired { .. }));
    }

    #[tokio::test]
    async fn garbled_session_reply_is_malformed() {
        let server = MockServer::start();
        let mut replies = Vec::new();
        for body in [json!({}), json!({ "data": null }), json!({ "data": { "session": 7 } })] {
            let mut mock = server.mock(|when, then| {
                when.method(POST);
                then.status(200).json_body(body);
            });
            let mut dm = DropMail::new(transport(), &server.url("/graphql"));
            replies.push(
                dm.list_messages(&address(PROVIDER, "abc@10mail.org", "sess"))
                    .await
                    .unwrap_err(),
            );
            mock.delete();
        }

        for err in replies {
            assert!(matches!(err, Error::MalformedResponse { .. }), "{err:?}");
        }
    }

    #[test]
    fn normalize_is_deterministic() {
        let dm = DropMail::new(transport(), "http://unused/graphql");
        let addr = address(PROVIDER, "abc@10mail.org", "sess");
        let listed_at = Utc::now() - chrono::Duration::seconds(30);
        let raw = RawMessage::new(
            PROVIDER,
            json!({ "id": "mail-2", "fromAddr": "s@x.y", "headerSubject": "hi" }),
            listed_at,
        );

        let first = dm.normalize(&addr, &raw, MessageBody::default()).unwrap();
        let second = dm.normalize(&addr, &raw, MessageBody::default()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.received_at, listed_at);
        assert_eq!(first.from, "s@x.y");
        assert_eq!(first.mailbox, "abc@10mail.org");
    }

    #[test]
    fn auth_token_is_the_endpoint_path_segment() {
        let dm = DropMail::new(transport(), "https://dropmail.me/api/graphql/");
        assert_eq!(
            dm.endpoint,
            format!("https://dropmail.me/api/graphql/{}", dm.auth_token)
        );
        assert_eq!(dm.auth_token.len(), 12);
    }

    #[tokio::test]
    async fn graphql_errors_without_data_are_rejected() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200).json_body(json!({
                "data": null,
                "errors": [{ "message": "rate limited for this token" }]
            }));
        });

        let mut dm = DropMail::new(transport(), &server.url("/graphql"));
        let err = dm
            .create_address(&AddressOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProviderRejected { .. }));
        assert!(err.to_string().contains("rate limited"));
    }
}
