//! Provider adapters.
//!
//! Each upstream service gets one adapter type. The closed [`Adapter`] enum dispatches
//! to them and implements [`MailProvider`], the contract the poll loop is written against.
//!
//! | provider      | auth                                  | body            |
//! |---------------|---------------------------------------|-----------------|
//! | GuerrillaMail | `sid_token` query parameter + cookie  | second request  |
//! | mail.tm/gw    | bearer token from `POST /token`       | second request  |
//! | tempmail.lol  | token in the inbox path               | embedded        |
//! | dropmail.me   | session id from a GraphQL mutation    | embedded        |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::http::Transport;
use crate::{Address, AddressOptions, Error, MessageBody, NormalizedMessage, Provider, Result};

mod dropmail;
mod guerrilla;
mod hydra;
mod tempmail_lol;

pub use dropmail::DropMail;
pub use guerrilla::GuerrillaMail;
pub use hydra::Hydra;
pub use tempmail_lol::TempMailLol;

/// Uniform capability set over one temporary-mail service.
///
/// Implementations map every upstream failure onto the crate's [`Error`] taxonomy.
#[async_trait]
pub trait MailProvider: Send + Sync {
    /// Provider-specific message shape handed back to the same adapter.
    type Raw: Send + Sync;

    /// The provider this adapter talks to.
    fn provider(&self) -> Provider;

    /// Request a new disposable address and establish its session.
    async fn create_address(&mut self, options: &AddressOptions) -> Result<Address>;

    /// Fetch the full current mailbox snapshot for `address`.
    async fn list_messages(&mut self, address: &Address) -> Result<Vec<Self::Raw>>;

    /// Return the message body, fetching it only when the listing did not embed it.
    async fn fetch_body(&self, address: &Address, raw: &Self::Raw) -> Result<MessageBody>;

    /// Mailbox-unique id of a raw message. Never touches the network.
    fn message_id(&self, raw: &Self::Raw) -> Result<String>;

    /// Pure mapping of a raw message plus its body to a [`NormalizedMessage`].
    fn normalize(
        &self,
        address: &Address,
        raw: &Self::Raw,
        body: MessageBody,
    ) -> Result<NormalizedMessage>;
}

/// Upstream JSON for one listed message, plus the instant it was first listed.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    provider: Provider,
    data: Value,
    listed_at: DateTime<Utc>,
}

impl RawMessage {
    pub(crate) fn new(provider: Provider, data: Value, listed_at: DateTime<Utc>) -> Self {
        Self {
            provider,
            data,
            listed_at,
        }
    }

    /// Provider whose listing produced this message.
    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub(crate) fn data(&self) -> &Value {
        &self.data
    }

    pub(crate) fn listed_at(&self) -> DateTime<Utc> {
        self.listed_at
    }

    pub(crate) fn expect_provider(&self, provider: Provider) -> Result<&Value> {
        if self.provider == provider {
            Ok(&self.data)
        } else {
            Err(Error::malformed(
                provider,
                format!("message listed by {} handed to {provider}", self.provider),
            ))
        }
    }
}

/// Base URLs of every provider. Override them to point adapters at a test server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// GuerrillaMail AJAX endpoint.
    pub guerrillamail: String,
    /// mail.tm API root.
    pub mail_tm: String,
    /// mail.gw API root.
    pub mail_gw: String,
    /// tempmail.lol API root.
    pub tempmail_lol: String,
    /// dropmail.me GraphQL root (the auth token is appended as a path segment).
    pub dropmail: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            guerrillamail: "https://api.guerrillamail.com/ajax.php".to_string(),
            mail_tm: "https://api.mail.tm".to_string(),
            mail_gw: "https://api.mail.gw".to_string(),
            tempmail_lol: "https://api.tempmail.lol".to_string(),
            dropmail: "https://dropmail.me/api/graphql".to_string(),
        }
    }
}

/// The closed set of provider adapters.
#[derive(Debug)]
pub enum Adapter {
    /// guerrillamail.com
    GuerrillaMail(GuerrillaMail),
    /// mail.tm or mail.gw
    Hydra(Hydra),
    /// tempmail.lol
    TempMailLol(TempMailLol),
    /// dropmail.me
    DropMail(DropMail),
}

impl Adapter {
    /// Build the adapter for `provider` on top of a shared transport.
    pub fn new(provider: Provider, transport: Transport, endpoints: &Endpoints) -> Self {
        match provider {
            Provider::GuerrillaMail => {
                Adapter::GuerrillaMail(GuerrillaMail::new(transport, &endpoints.guerrillamail))
            }
            Provider::MailTm => {
                Adapter::Hydra(Hydra::new(Provider::MailTm, transport, &endpoints.mail_tm))
            }
            Provider::MailGw => {
                Adapter::Hydra(Hydra::new(Provider::MailGw, transport, &endpoints.mail_gw))
            }
            Provider::TempMailLol => {
                Adapter::TempMailLol(TempMailLol::new(transport, &endpoints.tempmail_lol))
            }
            Provider::DropMail => Adapter::DropMail(DropMail::new(transport, &endpoints.dropmail)),
        }
    }
}

#[async_trait]
impl MailProvider for Adapter {
    type Raw = RawMessage;

    fn provider(&self) -> Provider {
        match self {
            Adapter::GuerrillaMail(_) => Provider::GuerrillaMail,
            Adapter::Hydra(a) => a.provider(),
            Adapter::TempMailLol(_) => Provider::TempMailLol,
            Adapter::DropMail(_) => Provider::DropMail,
        }
    }

    async fn create_address(&mut self, options: &AddressOptions) -> Result<Address> {
        let address = match self {
            Adapter::GuerrillaMail(a) => a.create_address(options).await,
            Adapter::Hydra(a) => a.create_address(options).await,
            Adapter::TempMailLol(a) => a.create_address(options).await,
            Adapter::DropMail(a) => a.create_address(options).await,
        }?;
        tracing::info!(provider = %address.provider(), address = %address, "address created");
        Ok(address)
    }

    async fn list_messages(&mut self, address: &Address) -> Result<Vec<RawMessage>> {
        match self {
            Adapter::GuerrillaMail(a) => a.list_messages(address).await,
            Adapter::Hydra(a) => a.list_messages(address).await,
            Adapter::TempMailLol(a) => a.list_messages(address).await,
            Adapter::DropMail(a) => a.list_messages(address).await,
        }
    }

    async fn fetch_body(&self, address: &Address, raw: &RawMessage) -> Result<MessageBody> {
        match self {
            Adapter::GuerrillaMail(a) => a.fetch_body(address, raw).await,
            Adapter::Hydra(a) => a.fetch_body(address, raw).await,
            Adapter::TempMailLol(a) => a.fetch_body(raw),
            Adapter::DropMail(a) => a.fetch_body(raw),
        }
    }

    fn message_id(&self, raw: &RawMessage) -> Result<String> {
        match self {
            Adapter::GuerrillaMail(a) => a.message_id(raw),
            Adapter::Hydra(a) => a.message_id(raw),
            Adapter::TempMailLol(a) => a.message_id(raw),
            Adapter::DropMail(a) => a.message_id(raw),
        }
    }

    fn normalize(
        &self,
        address: &Address,
        raw: &RawMessage,
        body: MessageBody,
    ) -> Result<NormalizedMessage> {
        match self {
            Adapter::GuerrillaMail(a) => a.normalize(address, raw, body),
            Adapter::Hydra(a) => a.normalize(address, raw, body),
            Adapter::TempMailLol(a) => a.normalize(address, raw, body),
            Adapter::DropMail(a) => a.normalize(address, raw, body),
        }
    }
}

/// Pull a list of objects out of a response, accepting either a bare array or `{key: [...]}`.
pub(crate) fn list_field<'a>(
    provider: Provider,
    response: &'a Value,
    key: &str,
) -> Result<&'a Vec<Value>> {
    if let Some(list) = response.as_array() {
        return Ok(list);
    }
    response
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            Error::malformed(
                provider,
                format!("missing or non-array `{key}` (response: {})", json_snippet(response)),
            )
        })
}

/// Required string field of a response object.
pub(crate) fn str_field<'a>(provider: Provider, value: &'a Value, key: &str) -> Result<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            Error::malformed(
                provider,
                format!("missing or non-string `{key}` (response: {})", json_snippet(value)),
            )
        })
}

pub(crate) fn opt_str(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn json_snippet(value: &Value) -> String {
    value.to_string().chars().take(200).collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::models::SessionToken;

    pub(crate) fn transport() -> Transport {
        Transport::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("test transport build failed")
    }

    pub(crate) fn address(provider: Provider, value: &str, token: &str) -> Address {
        Address::new(value, provider, SessionToken::new(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn adapter_table_covers_every_provider() {
        let endpoints = Endpoints::default();
        for provider in Provider::ALL {
            let adapter = Adapter::new(provider, test_support::transport(), &endpoints);
            assert_eq!(adapter.provider(), provider);
        }
    }

    #[test]
    fn raw_message_rejects_foreign_adapter() {
        let raw = RawMessage::new(
            Provider::MailTm,
            json!({ "id": "1" }),
            Utc.timestamp_opt(0, 0).unwrap(),
        );
        let adapter = Adapter::new(
            Provider::DropMail,
            test_support::transport(),
            &Endpoints::default(),
        );
        let err = adapter.message_id(&raw).unwrap_err();
        assert!(matches!(err, Error::MalformedResponse { .. }));
    }

    #[test]
    fn list_field_accepts_bare_arrays() {
        let bare = json!([{ "id": 1 }]);
        assert_eq!(list_field(Provider::MailTm, &bare, "hydra:member").unwrap().len(), 1);

        let wrapped = json!({ "hydra:member": [{ "id": 1 }, { "id": 2 }] });
        assert_eq!(
            list_field(Provider::MailTm, &wrapped, "hydra:member").unwrap().len(),
            2
        );

        let missing = json!({ "detail": "nope" });
        assert!(list_field(Provider::MailTm, &missing, "hydra:member").is_err());
    }
}
