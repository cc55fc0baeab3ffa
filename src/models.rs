//! Provider-independent data model shared by the adapters, the store and the poll loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A supported temporary email provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    /// guerrillamail.com
    #[serde(rename = "guerrillamail")]
    GuerrillaMail,
    /// mail.tm
    #[serde(rename = "mail.tm")]
    MailTm,
    /// mail.gw (same API as mail.tm, hosted elsewhere)
    #[serde(rename = "mail.gw")]
    MailGw,
    /// tempmail.lol
    #[serde(rename = "tempmail.lol")]
    TempMailLol,
    /// dropmail.me (GraphQL)
    #[serde(rename = "dropmail.me")]
    DropMail,
}

impl Provider {
    /// Every provider, in menu order.
    pub const ALL: [Provider; 5] = [
        Provider::GuerrillaMail,
        Provider::MailTm,
        Provider::TempMailLol,
        Provider::MailGw,
        Provider::DropMail,
    ];

    /// The name users type on the command line.
    pub fn name(self) -> &'static str {
        match self {
            Provider::GuerrillaMail => "guerrillamail",
            Provider::MailTm => "mail.tm",
            Provider::MailGw => "mail.gw",
            Provider::TempMailLol => "tempmail.lol",
            Provider::DropMail => "dropmail.me",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Provider::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| {
                let names: Vec<&str> = Provider::ALL.iter().map(|p| p.name()).collect();
                Error::Config(format!(
                    "unknown provider `{s}` (expected one of: {})",
                    names.join(", ")
                ))
            })
    }
}

/// Opaque provider session credential (bearer token, sid token, session id).
///
/// Debug output is redacted so addresses can be logged freely.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub(crate) fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub(crate) fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// A disposable address issued by a provider.
///
/// Immutable once created; a new one replaces it when the provider expires the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    value: String,
    provider: Provider,
    session_token: SessionToken,
    created_at: DateTime<Utc>,
}

impl Address {
    pub(crate) fn new(
        value: impl Into<String>,
        provider: Provider,
        session_token: SessionToken,
    ) -> Self {
        Self {
            value: value.into(),
            provider,
            session_token,
            created_at: Utc::now(),
        }
    }

    /// The full email address.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Provider that issued the address.
    pub fn provider(&self) -> Provider {
        self.provider
    }

    /// When the address was obtained.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub(crate) fn session_token(&self) -> &SessionToken {
        &self.session_token
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Variant-local options for [`create_address`](crate::MailProvider::create_address).
///
/// Options a provider does not understand are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressOptions {
    /// Use tempmail.lol's faster generation endpoint.
    pub rush: bool,
    /// Preferred domain (mail.tm, mail.gw).
    pub domain: Option<String>,
    /// Preferred local part (GuerrillaMail).
    pub alias: Option<String>,
}

/// Message content, either embedded in the listing or fetched separately.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageBody {
    /// Plain-text body.
    pub text: Option<String>,
    /// HTML body.
    pub html: Option<String>,
}

/// A message in provider-independent form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    /// Provider-native id, stable across polls of the same mailbox.
    pub id: String,
    /// Address the message was delivered to.
    pub mailbox: String,
    /// Sender.
    pub from: String,
    /// Subject line.
    pub subject: String,
    /// Plain-text body, if any.
    pub body_text: Option<String>,
    /// HTML body, if any.
    pub body_html: Option<String>,
    /// When the provider received the message.
    pub received_at: DateTime<Utc>,
    /// Provider that delivered it.
    pub provider: Provider,
}

impl NormalizedMessage {
    /// Provider-qualified id used for deduplication and in the history file.
    pub fn key(&self) -> String {
        message_key(self.provider, &self.mailbox, &self.id)
    }
}

pub(crate) fn message_key(provider: Provider, mailbox: &str, id: &str) -> String {
    format!("{provider}:{mailbox}:{id}")
}
