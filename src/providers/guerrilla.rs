//! GuerrillaMail adapter.
//!
//! Typical flow:
//! 1) `get_email_address` issues a random address and a `sid_token`
//! 2) optionally `set_email_user` swaps the local part for a chosen alias
//! 3) `check_email` lists message summaries for the session
//! 4) `fetch_email` returns the full HTML body of one message

use chrono::Utc;
use serde_json::Value;
use std::borrow::Cow;

use super::{RawMessage, json_snippet, list_field, opt_str, str_field};
use crate::http::{Auth, Param, Phase, Transport};
use crate::models::SessionToken;
use crate::normalize::{html_to_text, non_empty, parse_timestamp, value_to_string};
use crate::{Address, AddressOptions, Error, MessageBody, NormalizedMessage, Provider, Result};

const PROVIDER: Provider = Provider::GuerrillaMail;

/// Adapter for the GuerrillaMail AJAX API.
///
/// The session is identified by the `sid_token` stored in the [`Address`]; the transport's
/// cookie jar carries the matching `PHPSESSID`.
#[derive(Debug)]
pub struct GuerrillaMail {
    transport: Transport,
    ajax_url: String,
}

impl GuerrillaMail {
    /// Create an adapter that talks to `ajax_url`.
    pub fn new(transport: Transport, ajax_url: impl Into<String>) -> Self {
        Self {
            transport,
            ajax_url: ajax_url.into(),
        }
    }

    pub(crate) async fn create_address(&mut self, options: &AddressOptions) -> Result<Address> {
        if options.rush || options.domain.is_some() {
            tracing::debug!(provider = %PROVIDER, "ignoring rush/domain options");
        }

        let mut params = Self::api_params("get_email_address", None);
        params.push(("lang", Cow::Borrowed("en")));
        params.push(("ip", Cow::Borrowed("127.0.0.1")));
        params.push(("agent", Cow::Owned(self.transport.user_agent().to_string())));

        let response = self
            .transport
            .get_json(PROVIDER, Phase::Setup, &self.ajax_url, &params, Auth::None)
            .await?;
        Self::check_auth(&response, Phase::Setup)?;

        let sid_token = str_field(PROVIDER, &response, "sid_token")?.to_string();
        let mut email_addr = str_field(PROVIDER, &response, "email_addr")?.to_string();

        if let Some(alias) = options.alias.as_deref() {
            email_addr = self.set_email_user(&sid_token, alias).await?;
        }

        Ok(Address::new(email_addr, PROVIDER, SessionToken::new(sid_token)))
    }

    /// Ask GuerrillaMail to assign `alias` as the local part of the session's address.
    async fn set_email_user(&self, sid_token: &str, alias: &str) -> Result<String> {
        if alias.trim().is_empty() || alias.contains('@') {
            return Err(Error::rejected(
                PROVIDER,
                format!("invalid alias `{alias}` (expected a bare local part)"),
            ));
        }

        let params = Self::api_params("set_email_user", Some(sid_token));
        let form = vec![
            ("email_user", Cow::Owned(alias.to_string())),
            ("lang", Cow::Borrowed("en")),
            ("site", Cow::Borrowed("guerrillamail.com")),
        ];

        let response = self
            .transport
            .post_form(PROVIDER, Phase::Setup, &self.ajax_url, &params, &form)
            .await?;
        Self::check_auth(&response, Phase::Setup)?;

        Ok(str_field(PROVIDER, &response, "email_addr")?.to_string())
    }

    pub(crate) async fn list_messages(&mut self, address: &Address) -> Result<Vec<RawMessage>> {
        let mut params = Self::api_params("check_email", Some(address.session_token().expose()));
        params.insert(1, ("seq", Cow::Borrowed("0")));

        let response = self
            .transport
            .get_json(PROVIDER, Phase::Session, &self.ajax_url, &params, Auth::None)
            .await?;
        Self::check_auth(&response, Phase::Session)?;

        let listed_at = Utc::now();
        Ok(list_field(PROVIDER, &response, "list")?
            .iter()
            .map(|item| RawMessage::new(PROVIDER, item.clone(), listed_at))
            .collect())
    }

    pub(crate) async fn fetch_body(
        &self,
        address: &Address,
        raw: &RawMessage,
    ) -> Result<MessageBody> {
        let mail_id = self.message_id(raw)?;
        let mut params = Self::api_params("fetch_email", Some(address.session_token().expose()));
        params.insert(1, ("email_id", Cow::Owned(mail_id.clone())));

        let response = self
            .transport
            .get_json(PROVIDER, Phase::Message, &self.ajax_url, &params, Auth::None)
            .await?;
        Self::check_auth(&response, Phase::Message)?;

        // A message deleted upstream between listing and fetching comes back as `false`.
        if !response.is_object() {
            return Err(Error::malformed(
                PROVIDER,
                format!("message {mail_id} not found (response: {})", json_snippet(&response)),
            ));
        }

        let html = non_empty(opt_str(&response, "mail_body"));
        Ok(MessageBody {
            text: html.as_deref().map(html_to_text),
            html,
        })
    }

    pub(crate) fn message_id(&self, raw: &RawMessage) -> Result<String> {
        let data = raw.expect_provider(PROVIDER)?;
        data.get("mail_id")
            .and_then(value_to_string)
            .ok_or_else(|| {
                Error::malformed(
                    PROVIDER,
                    format!("message without `mail_id` ({})", json_snippet(data)),
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
            from: opt_str(data, "mail_from").unwrap_or_default(),
            subject: opt_str(data, "mail_subject").unwrap_or_default(),
            body_text: body.text,
            body_html: body.html,
            received_at: data
                .get("mail_timestamp")
                .and_then(parse_timestamp)
                .unwrap_or_else(|| raw.listed_at()),
            provider: PROVIDER,
        })
    }

    /// Map GuerrillaMail's `{"auth": {"success": false}}` envelope onto an error.
    fn check_auth(response: &Value, phase: Phase) -> Result<()> {
        let failed = response
            .get("auth")
            .and_then(|auth| auth.get("success"))
            .and_then(Value::as_bool)
            == Some(false);

        match (failed, phase) {
            (false, _) => Ok(()),
            (true, Phase::Session | Phase::Message) => {
                Err(Error::SessionExpired { provider: PROVIDER })
            }
            (true, Phase::Setup) => Err(Error::rejected(
                PROVIDER,
                format!("authorization refused (response: {})", json_snippet(response)),
            )),
        }
    }

    fn api_params<'a>(function: &'a str, sid_token: Option<&'a str>) -> Vec<Param<'a>> {
        let mut params = vec![("f", Cow::Borrowed(function))];
        if let Some(sid) = sid_token {
            params.push(("sid_token", Cow::Borrowed(sid)));
        }
        // Cache-busting, as the web client does.
        params.push(("_", Cow::Owned(Utc::now().timestamp_millis().to_string())));
        params
    }
}
