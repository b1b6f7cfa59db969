use async_trait::async_trait;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, error, warn};

use crate::channel::{MessagingApi, Profile};
use crate::error::ChannelError;
use crate::types::{EventSource, InboundEvent};
use crate::util::truncate_string;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "x-line-signature";

type HmacSha256 = Hmac<Sha256>;

/// Verify webhook signature: base64(HMAC-SHA256(channel_secret, body)).
pub fn verify_signature(channel_secret: &str, body: &[u8], signature: &str) -> bool {
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(channel_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Compute the signature LINE would send for `body`.
#[cfg(test)]
pub(crate) fn sign(channel_secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(channel_secret.as_bytes()).unwrap();
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Parse LINE webhook events from the request body.
///
/// Only the envelope must be valid JSON. Events are decoded one by one and
/// an event that does not fit [`LineEvent`] is logged and dropped.
pub fn parse_webhook_events(body: &str) -> Result<Vec<LineEvent>, serde_json::Error> {
    let webhook: LineWebhook = serde_json::from_str(body)?;
    let events = webhook
        .events
        .into_iter()
        .enumerate()
        .filter_map(|(i, raw)| match serde_json::from_value::<LineEvent>(raw) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Skipping undecodable LINE event #{}: {}", i, e);
                None
            }
        })
        .collect();
    Ok(events)
}

/// LINE Messaging API client.
pub struct LineClient {
    client: Client,
    access_token: String,
    api_base: String,
}

impl LineClient {
    pub fn new(client: Client, access_token: String, api_base: &str) -> Self {
        Self {
            client,
            access_token,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    async fn check(api: &'static str, resp: reqwest::Response) -> Result<reqwest::Response, ChannelError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        error!("LINE {} API error: {} {}", api, status, text);
        Err(ChannelError::Api {
            api,
            status: status.as_u16(),
            message: truncate_string(&text, 512, "..."),
        })
    }
}

#[async_trait]
impl MessagingApi for LineClient {
    fn name(&self) -> &str {
        "line"
    }

    /// Reply to a LINE message using the reply token.
    /// Must be called within 1 minute of receiving the webhook.
    async fn reply_message(&self, reply_token: &str, text: &str) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "replyToken": reply_token,
            "messages": [{
                "type": "text",
                "text": text
            }]
        });

        let resp = self
            .client
            .post(format!("{}/v2/bot/message/reply", self.api_base))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        Self::check("reply", resp).await?;

        debug!("LINE reply sent successfully");
        Ok(())
    }

    async fn get_group_member_profile(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> Result<Profile, ChannelError> {
        let url = format!(
            "{}/v2/bot/group/{}/member/{}",
            self.api_base,
            urlencoding::encode(group_id),
            urlencoding::encode(user_id)
        );

        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let profile: LineProfile = Self::check("profile", resp)
            .await?
            .json()
            .await
            .map_err(|e| ChannelError::Parse(e.to_string()))?;

        debug!("LINE profile fetched for {} in {}", user_id, group_id);
        Ok(Profile {
            display_name: profile.display_name,
        })
    }
}

// ====== LINE Webhook Types ======

#[derive(Debug, Deserialize)]
pub struct LineWebhook {
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub reply_token: Option<String>,
    pub source: Option<LineSource>,
    pub message: Option<LineMessage>,
    pub postback: Option<LinePostback>,
    pub joined: Option<LineJoined>,
    pub timestamp: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineSource {
    #[serde(rename = "type", default)]
    pub source_type: String,
    pub user_id: Option<String>,
    pub group_id: Option<String>,
    pub room_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineMessage {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub msg_type: String,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LinePostback {
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct LineJoined {
    #[serde(default)]
    pub members: Vec<LineSource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineProfile {
    display_name: String,
}

impl LineEvent {
    /// Convert into a typed event, or `None` for kinds the relay ignores.
    pub fn into_inbound(self) -> Option<InboundEvent> {
        let source = self
            .source
            .map(|s| EventSource {
                user_id: s.user_id,
                group_id: s.group_id,
                room_id: s.room_id,
            })
            .unwrap_or_default();
        let reply_token = self.reply_token;

        match self.event_type.as_str() {
            "message" => {
                let message = self.message?;
                if message.msg_type != "text" {
                    debug!("Ignoring non-text LINE message: {}", message.msg_type);
                    return None;
                }
                Some(InboundEvent::TextMessage {
                    reply_token,
                    source,
                    text: message.text.unwrap_or_default(),
                })
            }
            "postback" => Some(InboundEvent::Postback {
                reply_token,
                source,
                data: self.postback.map(|p| p.data).unwrap_or_default(),
            }),
            "memberJoined" => Some(InboundEvent::MemberJoined {
                reply_token,
                source,
                members: self
                    .joined
                    .map(|j| j.members.into_iter().map(|m| m.user_id).collect())
                    .unwrap_or_default(),
            }),
            other => {
                debug!("Ignoring LINE event type: {}", other);
                None
            }
        }
    }
}
