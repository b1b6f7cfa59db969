//! Routes typed webhook events to their handlers.
//!
//! Every event is handled in isolation: a failing or panicking handler is
//! logged and the remaining events in the batch still run.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, error, info, warn};

use crate::channel::MessagingApi;
use crate::error::ChannelError;
use crate::reply::ReplyGenerator;
use crate::types::{EventSource, InboundEvent};

/// Sent when a generated reply could not be delivered.
pub const DELIVERY_FAILED_TEXT: &str =
    "你所使用的OPENAI API key額度可能已經超過，請於後台Log內確認錯誤訊息";

/// Greeting for a member joining a group.
pub fn welcome_text(display_name: &str) -> String {
    format!("{display_name}歡迎加入")
}

/// Outcome of handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The primary reply was delivered.
    Replied,
    /// The primary reply failed and the fallback text was delivered.
    FallbackReplied,
    /// Handled without sending anything.
    NoReply,
    /// The handler failed; details are in the log.
    Failed,
}

pub struct EventDispatcher {
    messenger: Arc<dyn MessagingApi>,
    generator: ReplyGenerator,
}

impl EventDispatcher {
    pub fn new(messenger: Arc<dyn MessagingApi>, generator: ReplyGenerator) -> Self {
        Self {
            messenger,
            generator,
        }
    }

    /// Handle every event in order, returning one outcome per event.
    pub async fn dispatch(&self, events: Vec<InboundEvent>) -> Vec<EventOutcome> {
        let mut outcomes = Vec::with_capacity(events.len());
        for event in events {
            let kind = event.kind();
            let outcome = match AssertUnwindSafe(self.handle_event(event)).catch_unwind().await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    error!("{} {} handler failed: {}", self.messenger.name(), kind, e);
                    EventOutcome::Failed
                }
                Err(_) => {
                    error!("{} {} handler panicked", self.messenger.name(), kind);
                    EventOutcome::Failed
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn handle_event(&self, event: InboundEvent) -> Result<EventOutcome, ChannelError> {
        match event {
            InboundEvent::TextMessage {
                reply_token,
                source,
                text,
            } => self.handle_text(reply_token.as_deref(), &source, &text).await,
            InboundEvent::Postback { source, data, .. } => {
                info!("Postback from {}: {}", source.chat_id(), data);
                Ok(EventOutcome::NoReply)
            }
            InboundEvent::MemberJoined {
                reply_token,
                source,
                members,
            } => self.handle_member_joined(reply_token.as_deref(), &source, &members).await,
        }
    }

    async fn handle_text(
        &self,
        reply_token: Option<&str>,
        source: &EventSource,
        text: &str,
    ) -> Result<EventOutcome, ChannelError> {
        info!("Message from {}: {}", source.chat_id(), text);

        let Some(reply_token) = reply_token else {
            warn!("Message from {} has no reply token, skipping", source.chat_id());
            return Ok(EventOutcome::NoReply);
        };

        let answer = self.generator.generate(text).await;
        match self.messenger.reply_message(reply_token, &answer).await {
            Ok(()) => Ok(EventOutcome::Replied),
            Err(e) => {
                error!("Failed to deliver reply to {}: {:?}", source.chat_id(), e);
                self.messenger
                    .reply_message(reply_token, DELIVERY_FAILED_TEXT)
                    .await?;
                Ok(EventOutcome::FallbackReplied)
            }
        }
    }

    async fn handle_member_joined(
        &self,
        reply_token: Option<&str>,
        source: &EventSource,
        members: &[Option<String>],
    ) -> Result<EventOutcome, ChannelError> {
        let first = members.first().and_then(|m| m.as_deref());
        let (Some(group_id), Some(user_id)) = (source.group_id.as_deref(), first) else {
            debug!("Member joined without group or first member id, skipping");
            return Ok(EventOutcome::NoReply);
        };
        let Some(reply_token) = reply_token else {
            warn!("Member joined {} without reply token, skipping", group_id);
            return Ok(EventOutcome::NoReply);
        };

        let profile = self
            .messenger
            .get_group_member_profile(group_id, user_id)
            .await?;
        info!("{} joined {}", profile.display_name, group_id);

        self.messenger
            .reply_message(reply_token, &welcome_text(&profile.display_name))
            .await?;
        Ok(EventOutcome::Replied)
    }
}
