pub mod line;

use async_trait::async_trait;

use crate::error::ChannelError;

/// Profile of a chat member as returned by the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub display_name: String,
}

/// Outbound operations the relay needs from the messaging platform.
#[async_trait]
pub trait MessagingApi: Send + Sync {
    /// Platform name for log lines.
    fn name(&self) -> &str;

    /// Reply to an event using its single-use reply token.
    async fn reply_message(&self, reply_token: &str, text: &str) -> Result<(), ChannelError>;

    /// Look up a group member's profile.
    async fn get_group_member_profile(
        &self,
        group_id: &str,
        user_id: &str,
    ) -> Result<Profile, ChannelError>;
}
