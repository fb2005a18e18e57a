//! Short-lived, single-use group invitations.

use std::sync::Arc;

use tracing::warn;

use crate::{domain::ChatId, ports::MessagingPort};

pub const INVITE_EXPIRE_SECS: u64 = 60;
pub const INVITE_MEMBER_LIMIT: u32 = 1;

/// Mints a fresh invite link per request. Links are never reused, so
/// concurrent requests for the same destination cannot collide.
#[derive(Clone)]
pub struct InviteIssuer {
    messenger: Arc<dyn MessagingPort>,
}

impl InviteIssuer {
    pub fn new(messenger: Arc<dyn MessagingPort>) -> Self {
        Self { messenger }
    }

    pub async fn issue(&self, destination: ChatId) -> Option<String> {
        match self
            .messenger
            .mint_invite_link(destination, INVITE_EXPIRE_SECS, INVITE_MEMBER_LIMIT)
            .await
        {
            Ok(link) => Some(link),
            Err(e) => {
                warn!("invite link for {destination} failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingMessenger;

    #[tokio::test]
    async fn each_call_mints_a_fresh_link() {
        let messenger = Arc::new(RecordingMessenger::new());
        let issuer = InviteIssuer::new(messenger.clone());

        let a = issuer.issue(ChatId(-1001)).await.unwrap();
        let b = issuer.issue(ChatId(-1001)).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(messenger.invites_to(ChatId(-1001)), 2);
    }

    #[tokio::test]
    async fn failure_yields_none() {
        let messenger = Arc::new(RecordingMessenger {
            fail_invites: true,
            ..Default::default()
        });
        let issuer = InviteIssuer::new(messenger);
        assert!(issuer.issue(ChatId(-1001)).await.is_none());
    }
}
