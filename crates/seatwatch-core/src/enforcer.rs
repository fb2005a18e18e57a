//! Group-admission enforcement for newly joined members.
//!
//! Topic groups require a star-verified subscriber; the premium group
//! additionally requires a verified donation. Denied users get an
//! explanatory message, a short grace pause, then a soft eviction that
//! leaves them free to rejoin later with a fresh invite.

use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::warn;

use crate::{
    domain::ChatId,
    donations::DonationRegistry,
    ports::MessagingPort,
    subscribers::SubscriberRegistry,
    update::{JoinedMember, MemberJoin},
};

pub struct MembershipEnforcer {
    subscribers: Arc<SubscriberRegistry>,
    donations: Arc<DonationRegistry>,
    messenger: Arc<dyn MessagingPort>,
    premium_group: Option<ChatId>,
    repo_url: String,
    grace: Duration,
}

impl MembershipEnforcer {
    pub fn new(
        subscribers: Arc<SubscriberRegistry>,
        donations: Arc<DonationRegistry>,
        messenger: Arc<dyn MessagingPort>,
        premium_group: Option<ChatId>,
        repo_url: String,
        grace: Duration,
    ) -> Self {
        Self {
            subscribers,
            donations,
            messenger,
            premium_group,
            repo_url,
            grace,
        }
    }

    pub async fn handle_join(&self, event: &MemberJoin) {
        for member in event.members.iter().filter(|m| !m.is_bot) {
            if self.is_admitted(event.chat_id, member).await {
                continue;
            }

            let _ = self
                .messenger
                .send_html(event.chat_id, &self.denial_message(event.chat_id, member))
                .await;
            sleep(self.grace).await;
            if let Err(e) = self
                .messenger
                .evict_but_allow_rejoin(event.chat_id, member.user_id)
                .await
            {
                warn!(
                    "failed to evict {} ({}) from {}: {e}",
                    member.first_name, member.user_id, event.chat_id
                );
                continue;
            }
            warn!(
                "evicted unauthorized user {} ({}) from group {}",
                member.first_name, member.user_id, event.chat_id
            );
        }
    }

    async fn is_admitted(&self, group: ChatId, member: &JoinedMember) -> bool {
        let Some(sub) = self.subscribers.find_by_user_id(member.user_id.0).await else {
            return false;
        };

        if self.premium_group == Some(group) {
            return self.donations.is_verified(ChatId(sub.chat_id)).await;
        }
        sub.is_verified()
    }

    fn denial_message(&self, group: ChatId, member: &JoinedMember) -> String {
        if self.premium_group == Some(group) {
            format!(
                "❌ <b>{}</b>, this group is reserved for verified donators.\n\n\
                 Submit your transaction reference in DM with <code>/donate &lt;tx_id&gt;</code> \
                 and wait for admin approval.",
                member.first_name
            )
        } else {
            format!(
                "❌ <b>{}</b>, you must verify your GitHub star before joining this group.\n\n\
                 1️⃣ Star the repo: {}\n\
                 2️⃣ Open the bot in DM and send: <code>/github your_github_username</code>\n\
                 3️⃣ Then use /exams to get a new invite link.",
                member.first_name, self.repo_url
            )
        }
    }
}
