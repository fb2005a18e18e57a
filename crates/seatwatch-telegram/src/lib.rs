//! Telegram adapter.
//!
//! Implements the `seatwatch-core` MessagingPort over the Bot API wire
//! protocol (JSON-over-HTTPS method calls through the resilient client).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde_json::json;
use tokio::time::sleep;

use seatwatch_core::{
    domain::{ChatId, UserId},
    ports::MessagingPort,
    Error, Result,
};

pub mod api;
pub mod poll;

use api::ApiClient;

/// Pause between the ban and the unban of a soft eviction.
const UNBAN_PAUSE: Duration = Duration::from_millis(500);

pub struct TelegramMessenger {
    api: ApiClient,
}

impl TelegramMessenger {
    pub fn new(token: &str) -> Self {
        Self {
            api: ApiClient::new(token),
        }
    }

    pub fn from_api(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<()> {
        self.api
            .call_ok(
                "sendMessage",
                json!({
                    "chat_id": chat_id.0,
                    "text": html,
                    "parse_mode": "HTML",
                    "disable_web_page_preview": true,
                }),
            )
            .await?;
        Ok(())
    }

    async fn mint_invite_link(
        &self,
        chat_id: ChatId,
        expire_seconds: u64,
        member_limit: u32,
    ) -> Result<String> {
        let expire_date = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
            + expire_seconds;

        let result = self
            .api
            .call_ok(
                "createChatInviteLink",
                json!({
                    "chat_id": chat_id.0,
                    "expire_date": expire_date,
                    "member_limit": member_limit,
                }),
            )
            .await?;

        result
            .get("invite_link")
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| Error::External("createChatInviteLink returned no link".to_string()))
    }

    async fn evict_but_allow_rejoin(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        self.api
            .call_ok(
                "banChatMember",
                json!({"chat_id": chat_id.0, "user_id": user_id.0}),
            )
            .await?;
        sleep(UNBAN_PAUSE).await;
        // Lift the ban right away so the user can rejoin later with a
        // fresh invite; `only_if_banned` keeps this a no-op otherwise.
        self.api
            .call_ok(
                "unbanChatMember",
                json!({"chat_id": chat_id.0, "user_id": user_id.0, "only_if_banned": true}),
            )
            .await?;
        Ok(())
    }
}
