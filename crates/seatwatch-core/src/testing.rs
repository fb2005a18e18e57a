//! Shared fakes for unit tests.

use std::{collections::HashMap, path::PathBuf, sync::Mutex, time::Duration};

use async_trait::async_trait;

use crate::{
    config::Config,
    domain::{ChatId, UserId},
    ports::MessagingPort,
    Error, Result,
};

#[derive(Clone, Debug, PartialEq)]
pub enum OutboundCall {
    Message { chat_id: ChatId, html: String },
    Invite { chat_id: ChatId },
    Evict { chat_id: ChatId, user_id: UserId },
}

/// MessagingPort fake that records every outbound call.
#[derive(Default)]
pub struct RecordingMessenger {
    pub calls: Mutex<Vec<OutboundCall>>,
    /// Chats whose sends should fail (unreachable destination).
    pub failing_chats: Mutex<Vec<ChatId>>,
    pub fail_invites: bool,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages_to(&self, chat_id: ChatId) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                OutboundCall::Message { chat_id: c, html } if *c == chat_id => Some(html.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn invites_to(&self, chat_id: ChatId) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, OutboundCall::Invite { chat_id: c } if *c == chat_id))
            .count()
    }

    pub fn evictions(&self) -> Vec<(ChatId, UserId)> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                OutboundCall::Evict { chat_id, user_id } => Some((*chat_id, *user_id)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl MessagingPort for RecordingMessenger {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<()> {
        if self.failing_chats.lock().unwrap().contains(&chat_id) {
            return Err(Error::External("send failed".into()));
        }
        self.calls.lock().unwrap().push(OutboundCall::Message {
            chat_id,
            html: html.to_string(),
        });
        Ok(())
    }

    async fn mint_invite_link(
        &self,
        chat_id: ChatId,
        _expire_seconds: u64,
        _member_limit: u32,
    ) -> Result<String> {
        if self.fail_invites {
            return Err(Error::External("invite failed".into()));
        }
        let mut calls = self.calls.lock().unwrap();
        calls.push(OutboundCall::Invite { chat_id });
        Ok(format!("https://t.me/+fake{}", calls.len()))
    }

    async fn evict_but_allow_rejoin(&self, chat_id: ChatId, user_id: UserId) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push(OutboundCall::Evict { chat_id, user_id });
        Ok(())
    }
}

/// Config fixture: admin chat 99, TOLC-I -> -1001, TOLC-E -> -1002,
/// premium group -2000, zero pacing delays.
pub fn test_config() -> Config {
    let mut topic_groups = HashMap::new();
    topic_groups.insert("TOLC-I".to_string(), ChatId(-1001));
    topic_groups.insert("TOLC-E".to_string(), ChatId(-1002));

    Config {
        bot_token: "test-token".to_string(),
        admin_chat: ChatId(99),
        multi_user: true,
        topics: vec!["TOLC-I".to_string(), "TOLC-E".to_string()],
        topic_groups,
        premium_group: Some(ChatId(-2000)),
        github_owner: "example".to_string(),
        github_repo: "seatwatch".to_string(),
        github_token: None,
        donation_address: "TTestAddress".to_string(),
        booking_url: "https://example.test/book".to_string(),
        subscribers_file: PathBuf::from("/tmp/seatwatch-test-subscribers.json"),
        donations_file: PathBuf::from("/tmp/seatwatch-test-donators.json"),
        send_delay: Duration::ZERO,
        eviction_grace: Duration::ZERO,
        review_session_ttl: Duration::from_secs(600),
        digest_window_hours: 24,
    }
}
