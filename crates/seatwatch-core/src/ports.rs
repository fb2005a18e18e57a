use async_trait::async_trait;

use crate::{
    domain::{ChatId, UserId},
    Result,
};

/// Hexagonal port for the chat platform.
///
/// The Telegram adapter is the first implementation; every outbound call
/// goes through the adapter's resilient API client, so an `Err` here means
/// retries were already exhausted. Callers log and move on rather than
/// propagate (a single unreachable destination must not abort a fan-out).
#[async_trait]
pub trait MessagingPort: Send + Sync {
    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<()>;

    /// Mint a fresh, single-use invite link for a group.
    ///
    /// Every call produces a new link, so concurrent callers never collide.
    async fn mint_invite_link(
        &self,
        chat_id: ChatId,
        expire_seconds: u64,
        member_limit: u32,
    ) -> Result<String>;

    /// Remove a user from a group while keeping them eligible to rejoin
    /// later via a fresh invite (ban, then unban-if-banned).
    async fn evict_but_allow_rejoin(&self, chat_id: ChatId, user_id: UserId) -> Result<()>;
}

/// Hexagonal port for the endorsement listing (GitHub stargazers today).
#[async_trait]
pub trait EndorsementPort: Send + Sync {
    /// Fetch one page of endorser handles (1-based page index).
    ///
    /// A page shorter than `per_page` marks the end of the listing.
    async fn endorsers_page(&self, page: u32, per_page: u32) -> Result<Vec<String>>;
}
