//! Inbound update routing: one decision per event, first match wins.
//!
//! Precedence: membership events, then non-text/non-private filtering,
//! then an open admin review session, then commands usable before
//! verification, then admin-only commands, then the verification gate,
//! then the verified-user command table with free-text topic selection
//! as the fallback.

use std::sync::Arc;

use tracing::{error, info};

use crate::{
    config::Config,
    domain::ChatId,
    donations::DonationRegistry,
    enforcer::MembershipEnforcer,
    invites::InviteIssuer,
    ports::MessagingPort,
    review::ReviewFlow,
    subscribers::{Subscriber, SubscriberRegistry},
    update::{ChatKind, InboundMessage, IncomingUpdate},
    verify::StarVerifier,
    Result,
};

pub struct UpdateDispatcher {
    cfg: Arc<Config>,
    subscribers: Arc<SubscriberRegistry>,
    donations: Arc<DonationRegistry>,
    verifier: Arc<StarVerifier>,
    messenger: Arc<dyn MessagingPort>,
    invites: InviteIssuer,
    review: ReviewFlow,
    enforcer: MembershipEnforcer,
}

impl UpdateDispatcher {
    pub fn new(
        cfg: Arc<Config>,
        subscribers: Arc<SubscriberRegistry>,
        donations: Arc<DonationRegistry>,
        verifier: Arc<StarVerifier>,
        messenger: Arc<dyn MessagingPort>,
    ) -> Self {
        let invites = InviteIssuer::new(messenger.clone());
        let review = ReviewFlow::new(
            donations.clone(),
            messenger.clone(),
            invites.clone(),
            cfg.premium_group,
            cfg.review_session_ttl,
        );
        let enforcer = MembershipEnforcer::new(
            subscribers.clone(),
            donations.clone(),
            messenger.clone(),
            cfg.premium_group,
            cfg.repo_url(),
            cfg.eviction_grace,
        );
        Self {
            cfg,
            subscribers,
            donations,
            verifier,
            messenger,
            invites,
            review,
            enforcer,
        }
    }

    pub async fn dispatch(&self, update: IncomingUpdate) {
        match update {
            IncomingUpdate::MemberJoined(event) => self.enforcer.handle_join(&event).await,
            IncomingUpdate::Message(msg) => {
                if let Err(e) = self.handle_message(&msg).await {
                    error!("update handling failed: {e}");
                }
            }
            IncomingUpdate::Other => {}
        }
    }

    async fn handle_message(&self, msg: &InboundMessage) -> Result<()> {
        let Some(text) = msg.text.as_deref() else {
            return Ok(());
        };
        if msg.chat_kind != ChatKind::Private {
            return Ok(());
        }

        let text = text.trim();
        let chat = msg.chat_id;
        let is_admin = chat == self.cfg.admin_chat;

        if is_admin && self.review.is_open(chat).await {
            return self.review.handle_reply(chat, text).await;
        }

        // Commands usable before star verification.
        if text == "/start" {
            return self.cmd_start(msg).await;
        }
        if text == "/donate" {
            self.send_donation_info(chat).await;
            return Ok(());
        }
        if let Some(rest) = text.strip_prefix("/donate ") {
            let reference = rest.trim();
            if reference.is_empty() {
                self.send_donation_info(chat).await;
            } else {
                self.cmd_donate_submit(msg, reference).await?;
            }
            return Ok(());
        }
        if text == "/github" || text == "/star" {
            self.reply(chat, "Usage: <code>/github your_github_username</code>")
                .await;
            return Ok(());
        }
        if let Some(identity) = text
            .strip_prefix("/github ")
            .or_else(|| text.strip_prefix("/star "))
        {
            return self.cmd_verify_identity(msg, identity).await;
        }

        // Admin-only commands; intentionally absent from /help.
        if is_admin {
            if text == "/interval" {
                self.cmd_interval_info(chat).await;
                return Ok(());
            }
            if let Some(rest) = text.strip_prefix("/interval ") {
                return self.cmd_interval_set(chat, rest).await;
            }
            if text == "/donations" {
                return self.review.begin(chat).await;
            }
        }

        // Verification gate: everything below requires an active,
        // star-verified subscriber.
        let sub = self.subscribers.get(chat).await;
        let Some(sub) = sub.filter(|s| s.is_verified()) else {
            self.reply(
                chat,
                &format!(
                    "🔒 You need to verify a GitHub star first.\n\n\
                     1️⃣ Star the repo: {}\n\
                     2️⃣ Send: <code>/github your_github_username</code>",
                    self.cfg.repo_url()
                ),
            )
            .await;
            return Ok(());
        };

        match text {
            "/stop" => self.cmd_stop(chat).await,
            "/exam" | "/exams" => {
                self.send_topic_menu(chat).await;
                Ok(())
            }
            "/status" => {
                self.cmd_status(chat, &sub).await;
                Ok(())
            }
            "/help" => {
                self.send_help(chat).await;
                Ok(())
            }
            other => self.try_topic_selection(chat, &sub, other).await,
        }
    }

    async fn cmd_start(&self, msg: &InboundMessage) -> Result<()> {
        let is_new = self.subscribers.subscribe(msg.chat_id, &msg.sender).await?;
        self.reply(
            msg.chat_id,
            &format!(
                "👋 <b>Welcome!</b>\n\n\
                 This bot alerts exam groups when new seats show up.\n\n\
                 1️⃣ Star the repo: {}\n\
                 2️⃣ Verify with <code>/github your_github_username</code>\n\
                 3️⃣ Pick an exam with /exams to join its group\n\n\
                 💝 Support the project: /donate",
                self.cfg.repo_url()
            ),
        )
        .await;
        if is_new {
            let name = msg.sender.full_name();
            info!(
                "new subscriber: {} (@{}) id {}",
                if name.is_empty() { "Unknown" } else { &name },
                msg.sender.username,
                msg.sender.user_id
            );
        }
        Ok(())
    }

    async fn cmd_stop(&self, chat: ChatId) -> Result<()> {
        self.subscribers.unsubscribe(chat).await?;
        self.reply(chat, "🛑 Notifications stopped. Send /start to come back.")
            .await;
        Ok(())
    }

    async fn send_donation_info(&self, chat: ChatId) {
        self.reply(
            chat,
            &format!(
                "💝 <b>Support the project</b>\n\n\
                 USDT (TRC20): <code>{}</code>\n\n\
                 After donating, send <code>/donate &lt;tx_id&gt;</code> so an admin can verify it.",
                self.cfg.donation_address
            ),
        )
        .await;
    }

    async fn cmd_donate_submit(&self, msg: &InboundMessage, reference: &str) -> Result<()> {
        let chat = msg.chat_id;
        self.donations.add_claim(chat, reference, &msg.sender).await?;
        self.reply(
            chat,
            &format!(
                "🙏 Thanks! Claim recorded: <code>{reference}</code>\n\
                 An admin will verify it shortly."
            ),
        )
        .await;

        let summary = format!(
            "💰 <b>New donation claim</b>\n\n\
             User: {} (@{})\nChat ID: {}\nTX: <code>{reference}</code>",
            msg.sender.full_name(),
            msg.sender.username,
            chat
        );
        self.reply(self.cfg.admin_chat, &summary).await;
        info!("donation claim from {chat} (tx {reference})");
        Ok(())
    }

    async fn cmd_verify_identity(&self, msg: &InboundMessage, identity: &str) -> Result<()> {
        let chat = msg.chat_id;
        let identity = normalize_identity(identity);
        if identity.is_empty() {
            self.reply(chat, "Usage: <code>/github your_github_username</code>")
                .await;
            return Ok(());
        }

        self.reply(chat, &format!("🔎 Checking star for <b>{identity}</b>..."))
            .await;

        if !self.verifier.has_endorsed(&identity).await {
            self.reply(
                chat,
                &format!(
                    "❌ <b>{identity}</b> has not starred {} yet. Star it and try again.",
                    self.cfg.repo_url()
                ),
            )
            .await;
            return Ok(());
        }

        // Make sure there is a record to attach the claim to.
        self.subscribers.subscribe(chat, &msg.sender).await?;
        if self.subscribers.set_verified_identity(chat, &identity).await? {
            self.reply(
                chat,
                &format!("✅ GitHub star verified for <b>{identity}</b>. Use /exams to pick your groups."),
            )
            .await;
            info!("github verified: {chat} -> {identity}");
        } else {
            self.reply(
                chat,
                &format!("❌ <b>{identity}</b> is already claimed by another subscriber."),
            )
            .await;
        }
        Ok(())
    }

    async fn cmd_interval_info(&self, chat: ChatId) {
        let current = self
            .subscribers
            .get(chat)
            .await
            .and_then(|s| s.interval_minutes);
        let text = match current {
            Some(m) => format!("Current crawl interval preference: {m} minutes.\nChange with <code>/interval &lt;minutes&gt;</code> (1-60)."),
            None => "No interval preference set.\nUse <code>/interval &lt;minutes&gt;</code> (1-60).".to_string(),
        };
        self.reply(chat, &text).await;
    }

    async fn cmd_interval_set(&self, chat: ChatId, rest: &str) -> Result<()> {
        match rest.trim().parse::<u32>() {
            Ok(minutes) if (1..=60).contains(&minutes) => {
                self.subscribers.set_interval(chat, minutes).await?;
                self.reply(chat, &format!("⏱ Interval preference set to {minutes} minutes."))
                    .await;
            }
            _ => {
                self.reply(chat, "Usage: /interval &lt;minutes&gt; (1-60)").await;
            }
        }
        Ok(())
    }

    async fn send_topic_menu(&self, chat: ChatId) {
        let mut lines = vec!["📋 <b>Pick an exam</b> (reply with its number or name):".to_string(), String::new()];
        for (i, topic) in self.cfg.topics.iter().enumerate() {
            lines.push(format!("{}. {topic}", i + 1));
        }
        self.reply(chat, &lines.join("\n")).await;
    }

    async fn cmd_status(&self, chat: ChatId, sub: &Subscriber) {
        let premium = self.donations.is_verified(chat).await;
        let text = format!(
            "<b>Your status</b>\n\n\
             Active: {}\n\
             GitHub: @{} {}\n\
             Premium: {}",
            if sub.active { "Yes" } else { "No" },
            sub.github_username.as_deref().unwrap_or("N/A"),
            if sub.github_verified { "✅" } else { "❌" },
            if premium { "✅" } else { "❌" },
        );
        self.reply(chat, &text).await;
    }

    async fn send_help(&self, chat: ChatId) {
        self.reply(
            chat,
            "<b>Commands</b>\n\n\
             /start — subscribe\n\
             /stop — stop notifications\n\
             /exams — pick an exam group to join\n\
             /status — your verification status\n\
             /github &lt;username&gt; — verify your GitHub star\n\
             /donate — support the project\n\
             /help — this message",
        )
        .await;
    }

    /// Interpret free text as a topic choice (ordinal or exact name) and
    /// hand out a fresh invite to the topic's group. Unrecognized text is
    /// ignored.
    async fn try_topic_selection(&self, chat: ChatId, sub: &Subscriber, text: &str) -> Result<()> {
        let topics = &self.cfg.topics;
        let by_number = text
            .parse::<usize>()
            .ok()
            .filter(|i| (1..=topics.len()).contains(i))
            .map(|i| topics[i - 1].clone());
        let Some(topic) =
            by_number.or_else(|| topics.iter().find(|t| t.eq_ignore_ascii_case(text)).cloned())
        else {
            return Ok(());
        };

        // Remember the choice so preference queries reflect it.
        if !sub.exams.iter().any(|e| e == &topic) {
            let mut exams = sub.exams.clone();
            exams.push(topic.clone());
            self.subscribers.set_preferences(chat, exams).await?;
        }

        let Some(group) = self.cfg.group_for(&topic) else {
            self.reply(
                chat,
                &format!("⚠️ The group for <b>{topic}</b> is not configured yet."),
            )
            .await;
            return Ok(());
        };

        self.reply(chat, &format!("🎟 Generating your invite for <b>{topic}</b>..."))
            .await;
        match self.invites.issue(group).await {
            Some(link) => {
                self.reply(
                    chat,
                    &format!("Here is your invite for <b>{topic}</b> (valid 60s, single use):\n{link}"),
                )
                .await;
                info!("invite sent to {chat} for {topic}");
            }
            None => {
                self.reply(
                    chat,
                    &format!(
                        "❌ Could not create an invite for <b>{topic}</b>. \
                         Make sure the bot is an admin in the group."
                    ),
                )
                .await;
            }
        }
        Ok(())
    }

    async fn reply(&self, chat: ChatId, html: &str) {
        if let Err(e) = self.messenger.send_html(chat, html).await {
            error!("reply to {chat} failed: {e}");
        }
    }
}

/// Accepts `@name`, `name/`, and profile URLs like `github.com/name`.
fn normalize_identity(raw: &str) -> String {
    let mut s = raw.trim().trim_start_matches('@').trim_end_matches('/');
    if let Some(idx) = s.rfind("github.com/") {
        s = &s[idx + "github.com/".len()..];
    }
    s.rsplit('/').next().unwrap_or("").trim().to_string()
}
