//! Admin review conversation for donation claims.
//!
//! A short-lived, in-memory two-step flow: pick a claim by number, then
//! verify or reject it. Sessions expire after a TTL so a stale prompt
//! cannot linger; a restart drops them entirely (by design, claims
//! themselves are durable).
//!
//! The pending list is snapshotted when the session opens. If a claim is
//! changed through another path before the admin picks it, the selection
//! operates on the stale snapshot; this is a documented limitation.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::{sync::Mutex, time::Instant};
use tracing::info;

use crate::{
    domain::ChatId,
    donations::{DonationClaim, DonationRegistry},
    invites::InviteIssuer,
    ports::MessagingPort,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReviewStep {
    Select,
    Action,
}

struct ReviewSession {
    step: ReviewStep,
    pending: Vec<DonationClaim>,
    selected: Option<DonationClaim>,
    expires_at: Instant,
}

impl ReviewSession {
    fn new(pending: Vec<DonationClaim>, ttl: Duration) -> Self {
        Self {
            step: ReviewStep::Select,
            pending,
            selected: None,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

pub struct ReviewFlow {
    donations: Arc<DonationRegistry>,
    messenger: Arc<dyn MessagingPort>,
    invites: InviteIssuer,
    premium_group: Option<ChatId>,
    ttl: Duration,
    sessions: Mutex<HashMap<i64, ReviewSession>>,
}

impl ReviewFlow {
    pub fn new(
        donations: Arc<DonationRegistry>,
        messenger: Arc<dyn MessagingPort>,
        invites: InviteIssuer,
        premium_group: Option<ChatId>,
        ttl: Duration,
    ) -> Self {
        Self {
            donations,
            messenger,
            invites,
            premium_group,
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Whether an unexpired session is open for this admin. Expired
    /// sessions are dropped on the way.
    pub async fn is_open(&self, admin: ChatId) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(&admin.0) {
            Some(s) if s.is_expired() => {
                sessions.remove(&admin.0);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Open a session over a snapshot of the currently pending claims.
    pub async fn begin(&self, admin: ChatId) -> Result<()> {
        let pending = self.donations.list_unverified().await;
        if pending.is_empty() {
            let _ = self
                .messenger
                .send_html(admin, "No pending donation claims.")
                .await;
            return Ok(());
        }

        let mut lines = vec!["💰 <b>Pending donation claims</b>".to_string(), String::new()];
        for (i, claim) in pending.iter().enumerate() {
            lines.push(format!(
                "{}. {} (@{}) — <code>{}</code>",
                i + 1,
                claim.first_name,
                claim.username,
                claim.transaction_id
            ));
        }
        lines.push(String::new());
        lines.push("Reply with a number to review, or /cancel.".to_string());
        let _ = self.messenger.send_html(admin, &lines.join("\n")).await;

        self.sessions
            .lock()
            .await
            .insert(admin.0, ReviewSession::new(pending, self.ttl));
        Ok(())
    }

    pub async fn handle_reply(&self, admin: ChatId, text: &str) -> Result<()> {
        let text = text.trim();

        if text == "/cancel" {
            self.sessions.lock().await.remove(&admin.0);
            let _ = self.messenger.send_html(admin, "Review cancelled.").await;
            return Ok(());
        }

        let step = {
            let sessions = self.sessions.lock().await;
            match sessions.get(&admin.0) {
                Some(s) => s.step,
                None => return Ok(()),
            }
        };

        match step {
            ReviewStep::Select => self.handle_select(admin, text).await,
            ReviewStep::Action => self.handle_action(admin, text).await,
        }
    }

    async fn handle_select(&self, admin: ChatId, text: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(&admin.0) else {
            return Ok(());
        };

        let index = text.parse::<i64>().ok();
        let claim = index
            .filter(|i| *i >= 1 && *i <= session.pending.len() as i64)
            .map(|i| session.pending[(i - 1) as usize].clone());

        let Some(claim) = claim else {
            let len = session.pending.len();
            drop(sessions);
            let _ = self
                .messenger
                .send_html(
                    admin,
                    &format!("Pick a number between 1 and {len}, or /cancel."),
                )
                .await;
            return Ok(());
        };

        let prompt = format!(
            "Claim by {} (@{})\nTX: <code>{}</code>\n\n\
             1 — verify (grant premium)\n2 — reject and delete\n/cancel — abort",
            claim.first_name, claim.username, claim.transaction_id
        );
        session.selected = Some(claim);
        session.step = ReviewStep::Action;
        drop(sessions);

        let _ = self.messenger.send_html(admin, &prompt).await;
        Ok(())
    }

    async fn handle_action(&self, admin: ChatId, text: &str) -> Result<()> {
        let claim = {
            let sessions = self.sessions.lock().await;
            match sessions.get(&admin.0).and_then(|s| s.selected.clone()) {
                Some(c) => c,
                None => return Ok(()),
            }
        };
        let claimant = ChatId(claim.chat_id);

        match text {
            "1" => {
                self.donations.set_verified(claimant).await?;
                self.sessions.lock().await.remove(&admin.0);
                info!("donation claim verified for {claimant}");

                let _ = self
                    .messenger
                    .send_html(admin, "✅ Claim verified; the user is premium now.")
                    .await;
                let _ = self
                    .messenger
                    .send_html(
                        claimant,
                        "🎉 Your donation was verified. Welcome to premium!",
                    )
                    .await;

                if let Some(premium) = self.premium_group {
                    if let Some(link) = self.invites.issue(premium).await {
                        let _ = self
                            .messenger
                            .send_html(
                                claimant,
                                &format!("Your premium group invite (valid 60s): {link}"),
                            )
                            .await;
                    }
                }
            }
            "2" => {
                self.donations.remove(claimant).await?;
                self.sessions.lock().await.remove(&admin.0);
                info!("donation claim rejected for {claimant}");

                let _ = self
                    .messenger
                    .send_html(admin, "🗑 Claim rejected and removed.")
                    .await;
                let _ = self
                    .messenger
                    .send_html(
                        claimant,
                        "❌ Your donation claim could not be verified and was removed.",
                    )
                    .await;
            }
            _ => {
                let _ = self
                    .messenger
                    .send_html(admin, "Reply 1 to verify, 2 to reject, or /cancel.")
                    .await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::UserProfile, store::MemoryStore, testing::RecordingMessenger,
    };

    const ADMIN: ChatId = ChatId(99);
    const CLAIMANT: ChatId = ChatId(5);
    const PREMIUM: ChatId = ChatId(-2000);

    struct Fixture {
        donations: Arc<DonationRegistry>,
        messenger: Arc<RecordingMessenger>,
        flow: ReviewFlow,
    }

    fn fixture(premium: Option<ChatId>, ttl: Duration) -> Fixture {
        let donations = Arc::new(DonationRegistry::open(Arc::new(MemoryStore::new())).unwrap());
        let messenger = Arc::new(RecordingMessenger::new());
        let flow = ReviewFlow::new(
            donations.clone(),
            messenger.clone(),
            InviteIssuer::new(messenger.clone()),
            premium,
            ttl,
        );
        Fixture {
            donations,
            messenger,
            flow,
        }
    }

    async fn open_with_claim(f: &Fixture) {
        let profile = UserProfile {
            user_id: 50,
            username: "donor".to_string(),
            first_name: "Don".to_string(),
            last_name: String::new(),
        };
        f.donations
            .add_claim(CLAIMANT, "tx-1", &profile)
            .await
            .unwrap();
        f.flow.begin(ADMIN).await.unwrap();
        assert!(f.flow.is_open(ADMIN).await);
    }

    #[tokio::test]
    async fn out_of_range_selection_reprompts_without_transition() {
        let f = fixture(Some(PREMIUM), Duration::from_secs(600));
        open_with_claim(&f).await;

        for bad in ["0", "-3", "2", "abc"] {
            f.flow.handle_reply(ADMIN, bad).await.unwrap();
        }
        // Still in the select step: a valid index advances to the action prompt.
        f.flow.handle_reply(ADMIN, "1").await.unwrap();
        let last = f.messenger.messages_to(ADMIN).pop().unwrap();
        assert!(last.contains("1 — verify"));
        assert!(!f.donations.is_verified(CLAIMANT).await);
    }

    #[tokio::test]
    async fn verify_grants_premium_and_issues_one_invite() {
        let f = fixture(Some(PREMIUM), Duration::from_secs(600));
        open_with_claim(&f).await;

        f.flow.handle_reply(ADMIN, "1").await.unwrap();
        f.flow.handle_reply(ADMIN, "1").await.unwrap();

        assert!(f.donations.is_verified(CLAIMANT).await);
        assert!(!f.flow.is_open(ADMIN).await);
        assert_eq!(f.messenger.invites_to(PREMIUM), 1);
        // Claimant hears about the verification and gets the link.
        let to_claimant = f.messenger.messages_to(CLAIMANT);
        assert_eq!(to_claimant.len(), 2);
        assert!(to_claimant[1].contains("https://t.me/+fake"));
    }

    #[tokio::test]
    async fn verify_without_premium_group_issues_no_invite() {
        let f = fixture(None, Duration::from_secs(600));
        open_with_claim(&f).await;

        f.flow.handle_reply(ADMIN, "1").await.unwrap();
        f.flow.handle_reply(ADMIN, "1").await.unwrap();

        assert!(f.donations.is_verified(CLAIMANT).await);
        assert_eq!(f.messenger.invites_to(PREMIUM), 0);
        assert_eq!(f.messenger.messages_to(CLAIMANT).len(), 1);
    }

    #[tokio::test]
    async fn reject_deletes_the_claim() {
        let f = fixture(Some(PREMIUM), Duration::from_secs(600));
        open_with_claim(&f).await;

        f.flow.handle_reply(ADMIN, "1").await.unwrap();
        f.flow.handle_reply(ADMIN, "2").await.unwrap();

        assert!(f.donations.get(CLAIMANT).await.is_none());
        assert!(!f.flow.is_open(ADMIN).await);
    }

    #[tokio::test]
    async fn cancel_discards_the_session_without_mutation() {
        let f = fixture(Some(PREMIUM), Duration::from_secs(600));
        open_with_claim(&f).await;

        f.flow.handle_reply(ADMIN, "1").await.unwrap();
        f.flow.handle_reply(ADMIN, "/cancel").await.unwrap();

        assert!(!f.flow.is_open(ADMIN).await);
        let claim = f.donations.get(CLAIMANT).await.unwrap();
        assert!(!claim.verified);
    }

    #[tokio::test]
    async fn expired_session_is_dropped_on_access() {
        let f = fixture(Some(PREMIUM), Duration::ZERO);
        let profile = UserProfile::default();
        f.donations
            .add_claim(CLAIMANT, "tx-1", &profile)
            .await
            .unwrap();
        f.flow.begin(ADMIN).await.unwrap();
        // TTL zero: the session is already expired by the next lookup.
        assert!(!f.flow.is_open(ADMIN).await);
    }

    #[tokio::test]
    async fn begin_with_no_pending_claims_opens_nothing() {
        let f = fixture(Some(PREMIUM), Duration::from_secs(600));
        f.flow.begin(ADMIN).await.unwrap();
        assert!(!f.flow.is_open(ADMIN).await);
        assert_eq!(f.messenger.messages_to(ADMIN).len(), 1);
    }
}
