//! Subscriber registry.
//!
//! Preference logic:
//!   - `exams = []`      -> user has not chosen yet, receives NOTHING
//!   - `exams = ["ALL"]` -> user wants every topic
//!   - `exams = [codes]` -> user wants only those topics

use std::{collections::HashMap, sync::Arc};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    domain::{ChatId, UserProfile},
    store::RecordStore,
    Result,
};

/// Sentinel preference value meaning "every topic".
pub const ALL_TOPICS: &str = "ALL";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subscriber {
    pub chat_id: i64,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub joined_at: String,
    pub active: bool,
    #[serde(default)]
    pub exams: Vec<String>,
    #[serde(default)]
    pub github_verified: bool,
    #[serde(default)]
    pub github_username: Option<String>,
    /// Preferred polling interval in minutes. Informational only; the
    /// scheduler that consumes it lives outside this engine.
    #[serde(default)]
    pub interval_minutes: Option<u32>,
}

impl Subscriber {
    pub fn wants_topic(&self, topic: &str) -> bool {
        if !self.active || self.exams.is_empty() {
            return false;
        }
        self.exams.iter().any(|e| e == ALL_TOPICS || e == topic)
    }

    pub fn is_verified(&self) -> bool {
        self.active && self.github_verified
    }
}

/// Durable store of per-recipient subscription and verification state.
///
/// All mutations run under one exclusive lock and end with a full rewrite
/// of the backing store.
pub struct SubscriberRegistry {
    store: Arc<dyn RecordStore<Subscriber>>,
    state: Mutex<HashMap<i64, Subscriber>>,
}

impl SubscriberRegistry {
    pub fn open(store: Arc<dyn RecordStore<Subscriber>>) -> Result<Self> {
        let mut state = HashMap::new();
        for rec in store.load()? {
            state.insert(rec.chat_id, rec);
        }
        Ok(Self {
            store,
            state: Mutex::new(state),
        })
    }

    /// Add or reactivate a subscriber. Returns true when this contact
    /// created a new record or revived an inactive one.
    ///
    /// Exam choices and verification state survive re-subscription.
    pub async fn subscribe(&self, chat_id: ChatId, profile: &UserProfile) -> Result<bool> {
        let mut state = self.state.lock().await;
        let is_new = state.get(&chat_id.0).map(|s| !s.active).unwrap_or(true);

        let existing = state.get(&chat_id.0);
        let rec = Subscriber {
            chat_id: chat_id.0,
            user_id: profile.user_id,
            username: profile.username.clone(),
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            joined_at: existing
                .map(|s| s.joined_at.clone())
                .unwrap_or_else(|| Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
            active: true,
            exams: existing.map(|s| s.exams.clone()).unwrap_or_default(),
            github_verified: existing.map(|s| s.github_verified).unwrap_or(false),
            github_username: existing.and_then(|s| s.github_username.clone()),
            interval_minutes: existing.and_then(|s| s.interval_minutes),
        };
        state.insert(chat_id.0, rec);
        self.persist(&state)?;
        Ok(is_new)
    }

    pub async fn unsubscribe(&self, chat_id: ChatId) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(rec) = state.get_mut(&chat_id.0) {
            rec.active = false;
            self.persist(&state)?;
        }
        Ok(())
    }

    pub async fn set_preferences(&self, chat_id: ChatId, exams: Vec<String>) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(rec) = state.get_mut(&chat_id.0) {
            rec.exams = exams;
            self.persist(&state)?;
        }
        Ok(())
    }

    /// Record a verified external-identity claim.
    ///
    /// Returns false without mutating anything when another active
    /// subscriber already holds the same identity (case-insensitive);
    /// the check and the write share the critical section.
    pub async fn set_verified_identity(&self, chat_id: ChatId, identity: &str) -> Result<bool> {
        let identity_lc = identity.to_lowercase();
        let mut state = self.state.lock().await;

        let taken = state.values().any(|s| {
            s.chat_id != chat_id.0
                && s.active
                && s.github_username
                    .as_deref()
                    .map(|u| u.to_lowercase() == identity_lc)
                    .unwrap_or(false)
        });
        if taken {
            return Ok(false);
        }

        if let Some(rec) = state.get_mut(&chat_id.0) {
            rec.github_verified = true;
            rec.github_username = Some(identity.to_string());
            self.persist(&state)?;
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn set_interval(&self, chat_id: ChatId, minutes: u32) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(rec) = state.get_mut(&chat_id.0) {
            rec.interval_minutes = Some(minutes);
            self.persist(&state)?;
        }
        Ok(())
    }

    pub async fn get(&self, chat_id: ChatId) -> Option<Subscriber> {
        self.state.lock().await.get(&chat_id.0).cloned()
    }

    /// Lookup by the platform's numeric user id (group join events carry
    /// no chat id for the user's private chat).
    pub async fn find_by_user_id(&self, user_id: i64) -> Option<Subscriber> {
        self.state
            .lock()
            .await
            .values()
            .find(|s| s.user_id == user_id)
            .cloned()
    }

    pub async fn list_active(&self) -> Vec<Subscriber> {
        let mut out: Vec<_> = self
            .state
            .lock()
            .await
            .values()
            .filter(|s| s.active)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.chat_id);
        out
    }

    pub async fn list_all(&self) -> Vec<Subscriber> {
        let mut out: Vec<_> = self.state.lock().await.values().cloned().collect();
        out.sort_by_key(|s| s.chat_id);
        out
    }

    fn persist(&self, state: &HashMap<i64, Subscriber>) -> Result<()> {
        let mut records: Vec<_> = state.values().cloned().collect();
        records.sort_by_key(|s| s.chat_id);
        self.store.save_all(&records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn profile(user_id: i64, username: &str) -> UserProfile {
        UserProfile {
            user_id,
            username: username.to_string(),
            first_name: "Test".to_string(),
            last_name: String::new(),
        }
    }

    fn registry() -> SubscriberRegistry {
        SubscriberRegistry::open(Arc::new(MemoryStore::new())).unwrap()
    }

    #[tokio::test]
    async fn subscribe_then_unsubscribe_keeps_preferences() {
        let reg = registry();
        assert!(reg.subscribe(ChatId(1), &profile(10, "a")).await.unwrap());
        reg.set_preferences(ChatId(1), vec!["TOLC-I".to_string()])
            .await
            .unwrap();

        reg.unsubscribe(ChatId(1)).await.unwrap();
        assert!(!reg.get(ChatId(1)).await.unwrap().active);

        // Re-contact reactivates and keeps the old choices.
        assert!(reg.subscribe(ChatId(1), &profile(10, "a")).await.unwrap());
        let rec = reg.get(ChatId(1)).await.unwrap();
        assert!(rec.active);
        assert_eq!(rec.exams, vec!["TOLC-I".to_string()]);
    }

    #[tokio::test]
    async fn empty_preferences_mean_no_topics() {
        let reg = registry();
        reg.subscribe(ChatId(1), &profile(10, "a")).await.unwrap();
        let rec = reg.get(ChatId(1)).await.unwrap();

        for topic in ["TOLC-I", "TOLC-E", "CEnT-S", "ALL"] {
            assert!(!rec.wants_topic(topic));
        }
    }

    #[tokio::test]
    async fn all_sentinel_matches_every_topic() {
        let reg = registry();
        reg.subscribe(ChatId(1), &profile(10, "a")).await.unwrap();
        reg.set_preferences(ChatId(1), vec![ALL_TOPICS.to_string()])
            .await
            .unwrap();
        let rec = reg.get(ChatId(1)).await.unwrap();
        assert!(rec.wants_topic("TOLC-I"));
        assert!(rec.wants_topic("CEnT-S"));
    }

    #[tokio::test]
    async fn identity_claim_is_unique_across_active_subscribers() {
        let reg = registry();
        reg.subscribe(ChatId(1), &profile(10, "a")).await.unwrap();
        reg.subscribe(ChatId(2), &profile(20, "b")).await.unwrap();

        assert!(reg
            .set_verified_identity(ChatId(1), "OctoCat")
            .await
            .unwrap());
        // Same identity, different case, different subscriber: rejected.
        assert!(!reg
            .set_verified_identity(ChatId(2), "octocat")
            .await
            .unwrap());

        // Neither record was mutated by the failed attempt.
        let one = reg.get(ChatId(1)).await.unwrap();
        let two = reg.get(ChatId(2)).await.unwrap();
        assert_eq!(one.github_username.as_deref(), Some("OctoCat"));
        assert!(!two.github_verified);
        assert!(two.github_username.is_none());
    }

    #[tokio::test]
    async fn inactive_holder_releases_identity() {
        let reg = registry();
        reg.subscribe(ChatId(1), &profile(10, "a")).await.unwrap();
        reg.subscribe(ChatId(2), &profile(20, "b")).await.unwrap();
        reg.set_verified_identity(ChatId(1), "octocat")
            .await
            .unwrap();

        reg.unsubscribe(ChatId(1)).await.unwrap();
        assert!(reg
            .set_verified_identity(ChatId(2), "octocat")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn reloads_persisted_records() {
        let store = Arc::new(MemoryStore::new());
        {
            let reg = SubscriberRegistry::open(store.clone()).unwrap();
            reg.subscribe(ChatId(7), &profile(70, "g")).await.unwrap();
        }
        let reg = SubscriberRegistry::open(store).unwrap();
        assert!(reg.get(ChatId(7)).await.is_some());
        assert_eq!(reg.list_active().await.len(), 1);
    }
}
