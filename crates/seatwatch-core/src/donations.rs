//! Donation-claim registry.
//!
//! One claim per recipient; a new submission overwrites the previous
//! unverified one. Claims never expire on their own: an admin either
//! verifies them (premium status) or deletes them.

use std::{collections::HashMap, sync::Arc};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    domain::{ChatId, UserProfile},
    store::RecordStore,
    Result,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DonationClaim {
    pub chat_id: i64,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub transaction_id: String,
    pub donated_at: String,
    pub verified: bool,
}

pub struct DonationRegistry {
    store: Arc<dyn RecordStore<DonationClaim>>,
    state: Mutex<HashMap<i64, DonationClaim>>,
}

impl DonationRegistry {
    pub fn open(store: Arc<dyn RecordStore<DonationClaim>>) -> Result<Self> {
        let mut state = HashMap::new();
        for rec in store.load()? {
            state.insert(rec.chat_id, rec);
        }
        Ok(Self {
            store,
            state: Mutex::new(state),
        })
    }

    pub async fn add_claim(
        &self,
        chat_id: ChatId,
        transaction_id: &str,
        profile: &UserProfile,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        state.insert(
            chat_id.0,
            DonationClaim {
                chat_id: chat_id.0,
                user_id: profile.user_id,
                username: profile.username.clone(),
                first_name: profile.first_name.clone(),
                last_name: profile.last_name.clone(),
                transaction_id: transaction_id.to_string(),
                donated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
                verified: false,
            },
        );
        self.persist(&state)
    }

    pub async fn get(&self, chat_id: ChatId) -> Option<DonationClaim> {
        self.state.lock().await.get(&chat_id.0).cloned()
    }

    /// Mark a claim verified. Returns false when no claim exists.
    pub async fn set_verified(&self, chat_id: ChatId) -> Result<bool> {
        let mut state = self.state.lock().await;
        if let Some(rec) = state.get_mut(&chat_id.0) {
            rec.verified = true;
            self.persist(&state)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Delete a claim entirely (admin rejection). Returns false when no
    /// claim exists.
    pub async fn remove(&self, chat_id: ChatId) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.remove(&chat_id.0).is_some() {
            self.persist(&state)?;
            return Ok(true);
        }
        Ok(false)
    }

    pub async fn is_verified(&self, chat_id: ChatId) -> bool {
        self.state
            .lock()
            .await
            .get(&chat_id.0)
            .map(|r| r.verified)
            .unwrap_or(false)
    }

    pub async fn list_unverified(&self) -> Vec<DonationClaim> {
        self.filtered(|r| !r.verified).await
    }

    pub async fn list_verified(&self) -> Vec<DonationClaim> {
        self.filtered(|r| r.verified).await
    }

    async fn filtered(&self, keep: impl Fn(&DonationClaim) -> bool) -> Vec<DonationClaim> {
        let mut out: Vec<_> = self
            .state
            .lock()
            .await
            .values()
            .filter(|r| keep(r))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.chat_id);
        out
    }

    fn persist(&self, state: &HashMap<i64, DonationClaim>) -> Result<()> {
        let mut records: Vec<_> = state.values().cloned().collect();
        records.sort_by_key(|r| r.chat_id);
        self.store.save_all(&records)
    }
}
