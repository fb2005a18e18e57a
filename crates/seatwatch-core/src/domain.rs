use serde::{Deserialize, Serialize};

/// Chat id on the messaging platform (negative for supergroups).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(pub i64);

/// Numeric user id on the messaging platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Profile snapshot of a platform user, captured from inbound messages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

impl UserProfile {
    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        name.trim().to_string()
    }
}

/// One scraped seat-availability record, as handed over by the crawler.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SeatRecord {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub format: String,
    #[serde(default)]
    pub university: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub seats: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub deadline: String,
}
