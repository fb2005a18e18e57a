use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::ChatId, errors::Error, Result};

/// The exam codes the crawler knows about, used when `SEATWATCH_TOPICS`
/// is not set.
pub const DEFAULT_TOPICS: &[&str] = &[
    "CEnT-S", "TOLC-AV", "TOLC-B", "TOLC-E", "TOLC-F", "TOLC-I", "TOLC-LP", "TOLC-PSI", "TOLC-S",
    "TOLC-SPS", "TOLC-SU",
];

/// Typed configuration for the engine.
///
/// Loaded once at startup and passed into constructors as an immutable
/// object; no component reads globals.
#[derive(Clone, Debug)]
pub struct Config {
    // Platform
    pub bot_token: String,
    pub admin_chat: ChatId,
    /// When false, `start_polling` is a no-op and the bot only pushes
    /// availability alerts to the admin-configured groups.
    pub multi_user: bool,

    // Topic routing
    pub topics: Vec<String>,
    pub topic_groups: HashMap<String, ChatId>,
    pub premium_group: Option<ChatId>,

    // Endorsement check (GitHub stars)
    pub github_owner: String,
    pub github_repo: String,
    pub github_token: Option<String>,

    // User-facing constants
    pub donation_address: String,
    pub booking_url: String,

    // Persistence
    pub subscribers_file: PathBuf,
    pub donations_file: PathBuf,

    // Pacing / lifetimes
    pub send_delay: Duration,
    pub eviction_grace: Duration,
    pub review_session_ttl: Duration,
    pub digest_window_hours: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let bot_token = env_str("SEATWATCH_BOT_TOKEN").unwrap_or_default();
        if bot_token.trim().is_empty() {
            return Err(Error::Config(
                "SEATWATCH_BOT_TOKEN environment variable is required".to_string(),
            ));
        }

        let admin_chat = env_i64("SEATWATCH_ADMIN_CHAT").map(ChatId).ok_or_else(|| {
            Error::Config("SEATWATCH_ADMIN_CHAT environment variable is required".to_string())
        })?;

        let multi_user = env_bool("SEATWATCH_MULTI_USER").unwrap_or(false);

        let topics = parse_csv(env_str("SEATWATCH_TOPICS")).unwrap_or_else(|| {
            DEFAULT_TOPICS.iter().map(|s| s.to_string()).collect()
        });
        let topic_groups = parse_topic_groups(env_str("SEATWATCH_TOPIC_GROUPS"))?;
        let premium_group = env_i64("SEATWATCH_PREMIUM_GROUP").map(ChatId);

        let github_owner = env_str("SEATWATCH_GITHUB_OWNER").unwrap_or_default();
        let github_repo = env_str("SEATWATCH_GITHUB_REPO").unwrap_or_default();
        if github_owner.trim().is_empty() || github_repo.trim().is_empty() {
            return Err(Error::Config(
                "SEATWATCH_GITHUB_OWNER and SEATWATCH_GITHUB_REPO are required".to_string(),
            ));
        }
        let github_token = env_str("SEATWATCH_GITHUB_TOKEN").and_then(non_empty);

        let donation_address = env_str("SEATWATCH_DONATION_ADDRESS").unwrap_or_default();
        let booking_url = env_str("SEATWATCH_BOOKING_URL")
            .unwrap_or_else(|| "https://testcisia.it/studenti_tolc/login_sso.php".to_string());

        let data_dir = env_path("SEATWATCH_DATA_DIR").unwrap_or_else(|| PathBuf::from("."));
        let subscribers_file = data_dir.join("subscribers.json");
        let donations_file = data_dir.join("donators.json");

        let send_delay = Duration::from_millis(env_u64("SEATWATCH_SEND_DELAY_MS").unwrap_or(500));
        let eviction_grace =
            Duration::from_millis(env_u64("SEATWATCH_EVICTION_GRACE_MS").unwrap_or(1000));
        let review_session_ttl =
            Duration::from_secs(env_u64("SEATWATCH_REVIEW_TTL_SECS").unwrap_or(600));
        let digest_window_hours = env_u64("SEATWATCH_DIGEST_WINDOW_HOURS").unwrap_or(24);

        Ok(Self {
            bot_token,
            admin_chat,
            multi_user,
            topics,
            topic_groups,
            premium_group,
            github_owner,
            github_repo,
            github_token,
            donation_address,
            booking_url,
            subscribers_file,
            donations_file,
            send_delay,
            eviction_grace,
            review_session_ttl,
            digest_window_hours,
        })
    }

    pub fn repo_url(&self) -> String {
        format!("https://github.com/{}/{}", self.github_owner, self.github_repo)
    }

    /// Destination group for a topic, if one is configured.
    pub fn group_for(&self, topic: &str) -> Option<ChatId> {
        self.topic_groups.get(topic).copied()
    }
}

/// Parse `CODE=chat_id` pairs, e.g. `TOLC-I=-1001,TOLC-E=-1002`.
/// Entries with an empty chat id are skipped (group not created yet).
fn parse_topic_groups(v: Option<String>) -> Result<HashMap<String, ChatId>> {
    let mut out = HashMap::new();
    for entry in v.unwrap_or_default().split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let Some((code, id)) = entry.split_once('=') else {
            return Err(Error::Config(format!(
                "SEATWATCH_TOPIC_GROUPS entry without '=': {entry}"
            )));
        };
        let id = id.trim();
        if id.is_empty() {
            continue;
        }
        let id = id.parse::<i64>().map_err(|_| {
            Error::Config(format!("SEATWATCH_TOPIC_GROUPS bad chat id: {entry}"))
        })?;
        out.insert(code.trim().to_string(), ChatId(id));
    }
    Ok(out)
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn parse_csv(v: Option<String>) -> Option<Vec<String>> {
    let v = v?;
    let out = v
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_topic_group_pairs() {
        let groups =
            parse_topic_groups(Some("TOLC-I=-1001, TOLC-E=-1002,CEnT-S=".to_string())).unwrap();
        assert_eq!(groups.get("TOLC-I"), Some(&ChatId(-1001)));
        assert_eq!(groups.get("TOLC-E"), Some(&ChatId(-1002)));
        // Empty id means the group is not configured yet.
        assert!(!groups.contains_key("CEnT-S"));
    }

    #[test]
    fn rejects_malformed_topic_group_entry() {
        assert!(parse_topic_groups(Some("TOLC-I".to_string())).is_err());
        assert!(parse_topic_groups(Some("TOLC-I=abc".to_string())).is_err());
    }
}
