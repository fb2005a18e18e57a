//! Notification fan-out: scrape results in, per-group messages out.
//!
//! One aggregated message per topic with availability; a "still running"
//! digest per quiet topic at most once per window. The digest dedup cache
//! is memory-only, so a restart may re-send one digest early; accepted
//! tradeoff.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use tokio::{sync::Mutex, time::sleep};
use tracing::{debug, error};

use crate::{
    config::Config,
    domain::{ChatId, SeatRecord},
    ports::MessagingPort,
};

pub struct Notifier {
    cfg: Arc<Config>,
    messenger: Arc<dyn MessagingPort>,
    /// (destination, topic) -> epoch seconds of the last digest sent.
    last_digest: Mutex<HashMap<(i64, String), u64>>,
}

impl Notifier {
    pub fn new(cfg: Arc<Config>, messenger: Arc<dyn MessagingPort>) -> Self {
        Self {
            cfg,
            messenger,
            last_digest: Mutex::new(HashMap::new()),
        }
    }

    /// Send one aggregated message per topic with nonempty results to the
    /// configured group. Unconfigured topics are skipped; a failed send is
    /// logged and does not stop the loop.
    pub async fn send_availability(&self, results: &HashMap<String, Vec<SeatRecord>>) {
        for (topic, seats) in results {
            if seats.is_empty() {
                continue;
            }
            let Some(group) = self.cfg.group_for(topic) else {
                debug!("no group configured for {topic}, skipping alert");
                continue;
            };

            let message = format_topic_summary(topic, seats, &self.cfg.booking_url);
            if let Err(e) = self.messenger.send_html(group, &message).await {
                error!("availability alert for {topic} -> {group} failed: {e}");
            }
            sleep(self.cfg.send_delay).await;
        }
    }

    /// Send a "still running, nothing found" digest for every known topic
    /// with zero results, at most once per rolling window per destination.
    pub async fn send_daily_digest(
        &self,
        results: &HashMap<String, Vec<SeatRecord>>,
        window_hours: u64,
    ) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.send_daily_digest_at(results, window_hours, now).await;
    }

    async fn send_daily_digest_at(
        &self,
        results: &HashMap<String, Vec<SeatRecord>>,
        window_hours: u64,
        now: u64,
    ) {
        let window = window_hours * 3600;

        for topic in &self.cfg.topics {
            let Some(group) = self.cfg.group_for(topic) else {
                continue;
            };
            if results.get(topic).map(|s| !s.is_empty()).unwrap_or(false) {
                continue;
            }

            let key = (group.0, topic.clone());
            {
                let cache = self.last_digest.lock().await;
                if let Some(last) = cache.get(&key) {
                    if now.saturating_sub(*last) < window {
                        continue;
                    }
                }
            }

            let message = format!(
                "✅ <b>{topic}</b>\n\nThe crawler is still running. No new seats in the last {window_hours}h."
            );
            if let Err(e) = self.messenger.send_html(group, &message).await {
                error!("daily digest for {topic} -> {group} failed: {e}");
                continue;
            }
            self.last_digest.lock().await.insert(key, now);
            sleep(self.cfg.send_delay).await;
        }
    }

    /// Send a test message to the admin chat to verify the bot works.
    pub async fn test_connection(&self) -> bool {
        let message = "<b>SEATWATCH</b>\n\nTest message: the bot is connected.";
        self.messenger
            .send_html(self.cfg.admin_chat, message)
            .await
            .is_ok()
    }
}

#[derive(Default)]
struct CityGroup {
    seats: i64,
    dates: HashSet<String>,
}

/// One aggregated summary per topic, grouped by region and city.
/// Non-numeric seat values count defensively as 1.
fn format_topic_summary(topic: &str, seats: &[SeatRecord], booking_url: &str) -> String {
    let mut groups: BTreeMap<(String, String), CityGroup> = BTreeMap::new();
    for rec in seats {
        let entry = groups
            .entry((rec.region.clone(), rec.city.clone()))
            .or_default();
        entry.seats += rec.seats.trim().parse::<i64>().unwrap_or(1);
        let date = rec.date.trim();
        if !date.is_empty() {
            entry.dates.insert(date.to_string());
        }
    }

    let mut lines = vec![format!("🚨 <b>{topic}</b>"), String::new()];
    for ((region, city), g) in &groups {
        let region = if region.is_empty() { "-" } else { region };
        let city = if city.is_empty() { "-" } else { city };
        lines.push(format!(
            "📍 <b>{region}</b> – {city}: {} seats, {} dates",
            g.seats,
            g.dates.len()
        ));
    }
    lines.push(String::new());
    lines.push(format!("🔗 <a href='{booking_url}'>📌 Book now</a>"));
    lines.join("\n")
}
