//! Long-poll update loop.
//!
//! Fetches batches of updates, advances the cursor to one past the
//! highest fetched id, and hands each event to the dispatcher. The
//! cursor moves before handling, so command processing is at-most-once:
//! an event lost to a crash mid-batch is never retried.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use serde_json::Value;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use seatwatch_core::{
    dispatcher::UpdateDispatcher,
    domain::{ChatId, UserId, UserProfile},
    update::{ChatKind, InboundMessage, IncomingUpdate, JoinedMember, MemberJoin},
};

use crate::api::ApiClient;

const POLL_ERROR_PAUSE: Duration = Duration::from_secs(5);

pub struct UpdatePoller {
    api: ApiClient,
    dispatcher: Arc<UpdateDispatcher>,
    multi_user: bool,
    started: AtomicBool,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl UpdatePoller {
    pub fn new(api: ApiClient, dispatcher: Arc<UpdateDispatcher>, multi_user: bool) -> Self {
        Self {
            api,
            dispatcher,
            multi_user,
            started: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    /// Start the update loop in a background task, exactly once per
    /// process. No-op unless multi-recipient mode is enabled.
    pub fn start_polling(self: &Arc<Self>) {
        if !self.multi_user {
            return;
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let this = self.clone();
        let handle = tokio::spawn(async move { this.run().await });
        if let Ok(mut slot) = self.task.lock() {
            *slot = Some(handle);
        }
        info!("multi-recipient mode: update polling started");
    }

    /// Block on the polling task; returns immediately when none was started.
    pub async fn wait(&self) {
        let handle = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run(&self) {
        let mut offset = 0i64;
        loop {
            match self.api.get_updates(offset).await {
                Ok(updates) => {
                    for update in updates {
                        let Some(id) = update.get("update_id").and_then(Value::as_i64) else {
                            continue;
                        };
                        offset = id + 1;
                        self.dispatcher.dispatch(parse_update(&update)).await;
                    }
                }
                Err(e) => {
                    error!("update fetch failed, backing off: {e}");
                    sleep(POLL_ERROR_PAUSE).await;
                }
            }
        }
    }
}

/// Map a raw update payload onto the engine's update model.
pub fn parse_update(update: &Value) -> IncomingUpdate {
    let Some(message) = update.get("message") else {
        return IncomingUpdate::Other;
    };
    let chat = message.get("chat");
    let Some(chat_id) = chat.and_then(|c| c.get("id")).and_then(Value::as_i64) else {
        return IncomingUpdate::Other;
    };
    let chat_type = chat
        .and_then(|c| c.get("type"))
        .and_then(Value::as_str)
        .unwrap_or("");

    if let Some(members) = message.get("new_chat_members").and_then(Value::as_array) {
        if !members.is_empty() && matches!(chat_type, "group" | "supergroup") {
            return IncomingUpdate::MemberJoined(MemberJoin {
                chat_id: ChatId(chat_id),
                members: members.iter().filter_map(parse_member).collect(),
            });
        }
    }

    let chat_kind = match chat_type {
        "private" => ChatKind::Private,
        "group" | "supergroup" => ChatKind::Group,
        _ => ChatKind::Other,
    };
    let from = message.get("from");
    let sender = UserProfile {
        user_id: from
            .and_then(|f| f.get("id"))
            .and_then(Value::as_i64)
            .unwrap_or_default(),
        username: str_field(from, "username"),
        first_name: str_field(from, "first_name"),
        last_name: str_field(from, "last_name"),
    };

    IncomingUpdate::Message(InboundMessage {
        chat_id: ChatId(chat_id),
        chat_kind,
        sender,
        text: message
            .get("text")
            .and_then(Value::as_str)
            .map(String::from),
    })
}

fn parse_member(member: &Value) -> Option<JoinedMember> {
    Some(JoinedMember {
        user_id: UserId(member.get("id").and_then(Value::as_i64)?),
        first_name: str_field(Some(member), "first_name"),
        is_bot: member
            .get("is_bot")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn str_field(obj: Option<&Value>, key: &str) -> String {
    obj.and_then(|o| o.get(key))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}
