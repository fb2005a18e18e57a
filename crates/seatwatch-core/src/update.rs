//! Cross-messenger incoming update model.
//!
//! Platform-specific payload shapes live in the adapter; the dispatcher
//! only ever sees these types.

use crate::domain::{ChatId, UserId, UserProfile};

#[derive(Clone, Debug)]
pub enum IncomingUpdate {
    Message(InboundMessage),
    MemberJoined(MemberJoin),
    /// Update kinds the engine does not handle (edits, channel posts, ...).
    Other,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Other,
}

#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub chat_kind: ChatKind,
    pub sender: UserProfile,
    /// `None` for non-text messages (photos, stickers, ...).
    pub text: Option<String>,
}

/// "Users joined a group" membership-change event.
#[derive(Clone, Debug)]
pub struct MemberJoin {
    pub chat_id: ChatId,
    pub members: Vec<JoinedMember>,
}

#[derive(Clone, Debug)]
pub struct JoinedMember {
    pub user_id: UserId,
    pub first_name: String,
    pub is_bot: bool,
}
