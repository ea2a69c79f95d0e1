use serde::{Deserialize, Serialize};

/// Server-assigned user identifier
pub type UserId = i64;
/// Server-assigned chat identifier
pub type ChatId = i64;
/// Message identifier, monotonically increasing within a chat
pub type MessageId = i64;

/// User data as returned by `/getMe` and `/getUser`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub register_ts: i64,
}

/// Chat list row from `/getChats`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: ChatId,
    pub name: String,
    #[serde(default)]
    pub last_message_ts: i64,
}

/// Chat member entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMember {
    pub id: UserId,
    pub username: String,
}

/// A page of messages embedded in chat details, newest first
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MessagePage {
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub items: Vec<MessageData>,
}

/// Chat details from `/getChat`, `/enterChat` and `/createChat`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatInfo {
    pub id: ChatId,
    #[serde(default)]
    pub owner_id: UserId,
    pub name: String,
    #[serde(default)]
    pub create_ts: i64,
    #[serde(default)]
    pub last_message_ts: i64,
    #[serde(default)]
    pub members_count: i64,
    #[serde(default)]
    pub messages_count: i64,
    #[serde(default)]
    pub messages: MessagePage,
    #[serde(default)]
    pub members: Vec<ChatMember>,
}

impl ChatInfo {
    pub fn summary(&self) -> ChatSummary {
        ChatSummary {
            id: self.id,
            name: self.name.clone(),
            last_message_ts: self.last_message_ts,
        }
    }
}

/// Reference to a stored attachment blob
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    pub content_type: String,
    pub hash: String,
}

/// Message data from `/getChat` and `/getMessages`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    pub chat_id: ChatId,
    pub id: MessageId,
    pub ts: i64,
    pub text: String,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<AttachmentRef>>,
}

/// Attachment payload submitted with `/sendMessage`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingAttachment {
    pub content_type: String,
    /// Base64 encoded file contents
    pub data: String,
}
