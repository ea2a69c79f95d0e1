use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::types::{
    AttachmentRef, ChatId, ChatInfo, ChatSummary, MessageData, MessageId, OutgoingAttachment,
    UserData, UserId,
};

/// `errorCode` the server attaches when the access key is unknown or expired
pub const ERR_INVALID_ACCESS_KEY: i32 = 1;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame carries neither an event nor an error")]
    EmptyFrame,
}

// ---------------------------------------------------------------------------
// Push channel
// ---------------------------------------------------------------------------

/// `newMessage` payload. Unlike paged messages it carries no sender name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageEvent {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub text: String,
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<AttachmentRef>>,
}

/// `messagesDeleted` payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagesDeletedEvent {
    pub chat_id: ChatId,
    pub deleted_message_ids: Vec<MessageId>,
}

/// `chatMemberLeft` payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMemberLeftEvent {
    pub chat_id: ChatId,
    pub user_id: UserId,
}

/// Events delivered over the push channel as `{event, eventData}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "eventData", rename_all = "camelCase")]
pub enum ServerEvent {
    NewMessage(NewMessageEvent),
    MessagesDeleted(MessagesDeletedEvent),
    ChatMemberLeft(ChatMemberLeftEvent),
}

impl ServerEvent {
    pub fn chat_id(&self) -> ChatId {
        match self {
            ServerEvent::NewMessage(e) => e.chat_id,
            ServerEvent::MessagesDeleted(e) => e.chat_id,
            ServerEvent::ChatMemberLeft(e) => e.chat_id,
        }
    }
}

/// A decoded push-channel frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    Event(ServerEvent),
    Error(String),
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        if let Some(error) = value.get("error") {
            let message = match error.as_str() {
                Some(s) => s.to_string(),
                None => error.to_string(),
            };
            return Ok(ServerFrame::Error(message));
        }

        if value.get("event").is_none() {
            return Err(ProtocolError::EmptyFrame);
        }

        Ok(ServerFrame::Event(serde_json::from_value(value)?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub chats: Vec<ChatId>,
}

/// Control frame sent from client to server. The server only understands
/// `subscribe`; every frame carries the access key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    pub access_key: String,
    pub event: String,
    pub event_data: Subscription,
}

impl ClientFrame {
    pub fn subscribe(access_key: impl Into<String>, chats: Vec<ChatId>) -> Self {
        Self {
            access_key: access_key.into(),
            event: "subscribe".to_string(),
            event_data: Subscription { chats },
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP bodies
// ---------------------------------------------------------------------------

/// Application error body: `{"error": "...", "errorCode": 1}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiFailure {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i32>,
}

impl ApiFailure {
    pub fn is_invalid_access_key(&self) -> bool {
        self.error_code == Some(ERR_INVALID_ACCESS_KEY)
    }
}

/// Decode a response body that is either `T` or an [`ApiFailure`].
///
/// The server answers application errors with HTTP 200, so the body has to be
/// inspected for an `error` field before it is treated as a success.
pub fn decode_response<T: DeserializeOwned>(
    body: &str,
) -> Result<Result<T, ApiFailure>, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    if value.get("error").is_some() {
        return Ok(Err(serde_json::from_value(value)?));
    }
    Ok(Ok(serde_json::from_value(value)?))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_key: String,
    /// Expiry of the access key, seconds since epoch
    pub death_ts: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    #[serde(default)]
    pub register_success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEnvelope {
    pub user: UserData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatsEnvelope {
    #[serde(default)]
    pub chats: Vec<ChatSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatEnvelope {
    pub chat: ChatInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesEnvelope {
    #[serde(default)]
    pub messages: Vec<MessageData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    #[serde(default)]
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatCredentials {
    pub chat_name: String,
    pub chat_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub chat_id: ChatId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<OutgoingAttachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message_id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveChatRequest {
    pub chat_id: ChatId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessagesRequest {
    pub chat_id: ChatId,
    pub message_ids: Vec<MessageId>,
}

/// Query of `GET /getMessages`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessagesQuery {
    pub chat_id: ChatId,
    pub offset: usize,
    pub messages_count: usize,
    pub with_usernames: bool,
}

impl MessagesQuery {
    pub fn to_query_string(&self) -> String {
        format!(
            "chatId={}&offset={}&messagesCount={}&withUsernames={}",
            self.chat_id, self.offset, self.messages_count, self.with_usernames
        )
    }
}
