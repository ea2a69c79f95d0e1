//! In-memory `ChatApi` used by unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use murmur_protocol::{
    ChatCredentials, ChatId, ChatInfo, ChatSummary, MessageData, MessageId, MessagesQuery,
    SendMessageRequest, UserData, UserId,
};

use crate::error::{ClientError, Result};
use crate::network::ChatApi;

#[derive(Default)]
struct Inner {
    me: Option<UserData>,
    chats: Vec<ChatSummary>,
    chat_infos: HashMap<ChatId, ChatInfo>,
    users: HashMap<UserId, UserData>,
    history: Vec<MessageData>,
    fail_history: bool,
    latency: Duration,
    send_latency: HashMap<String, Duration>,
    failing_sends: HashSet<String>,
    invalid_key: bool,

    message_requests: Vec<MessagesQuery>,
    sent: Vec<String>,
    sends_in_flight: usize,
    max_sends_in_flight: usize,
    next_message_id: MessageId,
    left: Vec<ChatId>,
    deleted: Vec<(ChatId, Vec<MessageId>)>,
    user_lookups: Vec<UserId>,
}

#[derive(Default)]
pub struct MockApi {
    inner: Mutex<Inner>,
}

impl MockApi {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap();
        f(&mut inner)
    }

    fn check_key(&self) -> Result<()> {
        if self.with(|i| i.invalid_key) {
            return Err(ClientError::InvalidAccessKey);
        }
        Ok(())
    }

    pub fn set_me(&self, user: UserData) {
        self.with(|i| i.me = Some(user));
    }

    pub fn set_chats(&self, chats: Vec<ChatSummary>) {
        self.with(|i| i.chats = chats);
    }

    pub fn add_chat_info(&self, info: ChatInfo) {
        self.with(|i| i.chat_infos.insert(info.id, info));
    }

    pub fn add_user(&self, user: UserData) {
        self.with(|i| i.users.insert(user.id, user));
    }

    pub fn set_history(&self, history: Vec<MessageData>) {
        self.with(|i| i.history = history);
    }

    pub fn fail_history(&self, fail: bool) {
        self.with(|i| i.fail_history = fail);
    }

    pub fn set_latency(&self, latency: Duration) {
        self.with(|i| i.latency = latency);
    }

    pub fn set_send_latency(&self, text: &str, latency: Duration) {
        self.with(|i| i.send_latency.insert(text.to_string(), latency));
    }

    pub fn fail_send(&self, text: &str) {
        self.with(|i| i.failing_sends.insert(text.to_string()));
    }

    pub fn invalidate_key(&self) {
        self.with(|i| i.invalid_key = true);
    }

    pub fn message_requests(&self) -> Vec<MessagesQuery> {
        self.with(|i| i.message_requests.clone())
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.with(|i| i.sent.clone())
    }

    pub fn max_sends_in_flight(&self) -> usize {
        self.with(|i| i.max_sends_in_flight)
    }

    pub fn left_chats(&self) -> Vec<ChatId> {
        self.with(|i| i.left.clone())
    }

    pub fn deleted(&self) -> Vec<(ChatId, Vec<MessageId>)> {
        self.with(|i| i.deleted.clone())
    }

    pub fn user_lookups(&self) -> Vec<UserId> {
        self.with(|i| i.user_lookups.clone())
    }

    async fn pause(&self) {
        let latency = self.with(|i| i.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

fn not_found(what: &str) -> ClientError {
    ClientError::Api {
        message: format!("{} not found", what),
        code: None,
    }
}

#[async_trait]
impl ChatApi for MockApi {
    async fn get_me(&self) -> Result<UserData> {
        self.check_key()?;
        self.with(|i| i.me.clone()).ok_or_else(|| not_found("User"))
    }

    async fn get_chats(&self) -> Result<Vec<ChatSummary>> {
        self.check_key()?;
        Ok(self.with(|i| i.chats.clone()))
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<ChatInfo> {
        self.check_key()?;
        self.pause().await;
        self.with(|i| i.chat_infos.get(&chat_id).cloned())
            .ok_or_else(|| not_found("Chat"))
    }

    async fn get_user(&self, user_id: UserId) -> Result<UserData> {
        self.check_key()?;
        self.with(|i| {
            i.user_lookups.push(user_id);
            i.users.get(&user_id).cloned()
        })
        .ok_or_else(|| not_found("User"))
    }

    async fn get_messages(&self, query: MessagesQuery) -> Result<Vec<MessageData>> {
        self.check_key()?;
        self.with(|i| i.message_requests.push(query));
        self.pause().await;

        self.with(|i| {
            if i.fail_history {
                return Err(ClientError::Api {
                    message: "Interval Server Error".to_string(),
                    code: None,
                });
            }
            // Pages are served once, like a finite history
            Ok(std::mem::take(&mut i.history))
        })
    }

    async fn send_message(&self, request: SendMessageRequest) -> Result<MessageId> {
        self.check_key()?;
        let latency = self.with(|i| {
            i.sends_in_flight += 1;
            i.max_sends_in_flight = i.max_sends_in_flight.max(i.sends_in_flight);
            i.send_latency.get(&request.text).copied().unwrap_or_default()
        });

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        self.with(|i| {
            i.sends_in_flight -= 1;
            if i.failing_sends.contains(&request.text) {
                return Err(ClientError::Api {
                    message: "Can't send".to_string(),
                    code: None,
                });
            }
            i.sent.push(request.text.clone());
            i.next_message_id += 1;
            Ok(i.next_message_id)
        })
    }

    async fn enter_chat(&self, credentials: ChatCredentials) -> Result<ChatInfo> {
        self.check_key()?;
        self.with(|i| {
            i.chat_infos
                .values()
                .find(|c| c.name == credentials.chat_name)
                .cloned()
        })
        .ok_or_else(|| not_found("Chat"))
    }

    async fn create_chat(&self, credentials: ChatCredentials) -> Result<ChatInfo> {
        self.check_key()?;
        self.with(|i| {
            let id = i.chat_infos.keys().max().copied().unwrap_or(0) + 1;
            let info = ChatInfo {
                id,
                owner_id: i.me.as_ref().map(|u| u.id).unwrap_or_default(),
                name: credentials.chat_name.clone(),
                create_ts: 0,
                last_message_ts: 0,
                members_count: 1,
                messages_count: 0,
                messages: Default::default(),
                members: Vec::new(),
            };
            i.chat_infos.insert(id, info.clone());
            Ok(info)
        })
    }

    async fn leave_chat(&self, chat_id: ChatId) -> Result<()> {
        self.check_key()?;
        self.with(|i| i.left.push(chat_id));
        Ok(())
    }

    async fn delete_messages(&self, chat_id: ChatId, message_ids: Vec<MessageId>) -> Result<()> {
        self.check_key()?;
        self.with(|i| i.deleted.push((chat_id, message_ids)));
        Ok(())
    }

    async fn attachment(&self, hash: &str) -> Result<Vec<u8>> {
        self.check_key()?;
        Ok(hash.as_bytes().to_vec())
    }
}
