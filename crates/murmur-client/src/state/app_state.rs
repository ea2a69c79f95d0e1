use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use murmur_protocol::{ChatId, ChatInfo, ChatSummary, UserData, UserId};

use super::timeline::{DayBoundary, Timeline};

/// Shared handle to the client state
#[derive(Debug, Clone)]
pub struct AppState {
    inner: Arc<RwLock<AppStateInner>>,
}

#[derive(Debug)]
pub struct AppStateInner {
    // Current user
    pub current_user: Option<UserData>,
    pub access_key: Option<String>,

    // Chat list, most recently active first
    pub chats: Vec<ChatEntry>,

    // Open chat and its timeline
    pub active: Option<ActiveChat>,
    /// Bumped whenever the active chat is replaced
    pub epoch: u64,

    // Username cache, never evicted
    pub users: HashMap<UserId, String>,

    // Connection state
    pub is_connected: bool,
    pub connection_error: Option<String>,

    pub day_boundary: DayBoundary,
}

impl Default for AppStateInner {
    fn default() -> Self {
        Self {
            current_user: None,
            access_key: None,
            chats: Vec::new(),
            active: None,
            epoch: 0,
            users: HashMap::new(),
            is_connected: false,
            connection_error: None,
            day_boundary: DayBoundary::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub id: ChatId,
    pub name: String,
    pub last_message_ts: i64,
    pub unread: bool,
}

impl From<ChatSummary> for ChatEntry {
    fn from(summary: ChatSummary) -> Self {
        Self {
            id: summary.id,
            name: summary.name,
            last_message_ts: summary.last_message_ts,
            unread: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ActiveChat {
    pub chat_id: ChatId,
    pub name: String,
    pub members_count: i64,
    pub epoch: u64,
    pub timeline: Timeline,
}

impl AppStateInner {
    pub fn current_user_id(&self) -> Option<UserId> {
        self.current_user.as_ref().map(|u| u.id)
    }

    pub fn active_chat_id(&self) -> Option<ChatId> {
        self.active.as_ref().map(|a| a.chat_id)
    }

    /// Active chat, but only if it is still the one opened at `epoch`
    pub fn active_at(&mut self, chat_id: ChatId, epoch: u64) -> Option<&mut ActiveChat> {
        self.active
            .as_mut()
            .filter(|a| a.chat_id == chat_id && a.epoch == epoch)
    }

    pub fn set_chats(&mut self, chats: Vec<ChatSummary>) {
        let mut entries: Vec<ChatEntry> = chats.into_iter().map(ChatEntry::from).collect();
        entries.sort_by(|a, b| b.last_message_ts.cmp(&a.last_message_ts));
        self.chats = entries;
    }

    pub fn chat(&self, chat_id: ChatId) -> Option<&ChatEntry> {
        self.chats.iter().find(|c| c.id == chat_id)
    }

    /// Add a chat at the top of the list unless it is already there
    pub fn add_chat(&mut self, summary: ChatSummary) {
        if self.chat(summary.id).is_none() {
            self.chats.insert(0, ChatEntry::from(summary));
        }
    }

    pub fn remove_chat(&mut self, chat_id: ChatId) -> bool {
        let before = self.chats.len();
        self.chats.retain(|c| c.id != chat_id);
        before != self.chats.len()
    }

    /// Move a chat to the top after new activity; flag it unread unless open
    pub fn touch_chat(&mut self, chat_id: ChatId, ts: i64) {
        let is_active = self.active_chat_id() == Some(chat_id);
        let Some(position) = self.chats.iter().position(|c| c.id == chat_id) else {
            return;
        };

        let mut entry = self.chats.remove(position);
        entry.last_message_ts = entry.last_message_ts.max(ts);
        if !is_active {
            entry.unread = true;
        }
        self.chats.insert(0, entry);
    }

    /// Replace the active chat. Returns the new epoch.
    pub fn open_chat(&mut self, info: ChatInfo) -> u64 {
        self.epoch += 1;

        for member in &info.members {
            self.users
                .entry(member.id)
                .or_insert_with(|| member.username.clone());
        }
        for message in &info.messages.items {
            if let Some(name) = &message.sender_username {
                self.users
                    .entry(message.sender_id)
                    .or_insert_with(|| name.clone());
            }
        }

        let mut timeline = Timeline::from_page(info.id, self.day_boundary, info.messages.items);
        for (user_id, name) in &self.users {
            timeline.set_sender_name(*user_id, name);
        }

        if let Some(entry) = self.chats.iter_mut().find(|c| c.id == info.id) {
            entry.unread = false;
        }

        self.active = Some(ActiveChat {
            chat_id: info.id,
            name: info.name,
            members_count: info.members_count,
            epoch: self.epoch,
            timeline,
        });
        self.epoch
    }

    pub fn close_active(&mut self) {
        self.epoch += 1;
        self.active = None;
    }

    pub fn cache_user(&mut self, user_id: UserId, username: &str) {
        self.users.insert(user_id, username.to_string());
    }

    pub fn cached_user(&self, user_id: UserId) -> Option<&str> {
        self.users.get(&user_id).map(String::as_str)
    }
}

impl AppState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(AppStateInner::default())),
        }
    }

    pub fn with_day_boundary(day_boundary: DayBoundary) -> Self {
        let inner = AppStateInner {
            day_boundary,
            ..Default::default()
        };
        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    pub async fn read(&self) -> tokio::sync::RwLockReadGuard<'_, AppStateInner> {
        self.inner.read().await
    }

    pub async fn write(&self) -> tokio::sync::RwLockWriteGuard<'_, AppStateInner> {
        self.inner.write().await
    }

    pub async fn set_auth(&self, access_key: String, user: UserData) {
        let mut state = self.inner.write().await;
        state.users.insert(user.id, user.username.clone());
        state.access_key = Some(access_key);
        state.current_user = Some(user);
    }

    pub async fn clear_auth(&self) {
        let mut state = self.inner.write().await;
        state.access_key = None;
        state.current_user = None;
        state.chats.clear();
        state.close_active();
    }

    pub async fn is_authenticated(&self) -> bool {
        self.inner.read().await.access_key.is_some()
    }

    pub async fn access_key(&self) -> Option<String> {
        self.inner.read().await.access_key.clone()
    }

    pub async fn active_chat_id(&self) -> Option<ChatId> {
        self.inner.read().await.active_chat_id()
    }

    pub async fn set_connected(&self, connected: bool, error: Option<String>) {
        let mut state = self.inner.write().await;
        state.is_connected = connected;
        state.connection_error = error;
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
