//! Chat session orchestration.
//!
//! `ChatSession` ties the API client, the shared state, the history loader,
//! the send queue and the push channel together. Front ends call its
//! operations and render from [`ChatSession::state`].

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use murmur_protocol::{ChatCredentials, ChatId, ChatInfo, MessageId, OutgoingAttachment, UserId};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::network::{ChatApi, LiveEvent, LiveUpdates};
use crate::state::{AppState, validate_chat_credentials};
use crate::sync::{
    DispatchEffect, LoadOutcome, PaginationLoader, ScrollTrigger, SendOutcome, SendQueue,
    SendRequest, apply_event,
};

pub struct ChatSession {
    api: Arc<dyn ChatApi>,
    state: AppState,
    loader: PaginationLoader,
    sends: SendQueue,
    scroll: Mutex<ScrollTrigger>,
    live: Option<LiveUpdates>,
    /// Latest chat open request; older responses are discarded
    open_seq: AtomicU64,
}

impl ChatSession {
    /// Create a session and start its send worker. Send outcomes arrive on
    /// the returned receiver.
    pub fn new(
        api: Arc<dyn ChatApi>,
        config: &ClientConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SendOutcome>) {
        let (sends, outcomes) = SendQueue::spawn(api.clone());
        let session = Self {
            api,
            state: AppState::with_day_boundary(config.day_boundary),
            loader: PaginationLoader::new(config.page_size, config.reveal_delay()),
            sends,
            scroll: Mutex::new(ScrollTrigger::new(config.scroll_threshold_px)),
            live: None,
            open_seq: AtomicU64::new(0),
        };
        (session, outcomes)
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn is_loading_history(&self) -> bool {
        self.loader.is_loading()
    }

    pub fn pending_sends(&self) -> usize {
        self.sends.pending()
    }

    /// Attach the push channel and subscribe every chat already known
    pub async fn attach_live(&mut self, live: LiveUpdates) {
        let chats: Vec<ChatId> = self.state.read().await.chats.iter().map(|c| c.id).collect();
        if !chats.is_empty() {
            live.subscribe(&chats);
        }
        self.live = Some(live);
    }

    pub fn subscriptions(&self) -> Vec<ChatId> {
        self.live
            .as_ref()
            .map(LiveUpdates::subscriptions)
            .unwrap_or_default()
    }

    fn subscribe(&self, chats: &[ChatId]) {
        if let Some(live) = &self.live {
            live.subscribe(chats);
        }
    }

    /// Signs the session out when the server rejects the access key
    async fn checked<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(ClientError::InvalidAccessKey) = &result {
            tracing::warn!("Access key rejected by server, signing out");
            self.state.clear_auth().await;
        }
        result
    }

    /// Load the current user and chat list, then open the most recent chat
    pub async fn bootstrap(&self, access_key: String) -> Result<()> {
        let user = self.checked(self.api.get_me().await).await?;
        tracing::info!("Signed in as {}", user.username);
        self.state.set_auth(access_key, user).await;

        let chats = self.checked(self.api.get_chats().await).await?;
        let first = {
            let mut state = self.state.write().await;
            state.set_chats(chats);
            state.chats.first().map(|c| c.id)
        };

        let ids: Vec<ChatId> = self.state.read().await.chats.iter().map(|c| c.id).collect();
        tracing::info!("Loaded {} chats", ids.len());
        if !ids.is_empty() {
            self.subscribe(&ids);
        }

        match first {
            Some(chat_id) => self.open_chat(chat_id).await,
            None => Ok(()),
        }
    }

    /// Make `chat_id` the active chat. Re-opening the active chat only
    /// clears its unread flag, but still supersedes opens in flight.
    pub async fn open_chat(&self, chat_id: ChatId) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if state.active_chat_id() == Some(chat_id) {
                self.open_seq.fetch_add(1, Ordering::AcqRel);
                if let Some(entry) = state.chats.iter_mut().find(|c| c.id == chat_id) {
                    entry.unread = false;
                }
                return Ok(());
            }
        }
        self.load_chat(chat_id).await
    }

    /// Fetch the active chat again, e.g. after missed push events
    pub async fn reload_active(&self) -> Result<()> {
        match self.state.active_chat_id().await {
            Some(chat_id) => self.load_chat(chat_id).await,
            None => Ok(()),
        }
    }

    async fn load_chat(&self, chat_id: ChatId) -> Result<()> {
        let seq = self.open_seq.fetch_add(1, Ordering::AcqRel) + 1;
        let info = self.checked(self.api.get_chat(chat_id).await).await?;

        // Compared under the write lock, together with the swap
        let epoch = {
            let mut state = self.state.write().await;
            if self.open_seq.load(Ordering::Acquire) != seq {
                tracing::debug!("Chat {} superseded by a newer open request", chat_id);
                return Ok(());
            }
            state.open_chat(info)
        };
        self.opened(chat_id, epoch);
        Ok(())
    }

    fn opened(&self, chat_id: ChatId, epoch: u64) {
        if let Ok(mut scroll) = self.scroll.lock() {
            scroll.reset();
        }
        tracing::debug!("Opened chat {} (epoch {})", chat_id, epoch);
    }

    pub async fn enter_chat(&self, name: &str, password: &str) -> Result<ChatId> {
        validate_chat_credentials(name, password)?;
        let credentials = ChatCredentials {
            chat_name: name.to_string(),
            chat_password: password.to_string(),
        };
        let info = self.checked(self.api.enter_chat(credentials).await).await?;
        tracing::info!("Entered chat {} ({})", info.name, info.id);
        Ok(self.join(info).await)
    }

    pub async fn create_chat(&self, name: &str, password: &str) -> Result<ChatId> {
        validate_chat_credentials(name, password)?;
        let credentials = ChatCredentials {
            chat_name: name.to_string(),
            chat_password: password.to_string(),
        };
        let info = self.checked(self.api.create_chat(credentials).await).await?;
        tracing::info!("Created chat {} ({})", info.name, info.id);
        Ok(self.join(info).await)
    }

    async fn join(&self, info: ChatInfo) -> ChatId {
        let chat_id = info.id;
        self.subscribe(&[chat_id]);
        let epoch = {
            let mut state = self.state.write().await;
            state.add_chat(info.summary());
            self.open_seq.fetch_add(1, Ordering::AcqRel);
            state.open_chat(info)
        };
        self.opened(chat_id, epoch);
        chat_id
    }

    /// Leave a chat and, if it was open, switch to the next one
    pub async fn leave_chat(&self, chat_id: ChatId) -> Result<()> {
        self.checked(self.api.leave_chat(chat_id).await).await?;
        tracing::info!("Left chat {}", chat_id);

        let next = {
            let mut state = self.state.write().await;
            state.remove_chat(chat_id);
            if state.active_chat_id() != Some(chat_id) {
                return Ok(());
            }
            state.close_active();
            state.chats.first().map(|c| c.id)
        };

        match next {
            Some(next) => self.open_chat(next).await,
            None => Ok(()),
        }
    }

    /// Ask the server to delete messages of the active chat. The timeline
    /// changes when the matching push event arrives.
    pub async fn delete_messages(&self, message_ids: Vec<MessageId>) -> Result<()> {
        let chat_id = self
            .state
            .active_chat_id()
            .await
            .ok_or(ClientError::NoActiveChat)?;
        if message_ids.is_empty() {
            return Ok(());
        }
        self.checked(self.api.delete_messages(chat_id, message_ids).await)
            .await
    }

    /// Queue a message for the active chat
    pub async fn send(&self, text: &str, attachments: Vec<OutgoingAttachment>) -> Result<()> {
        let chat_id = self
            .state
            .active_chat_id()
            .await
            .ok_or(ClientError::NoActiveChat)?;
        self.sends
            .enqueue(SendRequest::new(chat_id, text, attachments)?)
    }

    /// Feed a viewport scroll position; loads older history when it fires
    pub async fn on_scroll(&self, scroll_top: f64) -> Option<LoadOutcome> {
        let fired = self
            .scroll
            .lock()
            .map(|mut trigger| trigger.on_scroll(scroll_top))
            .unwrap_or(false);
        if !fired {
            return None;
        }
        Some(self.load_older().await)
    }

    pub async fn on_wheel(&self, scroll_top: f64, delta_y: f64) -> Option<LoadOutcome> {
        let fired = self
            .scroll
            .lock()
            .map(|trigger| trigger.on_wheel(scroll_top, delta_y))
            .unwrap_or(false);
        if !fired {
            return None;
        }
        Some(self.load_older().await)
    }

    pub async fn load_older(&self) -> LoadOutcome {
        self.loader.load_older(self.api.as_ref(), &self.state).await
    }

    pub async fn fetch_attachment(&self, hash: &str) -> Result<Vec<u8>> {
        self.checked(self.api.attachment(hash).await).await
    }

    /// Apply one push-channel event and carry out its follow-up work
    pub async fn handle_live(&self, event: LiveEvent) -> Result<()> {
        match event {
            LiveEvent::Connected { resumed } => {
                self.state.set_connected(true, None).await;
                if resumed {
                    tracing::info!("Live updates resumed, reloading active chat");
                    self.reload_active().await?;
                }
            }
            LiveEvent::Disconnected => {
                self.state
                    .set_connected(false, Some("live updates disconnected".to_string()))
                    .await;
            }
            LiveEvent::Error(message) => {
                tracing::warn!("Ignoring live update error: {}", message);
            }
            LiveEvent::Server(event) => {
                tracing::debug!("Live event for chat {}", event.chat_id());
                let effect = {
                    let mut state = self.state.write().await;
                    apply_event(&mut state, event)
                };
                match effect {
                    DispatchEffect::None => {}
                    DispatchEffect::ResolveSender(user_id) => self.resolve_sender(user_id).await?,
                    DispatchEffect::SwitchChat(chat_id) => self.open_chat(chat_id).await?,
                    DispatchEffect::ShowEmpty => tracing::info!("No chats left"),
                }
            }
        }
        Ok(())
    }

    async fn resolve_sender(&self, user_id: UserId) -> Result<()> {
        let user = self.checked(self.api.get_user(user_id).await).await?;
        let mut state = self.state.write().await;
        state.cache_user(user.id, &user.username);
        if let Some(active) = state.active.as_mut() {
            active.timeline.set_sender_name(user.id, &user.username);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Backoff;
    use crate::testing::MockApi;
    use murmur_protocol::{
        ChatMemberLeftEvent, ChatSummary, MessageData, MessagePage, NewMessageEvent, ServerEvent,
        UserData,
    };
    use std::time::Duration;

    const TS: i64 = 1_700_000_000;

    fn user(id: UserId, name: &str) -> UserData {
        UserData {
            id,
            username: name.to_string(),
            register_ts: 0,
        }
    }

    fn message(chat_id: ChatId, id: MessageId, sender: UserId) -> MessageData {
        MessageData {
            chat_id,
            id,
            ts: TS,
            text: format!("m{}", id),
            sender_id: sender,
            sender_username: Some(format!("user{}", sender)),
            attachments: None,
        }
    }

    fn chat_info(id: ChatId, name: &str, ids: &[MessageId]) -> ChatInfo {
        ChatInfo {
            id,
            owner_id: 1,
            name: name.to_string(),
            create_ts: 0,
            last_message_ts: TS,
            members_count: 2,
            messages_count: ids.len() as i64,
            messages: MessagePage {
                offset: 0,
                count: ids.len() as i64,
                items: ids.iter().rev().map(|&mid| message(id, mid, 1)).collect(),
            },
            members: Vec::new(),
        }
    }

    fn api() -> Arc<MockApi> {
        let api = Arc::new(MockApi::new());
        api.set_me(user(1, "alice_one"));
        api.set_chats(vec![
            ChatSummary {
                id: 1,
                name: "general".to_string(),
                last_message_ts: TS - 100,
            },
            ChatSummary {
                id: 2,
                name: "random".to_string(),
                last_message_ts: TS,
            },
        ]);
        api.add_chat_info(chat_info(1, "general", &[10, 11, 12]));
        api.add_chat_info(chat_info(2, "random", &[3, 4]));
        api
    }

    fn config() -> ClientConfig {
        ClientConfig {
            reveal_delay_ms: 0,
            ..Default::default()
        }
    }

    async fn session(api: Arc<MockApi>) -> ChatSession {
        let (session, _outcomes) = ChatSession::new(api, &config());
        session.bootstrap("key".to_string()).await.unwrap();
        session
    }

    fn new_message(chat_id: ChatId, id: MessageId, sender: UserId) -> LiveEvent {
        LiveEvent::Server(ServerEvent::NewMessage(NewMessageEvent {
            chat_id,
            message_id: id,
            sender_id: sender,
            text: "hi".to_string(),
            ts: TS + 1,
            attachments: None,
        }))
    }

    #[tokio::test]
    async fn test_bootstrap_opens_most_recent_chat() {
        let session = session(api()).await;
        let state = session.state().read().await;

        assert_eq!(state.current_user_id(), Some(1));
        assert_eq!(state.access_key.as_deref(), Some("key"));
        assert_eq!(state.chats.iter().map(|c| c.id).collect::<Vec<_>>(), vec![2, 1]);
        let active = state.active.as_ref().unwrap();
        assert_eq!(active.chat_id, 2);
        assert_eq!(active.timeline.message_ids(), vec![3, 4]);
    }

    #[tokio::test]
    async fn test_reopening_active_chat_keeps_timeline() {
        let session = session(api()).await;
        session.handle_live(new_message(2, 5, 1)).await.unwrap();

        session.open_chat(2).await.unwrap();
        let state = session.state().read().await;
        assert_eq!(
            state.active.as_ref().unwrap().timeline.message_ids(),
            vec![3, 4, 5]
        );
    }

    #[tokio::test]
    async fn test_unknown_sender_is_resolved() {
        let api = api();
        api.add_user(user(7, "stranger"));
        let session = session(api.clone()).await;

        session.handle_live(new_message(2, 5, 7)).await.unwrap();

        assert_eq!(api.user_lookups(), vec![7]);
        let state = session.state().read().await;
        let timeline = &state.active.as_ref().unwrap().timeline;
        let last = timeline.stretches().last().unwrap();
        assert_eq!(last.sender_id(), 7);
        assert_eq!(last.sender_name(), Some("stranger"));
        assert_eq!(state.cached_user(7), Some("stranger"));
    }

    #[tokio::test]
    async fn test_leaving_via_push_switches_chat() {
        let session = session(api()).await;
        session
            .handle_live(LiveEvent::Server(ServerEvent::ChatMemberLeft(
                ChatMemberLeftEvent {
                    chat_id: 2,
                    user_id: 1,
                },
            )))
            .await
            .unwrap();

        let state = session.state().read().await;
        assert_eq!(state.active_chat_id(), Some(1));
        assert_eq!(state.chats.len(), 1);
    }

    #[tokio::test]
    async fn test_leave_chat_calls_server_and_switches() {
        let api = api();
        let session = session(api.clone()).await;
        session.leave_chat(2).await.unwrap();

        assert_eq!(api.left_chats(), vec![2]);
        assert_eq!(session.state().active_chat_id().await, Some(1));

        session.leave_chat(1).await.unwrap();
        let state = session.state().read().await;
        assert!(state.active.is_none());
        assert!(state.chats.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_key_signs_out() {
        let api = api();
        let session = session(api.clone()).await;
        api.invalidate_key();

        let result = session.open_chat(1).await;
        assert!(matches!(result, Err(ClientError::InvalidAccessKey)));
        assert!(!session.state().is_authenticated().await);
        assert!(session.state().read().await.active.is_none());
    }

    #[tokio::test]
    async fn test_enter_chat_validates_before_calling() {
        let session = session(api()).await;
        let result = session.enter_chat("bad name!", "pw").await;
        assert!(matches!(result, Err(ClientError::Validation(_))));

        let chat_id = session.enter_chat("general", "secret").await.unwrap();
        assert_eq!(chat_id, 1);
        assert_eq!(session.state().active_chat_id().await, Some(1));
    }

    #[tokio::test]
    async fn test_create_chat_adds_to_top() {
        let session = session(api()).await;
        let chat_id = session.create_chat("new_room", "").await.unwrap();

        let state = session.state().read().await;
        assert_eq!(state.chats[0].id, chat_id);
        assert_eq!(state.active_chat_id(), Some(chat_id));
        assert!(state.active.as_ref().unwrap().timeline.is_empty());
    }

    #[tokio::test]
    async fn test_joined_chats_are_subscribed() {
        let api = api();
        let (mut session, _outcomes) = ChatSession::new(api, &config());
        session.bootstrap("key".to_string()).await.unwrap();

        // Nothing listens on the discard port; the handle still tracks chats
        let (live, _events) = LiveUpdates::spawn(
            "ws://127.0.0.1:9/liveUpdates",
            "key",
            Backoff {
                initial: Duration::from_secs(60),
                max: Duration::from_secs(60),
            },
        );
        session.attach_live(live).await;
        session.create_chat("new_room", "").await.unwrap();

        assert_eq!(session.subscriptions(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_send_requires_active_chat() {
        let api = api();
        api.set_chats(Vec::new());
        let session = session(api).await;

        let result = session.send("hello", Vec::new()).await;
        assert!(matches!(result, Err(ClientError::NoActiveChat)));
    }

    #[tokio::test]
    async fn test_send_reports_outcome() {
        let api = api();
        let (session, mut outcomes) = ChatSession::new(api.clone(), &config());
        session.bootstrap("key".to_string()).await.unwrap();

        session.send("  hello  ", Vec::new()).await.unwrap();
        assert!(matches!(
            outcomes.recv().await.unwrap(),
            SendOutcome::Sent { chat_id: 2, .. }
        ));
        assert_eq!(api.sent_texts(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_delete_goes_to_active_chat() {
        let api = api();
        let session = session(api.clone()).await;
        session.delete_messages(vec![3]).await.unwrap();
        assert_eq!(api.deleted(), vec![(2, vec![3])]);

        // The view waits for the push event
        let state = session.state().read().await;
        assert_eq!(state.active.as_ref().unwrap().timeline.len(), 2);
    }

    #[tokio::test]
    async fn test_first_scroll_near_top_after_open_loads_history() {
        let api = api();
        let session = session(api.clone()).await;
        session.open_chat(1).await.unwrap();
        api.set_history(vec![message(1, 9, 2), message(1, 8, 2)]);

        // The first scroll after opening already counts as moving up
        assert_eq!(session.on_scroll(150.0).await, Some(LoadOutcome::Loaded(2)));
        assert_eq!(session.on_scroll(170.0).await, None);

        let state = session.state().read().await;
        assert_eq!(
            state.active.as_ref().unwrap().timeline.message_ids(),
            vec![8, 9, 10, 11, 12]
        );
        assert_eq!(api.message_requests()[0].offset, 3);
    }

    #[tokio::test]
    async fn test_resume_reloads_active_chat() {
        let api = api();
        let session = session(api.clone()).await;
        api.add_chat_info(chat_info(2, "random", &[3, 4, 5, 6]));

        session
            .handle_live(LiveEvent::Connected { resumed: false })
            .await
            .unwrap();
        assert_eq!(session.state().read().await.active.as_ref().unwrap().timeline.len(), 2);

        session.handle_live(LiveEvent::Disconnected).await.unwrap();
        assert!(!session.state().read().await.is_connected);

        session
            .handle_live(LiveEvent::Connected { resumed: true })
            .await
            .unwrap();
        let state = session.state().read().await;
        assert!(state.is_connected);
        assert_eq!(
            state.active.as_ref().unwrap().timeline.message_ids(),
            vec![3, 4, 5, 6]
        );
    }

    #[tokio::test]
    async fn test_latest_open_wins_over_slow_open() {
        let api = api();
        let session = Arc::new(session(api.clone()).await);
        assert_eq!(session.state().active_chat_id().await, Some(2));
        api.set_latency(Duration::from_millis(50));

        let slow = {
            let session = session.clone();
            tokio::spawn(async move { session.open_chat(1).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Going back to the chat already shown supersedes the slow request
        session.open_chat(2).await.unwrap();
        slow.await.unwrap().unwrap();
        assert_eq!(session.state().active_chat_id().await, Some(2));
    }

    #[tokio::test]
    async fn test_overlapping_opens_show_the_last_one() {
        let api = api();
        api.add_chat_info(chat_info(3, "third", &[7]));
        let session = Arc::new(session(api.clone()).await);
        api.set_latency(Duration::from_millis(30));

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.open_chat(1).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        session.open_chat(3).await.unwrap();
        first.await.unwrap().unwrap();

        let state = session.state().read().await;
        assert_eq!(state.active_chat_id(), Some(3));
        assert_eq!(state.active.as_ref().unwrap().timeline.message_ids(), vec![7]);
    }

    #[tokio::test]
    async fn test_status_counters() {
        let api = api();
        api.set_send_latency("slow", Duration::from_millis(30));
        let (session, mut outcomes) = ChatSession::new(api, &config());
        session.bootstrap("key".to_string()).await.unwrap();

        assert!(!session.is_loading_history());
        session.send("slow", Vec::new()).await.unwrap();
        assert_eq!(session.pending_sends(), 1);
        outcomes.recv().await.unwrap();
        assert_eq!(session.pending_sends(), 0);
    }

    #[tokio::test]
    async fn test_attachment_bytes() {
        let session = session(api()).await;
        let bytes = session.fetch_attachment("abc").await.unwrap();
        assert_eq!(bytes, b"abc".to_vec());
    }
}
