//! History backfill for the active chat.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use murmur_protocol::{ChatId, MessagesQuery};

use crate::network::ChatApi;
use crate::state::{AppState, Direction, Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Another load is in flight; nothing was requested
    Busy,
    /// The first message of the chat is already loaded
    AtStart,
    /// No chat is open
    NoChat,
    Loaded(usize),
    Empty,
    Failed,
    /// The active chat changed while the page was in flight
    Stale,
}

/// Parameters of one history page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub chat_id: ChatId,
    /// Number of messages already loaded
    pub offset: usize,
    pub count: usize,
    pub with_usernames: bool,
}

struct FlightGuard<'a>(&'a AtomicBool);

impl<'a> FlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard(flag))
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Loads older messages into the head of the active timeline. At most one
/// page is in flight; overlapping calls are dropped, not queued.
pub struct PaginationLoader {
    loading: AtomicBool,
    page_size: usize,
    reveal_delay: Duration,
}

impl PaginationLoader {
    pub fn new(page_size: usize, reveal_delay: Duration) -> Self {
        Self {
            loading: AtomicBool::new(false),
            page_size: page_size.max(1),
            reveal_delay,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Request the page preceding the oldest loaded message of the active chat
    pub async fn load_older(&self, api: &dyn ChatApi, state: &AppState) -> LoadOutcome {
        let request = {
            let s = state.read().await;
            let Some(active) = s.active.as_ref() else {
                return LoadOutcome::NoChat;
            };
            if active.timeline.reached_start() {
                return LoadOutcome::AtStart;
            }
            PageRequest {
                chat_id: active.chat_id,
                offset: active.timeline.len(),
                count: self.page_size,
                with_usernames: true,
            }
        };
        self.load(api, state, request).await
    }

    /// Fetch one page and prepend it to the timeline, newest to oldest
    pub async fn load(&self, api: &dyn ChatApi, state: &AppState, request: PageRequest) -> LoadOutcome {
        let Some(_guard) = FlightGuard::acquire(&self.loading) else {
            tracing::debug!("History load already in flight, skipping");
            return LoadOutcome::Busy;
        };

        let epoch = {
            let s = state.read().await;
            match s.active.as_ref() {
                Some(active) if active.chat_id == request.chat_id => active.epoch,
                _ => return LoadOutcome::Stale,
            }
        };

        let query = MessagesQuery {
            chat_id: request.chat_id,
            offset: request.offset,
            messages_count: request.count,
            with_usernames: request.with_usernames,
        };
        let mut messages = match api.get_messages(query).await {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!("Failed to load history of chat {}: {}", request.chat_id, e);
                return LoadOutcome::Failed;
            }
        };

        if messages.is_empty() {
            tracing::debug!("No older messages in chat {}", request.chat_id);
            return LoadOutcome::Empty;
        }

        messages.sort_by(|a, b| b.id.cmp(&a.id));

        let mut loaded = 0;
        for (i, data) in messages.into_iter().enumerate() {
            if i > 0 && !self.reveal_delay.is_zero() {
                tokio::time::sleep(self.reveal_delay).await;
            }

            let mut s = state.write().await;
            if let Some(name) = &data.sender_username {
                s.users.entry(data.sender_id).or_insert_with(|| name.clone());
            }
            let cached = s.cached_user(data.sender_id).map(str::to_string);

            let Some(active) = s.active_at(request.chat_id, epoch) else {
                tracing::debug!(
                    "Chat {} closed during history load, dropping the rest of the page",
                    request.chat_id
                );
                return LoadOutcome::Stale;
            };

            let mut message = Message::from(data);
            if message.sender_name.is_none() {
                message.sender_name = cached;
            }
            active.timeline.push(message, Direction::Prepend);
            loaded += 1;
        }

        tracing::debug!("Loaded {} older messages in chat {}", loaded, request.chat_id);
        LoadOutcome::Loaded(loaded)
    }
}

/// Turns viewport scroll positions into history requests
#[derive(Debug, Clone)]
pub struct ScrollTrigger {
    threshold: f64,
    last_top: Option<f64>,
}

impl ScrollTrigger {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            last_top: None,
        }
    }

    /// Fires when the viewport is near the top and moving upward. A freshly
    /// opened chat sits at its newest message, so the first position seen
    /// after a reset counts as upward movement.
    pub fn on_scroll(&mut self, scroll_top: f64) -> bool {
        let moving_up = self.last_top.is_none_or(|last| scroll_top < last);
        self.last_top = Some(scroll_top);
        moving_up && scroll_top < self.threshold
    }

    /// Wheel events carry the direction directly
    pub fn on_wheel(&self, scroll_top: f64, delta_y: f64) -> bool {
        scroll_top < self.threshold && delta_y < 0.0
    }

    pub fn reset(&mut self) {
        self.last_top = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockApi;
    use murmur_protocol::{ChatInfo, MessageData, MessagePage};
    use std::sync::Arc;

    fn message(id: i64, sender: i64) -> MessageData {
        MessageData {
            chat_id: 1,
            id,
            ts: 1_700_000_000,
            text: format!("m{}", id),
            sender_id: sender,
            sender_username: Some(format!("user{}", sender)),
            attachments: None,
        }
    }

    fn chat(ids: std::ops::RangeInclusive<i64>) -> ChatInfo {
        ChatInfo {
            id: 1,
            owner_id: 1,
            name: "general".to_string(),
            create_ts: 0,
            last_message_ts: 0,
            members_count: 2,
            messages_count: 0,
            messages: MessagePage {
                offset: 0,
                count: 0,
                items: ids.rev().map(|id| message(id, 1)).collect(),
            },
            members: Vec::new(),
        }
    }

    async fn state_with_chat(ids: std::ops::RangeInclusive<i64>) -> AppState {
        let state = AppState::new();
        state.write().await.open_chat(chat(ids));
        state
    }

    #[tokio::test]
    async fn test_overlapping_loads_issue_one_request() {
        let api = Arc::new(MockApi::new());
        api.set_history((11..=30).rev().map(|id| message(id, 1)).collect());
        api.set_latency(Duration::from_millis(20));

        let state = state_with_chat(31..=40).await;
        let loader = PaginationLoader::new(20, Duration::ZERO);

        let (first, second) = tokio::join!(
            loader.load_older(api.as_ref(), &state),
            loader.load_older(api.as_ref(), &state)
        );

        assert_eq!(first, LoadOutcome::Loaded(20));
        assert_eq!(second, LoadOutcome::Busy);
        assert_eq!(api.message_requests().len(), 1);
        assert!(!loader.is_loading());
    }

    #[tokio::test]
    async fn test_page_is_prepended_in_order() {
        let api = MockApi::new();
        api.set_history(vec![message(8, 2), message(9, 2), message(7, 1)]);

        let state = state_with_chat(10..=12).await;
        let loader = PaginationLoader::new(20, Duration::ZERO);
        assert_eq!(loader.load_older(&api, &state).await, LoadOutcome::Loaded(3));

        let s = state.read().await;
        let timeline = &s.active.as_ref().unwrap().timeline;
        assert_eq!(timeline.message_ids(), vec![7, 8, 9, 10, 11, 12]);
        let senders: Vec<_> = timeline.stretches().map(|st| st.sender_id()).collect();
        assert_eq!(senders, vec![1, 2, 1]);

        let query = api.message_requests()[0];
        assert_eq!(query.offset, 3);
        assert!(query.with_usernames);
    }

    #[tokio::test]
    async fn test_failure_clears_flag_for_retry() {
        let api = MockApi::new();
        api.fail_history(true);

        let state = state_with_chat(10..=12).await;
        let loader = PaginationLoader::new(20, Duration::ZERO);
        assert_eq!(loader.load_older(&api, &state).await, LoadOutcome::Failed);
        assert!(!loader.is_loading());

        api.fail_history(false);
        assert_eq!(loader.load_older(&api, &state).await, LoadOutcome::Empty);
        assert_eq!(api.message_requests().len(), 2);
    }

    #[tokio::test]
    async fn test_no_request_once_history_starts() {
        let api = MockApi::new();
        let state = state_with_chat(1..=5).await;
        let loader = PaginationLoader::new(20, Duration::ZERO);

        assert_eq!(loader.load_older(&api, &state).await, LoadOutcome::AtStart);
        assert!(api.message_requests().is_empty());
    }

    #[tokio::test]
    async fn test_chat_switch_discards_page() {
        let api = Arc::new(MockApi::new());
        api.set_history((1..=9).rev().map(|id| message(id, 1)).collect());
        api.set_latency(Duration::from_millis(30));

        let state = state_with_chat(10..=12).await;
        let loader = Arc::new(PaginationLoader::new(20, Duration::ZERO));

        let task = {
            let (api, state, loader) = (api.clone(), state.clone(), loader.clone());
            tokio::spawn(async move { loader.load_older(api.as_ref(), &state).await })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        let mut other = chat(20..=21);
        other.id = 2;
        for item in other.messages.items.iter_mut() {
            item.chat_id = 2;
        }
        state.write().await.open_chat(other);

        assert_eq!(task.await.unwrap(), LoadOutcome::Stale);
        let s = state.read().await;
        assert_eq!(s.active.as_ref().unwrap().timeline.message_ids(), vec![20, 21]);
        assert!(!loader.is_loading());
    }

    #[test]
    fn test_scroll_trigger_fires_only_upward_near_top() {
        let mut trigger = ScrollTrigger::new(200.0);
        assert!(trigger.on_scroll(150.0));
        assert!(trigger.on_scroll(100.0));
        assert!(!trigger.on_scroll(120.0));
        assert!(!trigger.on_scroll(500.0));
        assert!(!trigger.on_scroll(300.0));
        assert!(trigger.on_scroll(199.0));

        trigger.reset();
        assert!(!trigger.on_scroll(250.0));
        assert!(trigger.on_scroll(180.0));

        assert!(trigger.on_wheel(10.0, -3.0));
        assert!(!trigger.on_wheel(10.0, 3.0));
        assert!(!trigger.on_wheel(250.0, -3.0));
    }
}
