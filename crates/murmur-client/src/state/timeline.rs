//! Message timeline of the active chat.
//!
//! Messages are grouped into stretches: runs of consecutive messages from the
//! same sender on the same calendar day. The timeline is the only place where
//! the ordered view of a chat is mutated; live updates, history pages and
//! deletions all go through [`Timeline::push`] and [`Timeline::remove`].

use chrono::{Local, NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use std::collections::VecDeque;

use murmur_protocol::{AttachmentRef, ChatId, MessageData, MessageId, NewMessageEvent, UserId};

/// How a message timestamp is mapped to a calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayBoundary {
    #[default]
    Utc,
    /// The timezone of the machine running the client
    Local,
}

impl DayBoundary {
    pub fn day_of(&self, ts: i64) -> NaiveDate {
        let utc = Utc.timestamp_opt(ts, 0).single().unwrap_or_default();
        match self {
            DayBoundary::Utc => utc.date_naive(),
            DayBoundary::Local => utc.with_timezone(&Local).date_naive(),
        }
    }
}

/// Which end of the timeline a message is added to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Newest end, used by live updates
    Append,
    /// Oldest end, used by history pages
    Prepend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub sender_name: Option<String>,
    pub text: String,
    pub attachments: Vec<AttachmentRef>,
    /// Seconds since epoch, UTC
    pub ts: i64,
}

impl From<MessageData> for Message {
    fn from(data: MessageData) -> Self {
        Self {
            id: data.id,
            chat_id: data.chat_id,
            sender_id: data.sender_id,
            sender_name: data.sender_username,
            text: data.text,
            attachments: data.attachments.unwrap_or_default(),
            ts: data.ts,
        }
    }
}

impl From<NewMessageEvent> for Message {
    fn from(event: NewMessageEvent) -> Self {
        Self {
            id: event.message_id,
            chat_id: event.chat_id,
            sender_id: event.sender_id,
            sender_name: None,
            text: event.text,
            attachments: event.attachments.unwrap_or_default(),
            ts: event.ts,
        }
    }
}

pub type StretchId = u64;

/// Timestamp label shown next to a stretch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StretchLabel {
    Single(i64),
    Span { first: i64, last: i64 },
}

#[derive(Debug, Clone)]
pub struct Stretch {
    id: StretchId,
    sender_id: UserId,
    sender_name: Option<String>,
    day: NaiveDate,
    messages: VecDeque<Message>,
}

impl Stretch {
    fn new(id: StretchId, day: NaiveDate, message: Message) -> Self {
        Self {
            id,
            sender_id: message.sender_id,
            sender_name: message.sender_name.clone(),
            day,
            messages: VecDeque::from([message]),
        }
    }

    pub fn id(&self) -> StretchId {
        self.id
    }

    pub fn sender_id(&self) -> UserId {
        self.sender_id
    }

    pub fn sender_name(&self) -> Option<&str> {
        self.sender_name.as_deref()
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn message_ids(&self) -> Vec<MessageId> {
        self.messages.iter().map(|m| m.id).collect()
    }

    pub fn label(&self) -> StretchLabel {
        match (self.messages.front(), self.messages.back()) {
            (Some(first), Some(last)) if self.messages.len() > 1 => StretchLabel::Span {
                first: first.ts,
                last: last.ts,
            },
            (Some(only), _) => StretchLabel::Single(only.ts),
            _ => StretchLabel::Single(0),
        }
    }

    fn accepts(&self, message: &Message, day: NaiveDate) -> bool {
        self.sender_id == message.sender_id && self.day == day
    }

    fn adopt_name(&mut self, message: &Message) {
        if self.sender_name.is_none() {
            self.sender_name = message.sender_name.clone();
        }
    }
}

/// What a reconciler call did to the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineChange {
    /// A new boundary stretch holding exactly one message
    Created { stretch: StretchId, direction: Direction },
    /// A message joined an existing stretch. `became_span` is set when the
    /// stretch went from one message to two.
    Extended { stretch: StretchId, became_span: bool },
    /// A message left a stretch. `collapsed` is set when one message remains.
    Shrunk { stretch: StretchId, collapsed: bool },
    /// The last message of a stretch was removed, and the stretch with it
    Removed { stretch: StretchId },
    /// An out-of-order message was merged and the stretches were rebuilt
    Regrouped,
    /// The message id is already present
    Duplicate,
    /// The message belongs to another chat
    Ignored,
}

#[derive(Debug, Clone)]
pub struct Timeline {
    chat_id: ChatId,
    day_boundary: DayBoundary,
    stretches: VecDeque<Stretch>,
    next_stretch_id: StretchId,
    message_count: usize,
}

impl Timeline {
    pub fn new(chat_id: ChatId, day_boundary: DayBoundary) -> Self {
        Self {
            chat_id,
            day_boundary,
            stretches: VecDeque::new(),
            next_stretch_id: 1,
            message_count: 0,
        }
    }

    /// Build the initial view from a page of messages. The server sends pages
    /// newest first; any order is accepted.
    pub fn from_page(
        chat_id: ChatId,
        day_boundary: DayBoundary,
        items: impl IntoIterator<Item = MessageData>,
    ) -> Self {
        let mut messages: Vec<Message> = items.into_iter().map(Message::from).collect();
        messages.sort_by_key(|m| m.id);

        let mut timeline = Self::new(chat_id, day_boundary);
        for message in messages {
            timeline.push(message, Direction::Append);
        }
        timeline
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn stretches(&self) -> impl Iterator<Item = &Stretch> {
        self.stretches.iter()
    }

    pub fn stretch_count(&self) -> usize {
        self.stretches.len()
    }

    /// Number of messages in the view
    pub fn len(&self) -> usize {
        self.message_count
    }

    pub fn is_empty(&self) -> bool {
        self.message_count == 0
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.stretches.iter().flat_map(|s| s.messages.iter())
    }

    pub fn message_ids(&self) -> Vec<MessageId> {
        self.messages().map(|m| m.id).collect()
    }

    pub fn oldest_id(&self) -> Option<MessageId> {
        self.stretches
            .front()
            .and_then(|s| s.messages.front())
            .map(|m| m.id)
    }

    pub fn newest_id(&self) -> Option<MessageId> {
        self.stretches
            .back()
            .and_then(|s| s.messages.back())
            .map(|m| m.id)
    }

    /// True once the first message of the chat is loaded
    pub fn reached_start(&self) -> bool {
        self.oldest_id() == Some(1)
    }

    pub fn contains(&self, id: MessageId) -> bool {
        self.locate(id).is_some()
    }

    fn locate(&self, id: MessageId) -> Option<(usize, usize)> {
        self.stretches.iter().enumerate().find_map(|(si, stretch)| {
            stretch
                .messages
                .iter()
                .position(|m| m.id == id)
                .map(|mi| (si, mi))
        })
    }

    fn allocate_stretch_id(&mut self) -> StretchId {
        let id = self.next_stretch_id;
        self.next_stretch_id += 1;
        id
    }

    /// Add a message at the given end of the timeline.
    pub fn push(&mut self, message: Message, direction: Direction) -> TimelineChange {
        if message.chat_id != self.chat_id {
            tracing::debug!(
                "Ignoring message {} for chat {} in timeline of chat {}",
                message.id,
                message.chat_id,
                self.chat_id
            );
            return TimelineChange::Ignored;
        }

        if self.contains(message.id) {
            return TimelineChange::Duplicate;
        }

        let out_of_order = match direction {
            Direction::Append => self.newest_id().is_some_and(|newest| message.id < newest),
            Direction::Prepend => self.oldest_id().is_some_and(|oldest| message.id > oldest),
        };
        if out_of_order {
            return self.insert_ordered(message);
        }

        let day = self.day_boundary.day_of(message.ts);
        self.message_count += 1;

        let boundary = match direction {
            Direction::Append => self.stretches.back_mut(),
            Direction::Prepend => self.stretches.front_mut(),
        };

        if let Some(stretch) = boundary.filter(|s| s.accepts(&message, day)) {
            stretch.adopt_name(&message);
            match direction {
                Direction::Append => stretch.messages.push_back(message),
                Direction::Prepend => stretch.messages.push_front(message),
            }
            return TimelineChange::Extended {
                stretch: stretch.id,
                became_span: stretch.messages.len() == 2,
            };
        }

        let id = self.allocate_stretch_id();
        let stretch = Stretch::new(id, day, message);
        match direction {
            Direction::Append => self.stretches.push_back(stretch),
            Direction::Prepend => self.stretches.push_front(stretch),
        }
        TimelineChange::Created {
            stretch: id,
            direction,
        }
    }

    /// Merge a message that does not belong at either end and regroup.
    fn insert_ordered(&mut self, message: Message) -> TimelineChange {
        tracing::debug!(
            "Message {} arrived out of order in chat {}, regrouping",
            message.id,
            self.chat_id
        );

        let mut messages: Vec<Message> = self
            .stretches
            .drain(..)
            .flat_map(|s| s.messages.into_iter())
            .collect();
        let position = messages.partition_point(|m| m.id < message.id);
        messages.insert(position, message);

        self.message_count = 0;
        for message in messages {
            self.push(message, Direction::Append);
        }
        TimelineChange::Regrouped
    }

    /// Remove messages by id. Ids not in the view are skipped.
    pub fn remove(&mut self, chat_id: ChatId, ids: &[MessageId]) -> Vec<TimelineChange> {
        if chat_id != self.chat_id {
            return Vec::new();
        }

        let mut changes = Vec::new();
        for &id in ids {
            let Some((si, mi)) = self.locate(id) else {
                continue;
            };
            self.message_count -= 1;

            let stretch = &mut self.stretches[si];
            if stretch.messages.len() == 1 {
                let stretch_id = stretch.id;
                self.stretches.remove(si);
                changes.push(TimelineChange::Removed { stretch: stretch_id });
            } else {
                stretch.messages.remove(mi);
                changes.push(TimelineChange::Shrunk {
                    stretch: stretch.id,
                    collapsed: stretch.messages.len() == 1,
                });
            }
        }
        changes
    }

    /// Fill in a sender name resolved after the messages were added.
    /// Returns the number of stretches updated.
    pub fn set_sender_name(&mut self, user_id: UserId, name: &str) -> usize {
        let mut updated = 0;
        for stretch in self.stretches.iter_mut().filter(|s| s.sender_id == user_id) {
            stretch.sender_name = Some(name.to_string());
            for message in stretch.messages.iter_mut() {
                message.sender_name = Some(name.to_string());
            }
            updated += 1;
        }
        updated
    }
}
