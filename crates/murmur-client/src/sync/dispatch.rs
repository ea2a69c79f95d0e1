//! Applies push-channel events to the client state.

use murmur_protocol::{ChatId, ServerEvent, UserId};

use crate::state::{AppStateInner, Direction, Message};

/// Follow-up work an event leaves for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchEffect {
    None,
    /// A message from a sender whose name is not cached was shown
    ResolveSender(UserId),
    /// The local user left the open chat; open this one instead
    SwitchChat(ChatId),
    /// The local user left the open chat and no chats remain
    ShowEmpty,
}

pub fn apply_event(state: &mut AppStateInner, event: ServerEvent) -> DispatchEffect {
    match event {
        ServerEvent::NewMessage(event) => {
            let chat_id = event.chat_id;
            let sender_id = event.sender_id;
            state.touch_chat(chat_id, event.ts);

            let cached = state.cached_user(sender_id).map(str::to_string);
            let Some(active) = state.active.as_mut().filter(|a| a.chat_id == chat_id) else {
                tracing::debug!("New message in background chat {}", chat_id);
                return DispatchEffect::None;
            };

            let mut message = Message::from(event);
            let resolved = cached.is_some();
            message.sender_name = cached;
            active.timeline.push(message, Direction::Append);

            if resolved {
                DispatchEffect::None
            } else {
                DispatchEffect::ResolveSender(sender_id)
            }
        }
        ServerEvent::MessagesDeleted(event) => {
            if let Some(active) = state
                .active
                .as_mut()
                .filter(|a| a.chat_id == event.chat_id)
            {
                let changes = active
                    .timeline
                    .remove(event.chat_id, &event.deleted_message_ids);
                tracing::debug!(
                    "Removed {} of {} messages from chat {}",
                    changes.len(),
                    event.deleted_message_ids.len(),
                    event.chat_id
                );
            }
            DispatchEffect::None
        }
        ServerEvent::ChatMemberLeft(event) => {
            if state.current_user_id() == Some(event.user_id) {
                tracing::info!("Left chat {}", event.chat_id);
                state.remove_chat(event.chat_id);

                if state.active_chat_id() != Some(event.chat_id) {
                    return DispatchEffect::None;
                }
                state.close_active();
                return match state.chats.first() {
                    Some(next) => DispatchEffect::SwitchChat(next.id),
                    None => DispatchEffect::ShowEmpty,
                };
            }

            if let Some(active) = state
                .active
                .as_mut()
                .filter(|a| a.chat_id == event.chat_id)
            {
                active.members_count = (active.members_count - 1).max(0);
            }
            DispatchEffect::None
        }
    }
}
