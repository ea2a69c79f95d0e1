use futures_util::{SinkExt, StreamExt};
use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use murmur_protocol::{ChatId, ClientFrame, ServerEvent, ServerFrame};

/// What the push channel reports to its consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiveEvent {
    /// Connection established. `resumed` is set after a reconnect, when events
    /// may have been missed.
    Connected { resumed: bool },
    Disconnected,
    Server(ServerEvent),
    /// `{error}` frame or a frame that could not be decoded
    Error(String),
}

/// Reconnect delays, doubling from `initial` up to `max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Backoff {
    pub fn next(&self, current: Duration) -> Duration {
        (current * 2).min(self.max)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

enum Command {
    Subscribe,
}

/// Handle to the push channel task.
///
/// Subscriptions accumulate for the lifetime of the handle and are replayed on
/// every reconnect. Dropping the handle stops the task.
pub struct LiveUpdates {
    commands: mpsc::UnboundedSender<Command>,
    subscriptions: Arc<Mutex<BTreeSet<ChatId>>>,
}

impl LiveUpdates {
    pub fn spawn(
        url: &str,
        access_key: &str,
        backoff: Backoff,
    ) -> (Self, mpsc::Receiver<LiveEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(256);
        let subscriptions = Arc::new(Mutex::new(BTreeSet::new()));

        tokio::spawn(run(
            url.to_string(),
            access_key.to_string(),
            backoff,
            subscriptions.clone(),
            command_rx,
            event_tx,
        ));

        (
            Self {
                commands: command_tx,
                subscriptions,
            },
            event_rx,
        )
    }

    pub fn subscribe(&self, chats: &[ChatId]) {
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.extend(chats.iter().copied());
        }
        let _ = self.commands.send(Command::Subscribe);
    }

    pub fn subscriptions(&self) -> Vec<ChatId> {
        self.subscriptions
            .lock()
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }
}

fn pending_subscriptions(
    subscriptions: &Mutex<BTreeSet<ChatId>>,
    sent: &HashSet<ChatId>,
) -> Vec<ChatId> {
    subscriptions
        .lock()
        .map(|s| s.iter().copied().filter(|id| !sent.contains(id)).collect())
        .unwrap_or_default()
}

fn decode_frame(text: &str) -> LiveEvent {
    match ServerFrame::parse(text) {
        Ok(ServerFrame::Event(event)) => LiveEvent::Server(event),
        Ok(ServerFrame::Error(message)) => LiveEvent::Error(message),
        Err(e) => LiveEvent::Error(format!("undecodable frame: {}", e)),
    }
}

async fn run(
    url: String,
    access_key: String,
    backoff: Backoff,
    subscriptions: Arc<Mutex<BTreeSet<ChatId>>>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::Sender<LiveEvent>,
) {
    let mut delay = backoff.initial;
    let mut connected_before = false;

    loop {
        match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                delay = backoff.initial;
                tracing::info!("Live updates connected to {}", url);

                if events
                    .send(LiveEvent::Connected {
                        resumed: connected_before,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
                connected_before = true;

                let (mut write, mut read) = ws_stream.split();
                // The server keeps subscriptions per socket, so each connection
                // starts with nothing sent.
                let mut sent: HashSet<ChatId> = HashSet::new();
                let mut sync = true;

                loop {
                    if sync {
                        sync = false;
                        let chats = pending_subscriptions(&subscriptions, &sent);
                        if !chats.is_empty() {
                            let frame = ClientFrame::subscribe(access_key.as_str(), chats.clone());
                            let json = match serde_json::to_string(&frame) {
                                Ok(j) => j,
                                Err(e) => {
                                    tracing::error!("Failed to serialize subscribe frame: {}", e);
                                    continue;
                                }
                            };
                            if let Err(e) = write.send(Message::Text(json.into())).await {
                                tracing::warn!("Failed to send subscribe frame: {}", e);
                                break;
                            }
                            tracing::debug!("Subscribed to chats {:?}", chats);
                            sent.extend(chats);
                        }
                    }

                    tokio::select! {
                        command = commands.recv() => match command {
                            Some(Command::Subscribe) => sync = true,
                            None => {
                                tracing::debug!("Live updates handle dropped, closing");
                                let _ = write.close().await;
                                return;
                            }
                        },
                        incoming = read.next() => match incoming {
                            Some(Ok(Message::Text(text))) => {
                                let event = decode_frame(&text);
                                if let LiveEvent::Error(message) = &event {
                                    tracing::warn!("Live updates error: {}", message);
                                }
                                if events.send(event).await.is_err() {
                                    return;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::info!("Live updates closed by server");
                                break;
                            }
                            Some(Err(e)) => {
                                tracing::error!("Live updates error: {}", e);
                                break;
                            }
                            // Pong is handled automatically by tungstenite
                            Some(Ok(_)) => {}
                        },
                    }
                }

                if events.send(LiveEvent::Disconnected).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!("Live updates connection failed (retry in {:?}): {}", delay, e);
            }
        }

        if events.is_closed() || commands.is_closed() {
            return;
        }
        tokio::time::sleep(delay).await;
        delay = backoff.next(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(2),
        };
        let mut delay = backoff.initial;
        let mut seen = Vec::new();
        for _ in 0..4 {
            delay = backoff.next(delay);
            seen.push(delay);
        }
        assert_eq!(
            seen,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(2),
                Duration::from_secs(2),
            ]
        );
    }

    #[test]
    fn test_pending_subscriptions_skip_sent() {
        let subscriptions = Mutex::new(BTreeSet::from([1, 2, 3]));
        let sent = HashSet::from([2]);
        assert_eq!(pending_subscriptions(&subscriptions, &sent), vec![1, 3]);
    }

    #[test]
    fn test_decode_frame_maps_errors() {
        assert_eq!(
            decode_frame(r#"{"error":"Access denied"}"#),
            LiveEvent::Error("Access denied".to_string())
        );
        assert!(matches!(decode_frame("{"), LiveEvent::Error(_)));
        assert!(matches!(
            decode_frame(r#"{"event":"chatMemberLeft","eventData":{"chatId":1,"userId":2}}"#),
            LiveEvent::Server(ServerEvent::ChatMemberLeft(_))
        ));
    }
}
