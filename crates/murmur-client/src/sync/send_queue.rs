//! Outgoing message queue.
//!
//! A single worker drains the queue, so exactly one `/sendMessage` request is
//! outstanding at any time and sends complete in submission order.

use base64::{Engine, engine::general_purpose::STANDARD};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

use murmur_protocol::{ChatId, MessageId, OutgoingAttachment, SendMessageRequest};

use crate::error::{ClientError, Result};
use crate::network::ChatApi;

/// Longest message body accepted by the composer, in characters
pub const MAX_MESSAGE_LEN: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub chat_id: ChatId,
    pub text: String,
    pub attachments: Vec<OutgoingAttachment>,
}

impl SendRequest {
    /// Trim and cap the text; reject requests with nothing to send
    pub fn new(chat_id: ChatId, text: &str, attachments: Vec<OutgoingAttachment>) -> Result<Self> {
        let text: String = text.trim().chars().take(MAX_MESSAGE_LEN).collect();
        if text.is_empty() && attachments.is_empty() {
            return Err(ClientError::Validation("message is empty".to_string()));
        }
        Ok(Self {
            chat_id,
            text,
            attachments,
        })
    }
}

/// Image types accepted as attachments, by file extension
fn image_content_type(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Read an image file into a base64 attachment
pub async fn read_attachment(path: &Path) -> Result<OutgoingAttachment> {
    let content_type = image_content_type(path).ok_or_else(|| {
        ClientError::Validation(format!("{} is not a supported image", path.display()))
    })?;
    let bytes = tokio::fs::read(path).await?;
    tracing::debug!("Attaching {} ({} bytes)", path.display(), bytes.len());

    Ok(OutgoingAttachment {
        content_type: content_type.to_string(),
        data: STANDARD.encode(&bytes),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { chat_id: ChatId, message_id: MessageId },
    Failed { chat_id: ChatId, error: String },
}

pub struct SendQueue {
    sender: mpsc::UnboundedSender<SendRequest>,
    pending: Arc<AtomicUsize>,
}

impl SendQueue {
    /// Start the worker. Outcomes are reported on the returned receiver,
    /// which may be dropped if nobody cares.
    pub fn spawn(api: Arc<dyn ChatApi>) -> (Self, mpsc::UnboundedReceiver<SendOutcome>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<SendRequest>();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));

        let pending_worker = pending.clone();
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let chat_id = request.chat_id;
                let outcome = match api
                    .send_message(SendMessageRequest {
                        chat_id: request.chat_id,
                        text: request.text,
                        attachments: request.attachments,
                    })
                    .await
                {
                    Ok(message_id) => {
                        tracing::debug!("Sent message {} to chat {}", message_id, chat_id);
                        SendOutcome::Sent {
                            chat_id,
                            message_id,
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Error sending message to chat {}: {}", chat_id, e);
                        SendOutcome::Failed {
                            chat_id,
                            error: e.to_string(),
                        }
                    }
                };
                pending_worker.fetch_sub(1, Ordering::AcqRel);
                let _ = outcome_tx.send(outcome);
            }
            tracing::debug!("Send queue closed");
        });

        (
            Self {
                sender: tx,
                pending,
            },
            outcome_rx,
        )
    }

    pub fn enqueue(&self, request: SendRequest) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.sender.send(request).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            return Err(ClientError::QueueClosed);
        }
        Ok(())
    }

    /// Sends queued or in flight
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}
