mod api;
mod websocket;

pub use websocket::{Backoff, LiveEvent, LiveUpdates};

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use murmur_protocol::{
    AuthResponse, ChatCredentials, ChatEnvelope, ChatId, ChatInfo, ChatSummary, ChatsEnvelope,
    Credentials, DeleteMessagesRequest, LeaveChatRequest, MessageData, MessageId, MessagesEnvelope,
    MessagesQuery, RegisterResponse, SendMessageRequest, SendMessageResponse, SuccessResponse,
    UserData, UserEnvelope, UserId,
};

use crate::error::{ClientError, Result};

/// Authenticated chat endpoints.
///
/// Everything above the transport (session, history loader, send queue) talks
/// to the server through this trait.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn get_me(&self) -> Result<UserData>;

    async fn get_chats(&self) -> Result<Vec<ChatSummary>>;

    async fn get_chat(&self, chat_id: ChatId) -> Result<ChatInfo>;

    async fn get_user(&self, user_id: UserId) -> Result<UserData>;

    async fn get_messages(&self, query: MessagesQuery) -> Result<Vec<MessageData>>;

    async fn send_message(&self, request: SendMessageRequest) -> Result<MessageId>;

    async fn enter_chat(&self, credentials: ChatCredentials) -> Result<ChatInfo>;

    async fn create_chat(&self, credentials: ChatCredentials) -> Result<ChatInfo>;

    async fn leave_chat(&self, chat_id: ChatId) -> Result<()>;

    async fn delete_messages(&self, chat_id: ChatId, message_ids: Vec<MessageId>) -> Result<()>;

    async fn attachment(&self, hash: &str) -> Result<Vec<u8>>;
}

#[derive(Clone)]
pub struct NetworkClient {
    http: reqwest::Client,
    server_url: String,
    access_key: Arc<RwLock<Option<String>>>,
}

impl NetworkClient {
    pub fn new(server_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            server_url: server_url.trim_end_matches('/').to_string(),
            access_key: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn set_access_key(&self, access_key: Option<String>) {
        *self.access_key.write().await = access_key;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }

    async fn key(&self) -> Result<String> {
        self.access_key
            .read()
            .await
            .clone()
            .ok_or(ClientError::NotAuthenticated)
    }

    // Accounts

    pub async fn login(&self, username: &str, password: &str) -> Result<AuthResponse> {
        let request = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response: AuthResponse = api::post(&self.http, &self.url("/auth"), &request, None).await?;
        self.set_access_key(Some(response.access_key.clone())).await;
        Ok(response)
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<()> {
        let request = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response: RegisterResponse =
            api::post(&self.http, &self.url("/registerUser"), &request, None).await?;

        if !response.register_success {
            return Err(ClientError::Api {
                message: "registration was not confirmed".to_string(),
                code: None,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChatApi for NetworkClient {
    async fn get_me(&self) -> Result<UserData> {
        let key = self.key().await?;
        let envelope: UserEnvelope = api::get(&self.http, &self.url("/getMe"), Some(&key)).await?;
        Ok(envelope.user)
    }

    async fn get_chats(&self) -> Result<Vec<ChatSummary>> {
        let key = self.key().await?;
        let envelope: ChatsEnvelope =
            api::get(&self.http, &self.url("/getChats"), Some(&key)).await?;
        Ok(envelope.chats)
    }

    async fn get_chat(&self, chat_id: ChatId) -> Result<ChatInfo> {
        let key = self.key().await?;
        let url = self.url(&format!("/getChat?id={}", chat_id));
        let envelope: ChatEnvelope = api::get(&self.http, &url, Some(&key)).await?;
        Ok(envelope.chat)
    }

    async fn get_user(&self, user_id: UserId) -> Result<UserData> {
        let key = self.key().await?;
        let url = self.url(&format!("/getUser?id={}", user_id));
        let envelope: UserEnvelope = api::get(&self.http, &url, Some(&key)).await?;
        Ok(envelope.user)
    }

    async fn get_messages(&self, query: MessagesQuery) -> Result<Vec<MessageData>> {
        let key = self.key().await?;
        let url = self.url(&format!("/getMessages?{}", query.to_query_string()));
        let envelope: MessagesEnvelope = api::get(&self.http, &url, Some(&key)).await?;
        Ok(envelope.messages)
    }

    async fn send_message(&self, request: SendMessageRequest) -> Result<MessageId> {
        let key = self.key().await?;
        let response: SendMessageResponse =
            api::post(&self.http, &self.url("/sendMessage"), &request, Some(&key)).await?;
        Ok(response.message_id)
    }

    async fn enter_chat(&self, credentials: ChatCredentials) -> Result<ChatInfo> {
        let key = self.key().await?;
        let envelope: ChatEnvelope =
            api::post(&self.http, &self.url("/enterChat"), &credentials, Some(&key)).await?;
        Ok(envelope.chat)
    }

    async fn create_chat(&self, credentials: ChatCredentials) -> Result<ChatInfo> {
        let key = self.key().await?;
        let envelope: ChatEnvelope =
            api::post(&self.http, &self.url("/createChat"), &credentials, Some(&key)).await?;
        Ok(envelope.chat)
    }

    async fn leave_chat(&self, chat_id: ChatId) -> Result<()> {
        let key = self.key().await?;
        let _: SuccessResponse = api::post(
            &self.http,
            &self.url("/leaveChat"),
            &LeaveChatRequest { chat_id },
            Some(&key),
        )
        .await?;
        Ok(())
    }

    async fn delete_messages(&self, chat_id: ChatId, message_ids: Vec<MessageId>) -> Result<()> {
        let key = self.key().await?;
        let _: SuccessResponse = api::post(
            &self.http,
            &self.url("/deleteMessages"),
            &DeleteMessagesRequest {
                chat_id,
                message_ids,
            },
            Some(&key),
        )
        .await?;
        Ok(())
    }

    async fn attachment(&self, hash: &str) -> Result<Vec<u8>> {
        let key = self.key().await?;
        let url = self.url(&format!("/attachment?hash={}", urlencoding::encode(hash)));
        api::get_bytes(&self.http, &url, Some(&key)).await
    }
}
