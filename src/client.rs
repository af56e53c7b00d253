//! REST client for the chat server

use crate::api::ChatApi;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{
    AddParticipantsRequest, Conversation, CreateConversationRequest, LastReadUpdateRequest,
    Message, Page, Participant, SendMessageRequest,
};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

/// Error body shape used by the server
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// The list endpoint has returned both a bare array and a page envelope
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ConversationList {
    Plain(Vec<Conversation>),
    Paged(Page<Conversation>),
}

impl From<ConversationList> for Vec<Conversation> {
    fn from(list: ConversationList) -> Self {
        match list {
            ConversationList::Plain(chats) => chats,
            ConversationList::Paged(page) => page.content,
        }
    }
}

/// Bearer-authenticated JSON client
pub struct HttpChatApi {
    http: Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpChatApi {
    pub fn new(config: &Config) -> Self {
        Self {
            http: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: config.access_token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message);
        debug!("Request failed with {}: {}", status, body);

        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let list: ConversationList = self.json(self.http.get(self.url("/chats"))).await?;
        Ok(list.into())
    }

    async fn get_conversation(&self, conversation_id: i64) -> Result<Conversation> {
        let url = self.url(&format!("/chats/{}", conversation_id));
        self.json(self.http.get(url)).await
    }

    async fn list_messages(
        &self,
        conversation_id: i64,
        page: u32,
        size: u32,
    ) -> Result<Page<Message>> {
        let url = self.url(&format!("/chats/{}/messages", conversation_id));
        self.json(self.http.get(url).query(&[("page", page), ("size", size)]))
            .await
    }

    async fn send_message(&self, conversation_id: i64, body: &str) -> Result<Message> {
        let url = self.url(&format!("/chats/{}/messages", conversation_id));
        let payload = SendMessageRequest {
            message: body.to_string(),
        };
        self.json(self.http.post(url).json(&payload)).await
    }

    async fn update_last_read(&self, conversation_id: i64, message_id: i64) -> Result<()> {
        let url = self.url(&format!("/chats/{}/messages/read", conversation_id));
        let payload = LastReadUpdateRequest { message_id };
        self.send(self.http.patch(url).json(&payload)).await?;
        Ok(())
    }

    async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<Conversation> {
        self.json(self.http.post(self.url("/chats")).json(request))
            .await
    }

    async fn add_participants(
        &self,
        conversation_id: i64,
        participant_ids: &[i64],
    ) -> Result<Conversation> {
        let url = self.url(&format!("/chats/{}/participants", conversation_id));
        let payload = AddParticipantsRequest {
            participant_ids: participant_ids.to_vec(),
        };
        self.json(self.http.post(url).json(&payload)).await
    }

    async fn search_users(&self, query: &str) -> Result<Vec<Participant>> {
        self.json(
            self.http
                .get(self.url("/users/search"))
                .query(&[("query", query)]),
        )
        .await
    }
}
