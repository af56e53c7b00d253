//! Server capabilities the synchronization layer depends on

use crate::error::Result;
use crate::model::{Conversation, CreateConversationRequest, Message, Page, Participant};
use async_trait::async_trait;

/// The chat REST API, as seen by the client.
///
/// [`crate::client::HttpChatApi`] talks to the real server;
/// [`crate::memory::MemoryChatApi`] is an in-process stand-in.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// All conversations the current user belongs to
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    async fn get_conversation(&self, conversation_id: i64) -> Result<Conversation>;

    /// One page of messages, oldest first
    async fn list_messages(
        &self,
        conversation_id: i64,
        page: u32,
        size: u32,
    ) -> Result<Page<Message>>;

    /// Returns the created message with its server id and timestamp
    async fn send_message(&self, conversation_id: i64, body: &str) -> Result<Message>;

    /// Move the current user's read position to `message_id`
    async fn update_last_read(&self, conversation_id: i64, message_id: i64) -> Result<()>;

    async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<Conversation>;

    async fn add_participants(
        &self,
        conversation_id: i64,
        participant_ids: &[i64],
    ) -> Result<Conversation>;

    async fn search_users(&self, query: &str) -> Result<Vec<Participant>>;
}
