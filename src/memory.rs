//! In-memory chat server
//!
//! Implements [`ChatApi`] over plain collections, with per-operation call
//! counters, failure injection and gates that hold a call open until released.
//! Used by the test suites and by anything that needs the client without a server.

use crate::api::ChatApi;
use crate::error::{Error, Result};
use crate::model::{Conversation, CreateConversationRequest, Message, Page, Participant};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListConversations,
    GetConversation,
    ListMessages,
    SendMessage,
    UpdateLastRead,
    CreateConversation,
    AddParticipants,
    SearchUsers,
}

#[derive(Default)]
struct ServerState {
    conversations: Vec<Conversation>,
    messages: HashMap<i64, Vec<Message>>,
    users: Vec<Participant>,
    next_id: i64,
    calls: HashMap<Operation, usize>,
    failures: HashMap<Operation, Option<String>>,
    gates: HashMap<Operation, Arc<Semaphore>>,
    read_updates: Vec<(i64, i64)>,
    sent_bodies: Vec<(i64, String)>,
}

/// Shared, cloneable in-memory server acting as `me`
#[derive(Clone)]
pub struct MemoryChatApi {
    me: Participant,
    state: Arc<Mutex<ServerState>>,
}

impl MemoryChatApi {
    pub fn new(me: Participant) -> Self {
        let state = ServerState {
            users: vec![me.clone()],
            next_id: 1_000,
            ..ServerState::default()
        };
        Self {
            me,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn me(&self) -> &Participant {
        &self.me
    }

    /// Insert or replace a conversation summary
    pub fn put_conversation(&self, conversation: Conversation) {
        let mut state = self.state.lock();
        state.conversations.retain(|c| c.id != conversation.id);
        state.conversations.push(conversation);
    }

    /// Replace the message history of a conversation; its last message follows
    pub fn put_messages(&self, conversation_id: i64, messages: Vec<Message>) {
        let mut state = self.state.lock();
        let last = messages.iter().max_by_key(|m| m.id).cloned();
        if let Some(c) = state.conversations.iter_mut().find(|c| c.id == conversation_id) {
            c.last_message = last;
        }
        state.messages.insert(conversation_id, messages);
    }

    /// Append a message from someone else, as if it arrived on the server
    pub fn deliver(&self, conversation_id: i64, message: Message) {
        let mut state = self.state.lock();
        if let Some(c) = state.conversations.iter_mut().find(|c| c.id == conversation_id) {
            c.last_message = Some(message.clone());
        }
        state.messages.entry(conversation_id).or_default().push(message);
    }

    pub fn add_user(&self, user: Participant) {
        self.state.lock().users.push(user);
    }

    /// Make every call to `op` fail until [`recover`](Self::recover)
    pub fn fail(&self, op: Operation, message: Option<&str>) {
        self.state
            .lock()
            .failures
            .insert(op, message.map(str::to_string));
    }

    pub fn recover(&self, op: Operation) {
        self.state.lock().failures.remove(&op);
    }

    /// Block calls to `op` until permits are released
    pub fn hold(&self, op: Operation) {
        self.state.lock().gates.insert(op, Arc::new(Semaphore::new(0)));
    }

    /// Let `count` held calls to `op` proceed
    pub fn release(&self, op: Operation, count: usize) {
        if let Some(gate) = self.state.lock().gates.get(&op) {
            gate.add_permits(count);
        }
    }

    /// Remove the gate; calls already waiting are let through
    pub fn open(&self, op: Operation) {
        if let Some(gate) = self.state.lock().gates.remove(&op) {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.state.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// `(conversation_id, message_id)` for every successful read update
    pub fn read_updates(&self) -> Vec<(i64, i64)> {
        self.state.lock().read_updates.clone()
    }

    pub fn sent_bodies(&self) -> Vec<(i64, String)> {
        self.state.lock().sent_bodies.clone()
    }

    pub fn conversation(&self, conversation_id: i64) -> Option<Conversation> {
        self.state
            .lock()
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
    }

    /// Count the call, wait on the gate if any, then check for injected failure
    async fn enter(&self, op: Operation) -> Result<()> {
        let gate = {
            let mut state = self.state.lock();
            *state.calls.entry(op).or_insert(0) += 1;
            state.gates.get(&op).cloned()
        };

        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        match self.state.lock().failures.get(&op) {
            Some(message) => Err(Error::Api {
                status: 500,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    fn not_found(what: &str, id: i64) -> Error {
        Error::Api {
            status: 404,
            message: Some(format!("{} {} not found", what, id)),
        }
    }
}

#[async_trait]
impl ChatApi for MemoryChatApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.enter(Operation::ListConversations).await?;
        Ok(self.state.lock().conversations.clone())
    }

    async fn get_conversation(&self, conversation_id: i64) -> Result<Conversation> {
        self.enter(Operation::GetConversation).await?;
        self.conversation(conversation_id)
            .ok_or_else(|| Self::not_found("Chat", conversation_id))
    }

    async fn list_messages(
        &self,
        conversation_id: i64,
        page: u32,
        size: u32,
    ) -> Result<Page<Message>> {
        self.enter(Operation::ListMessages).await?;
        let state = self.state.lock();
        let all = state.messages.get(&conversation_id).cloned().unwrap_or_default();
        let total = all.len();
        let content: Vec<Message> = all
            .into_iter()
            .skip(page as usize * size as usize)
            .take(size as usize)
            .collect();

        Ok(Page {
            content,
            total_elements: total as u64,
            total_pages: if size == 0 {
                0
            } else {
                total.div_ceil(size as usize) as u32
            },
            number: page,
            size,
        })
    }

    async fn send_message(&self, conversation_id: i64, body: &str) -> Result<Message> {
        self.enter(Operation::SendMessage).await?;
        let mut state = self.state.lock();
        if !state.conversations.iter().any(|c| c.id == conversation_id) {
            return Err(Self::not_found("Chat", conversation_id));
        }

        state.next_id += 1;
        let message = Message {
            id: state.next_id,
            sender: Some(self.me.clone()),
            body: body.to_string(),
            sent_at: Some(Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            kind: Some("TEXT".to_string()),
        };

        state
            .messages
            .entry(conversation_id)
            .or_default()
            .push(message.clone());
        if let Some(c) = state.conversations.iter_mut().find(|c| c.id == conversation_id) {
            c.last_message = Some(message.clone());
        }
        state.sent_bodies.push((conversation_id, body.to_string()));
        Ok(message)
    }

    async fn update_last_read(&self, conversation_id: i64, message_id: i64) -> Result<()> {
        self.enter(Operation::UpdateLastRead).await?;
        let mut state = self.state.lock();
        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| Self::not_found("Chat", conversation_id))?;

        conversation.last_read_message_id = Some(message_id);
        conversation.has_unread_messages = Some(false);
        state.read_updates.push((conversation_id, message_id));
        Ok(())
    }

    async fn create_conversation(
        &self,
        request: &CreateConversationRequest,
    ) -> Result<Conversation> {
        self.enter(Operation::CreateConversation).await?;
        let mut state = self.state.lock();
        state.next_id += 1;

        let participants = state
            .users
            .iter()
            .filter(|u| request.participant_ids.contains(&u.id))
            .cloned()
            .collect();

        let conversation = Conversation {
            id: state.next_id,
            name: Some(request.name.clone()),
            participants,
            last_message: None,
            last_read_message_id: None,
            has_unread_messages: Some(false),
            created_at: Some(Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S").to_string()),
        };
        state.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn add_participants(
        &self,
        conversation_id: i64,
        participant_ids: &[i64],
    ) -> Result<Conversation> {
        self.enter(Operation::AddParticipants).await?;
        let mut state = self.state.lock();
        let added: Vec<Participant> = state
            .users
            .iter()
            .filter(|u| participant_ids.contains(&u.id))
            .cloned()
            .collect();

        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| Self::not_found("Chat", conversation_id))?;

        for user in added {
            if !conversation.participants.iter().any(|p| p.id == user.id) {
                conversation.participants.push(user);
            }
        }
        Ok(conversation.clone())
    }

    async fn search_users(&self, query: &str) -> Result<Vec<Participant>> {
        self.enter(Operation::SearchUsers).await?;
        let needle = query.to_lowercase();
        Ok(self
            .state
            .lock()
            .users
            .iter()
            .filter(|u| {
                u.name.to_lowercase().contains(&needle)
                    || u
                        .email
                        .as_deref()
                        .map(|e| e.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}
