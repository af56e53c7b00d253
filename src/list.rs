//! Conversation list surface: fetch, search, recency sort and selection

use crate::api::ChatApi;
use crate::config::{
    Config, CONVERSATION_NAME_MAX, CONVERSATION_NAME_MIN, MAX_PARTICIPANTS,
    MIN_USER_SEARCH_LENGTH,
};
use crate::error::{Error, Result};
use crate::model::{Conversation, CreateConversationRequest, Participant};
use crate::unread::{conversation_has_unread, count_unread};
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::{debug, error, info};

const LOAD_ERROR: &str = "Could not load your conversations right now. Try again.";

pub struct ConversationListController {
    api: Arc<dyn ChatApi>,
    current_user_id: Option<i64>,
    min_search_length: usize,
    conversations: Vec<Conversation>,
    search_term: String,
    selected_id: Option<i64>,
    is_loading: bool,
    error: Option<String>,
}

impl ConversationListController {
    pub fn new(api: Arc<dyn ChatApi>, current_user_id: Option<i64>) -> Self {
        Self {
            api,
            current_user_id,
            min_search_length: MIN_USER_SEARCH_LENGTH,
            conversations: Vec::new(),
            search_term: String::new(),
            selected_id: None,
            is_loading: false,
            error: None,
        }
    }

    pub fn from_config(api: Arc<dyn ChatApi>, config: &Config) -> Self {
        let mut controller = Self::new(api, config.current_user_id);
        controller.min_search_length = config.min_user_search_length;
        controller
    }

    /// Replace the list with the server's.
    ///
    /// On failure the previous list stays and `error` is set. Selection is
    /// reconciled against whatever list is current afterwards.
    pub async fn refresh(&mut self) {
        self.is_loading = true;
        self.error = None;

        match self.api.list_conversations().await {
            Ok(conversations) => {
                debug!("Loaded {} conversations", conversations.len());
                self.conversations = conversations;
            }
            Err(e) => {
                error!("Failed to load conversations: {}", e);
                self.error = Some(e.user_message(LOAD_ERROR));
            }
        }

        self.is_loading = false;
        self.reconcile_selection();
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn is_loading(&self) -> bool {
        self.is_loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn current_user_id(&self) -> Option<i64> {
        self.current_user_id
    }

    pub fn set_search_term(&mut self, term: impl Into<String>) {
        self.search_term = term.into();
    }

    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    /// All conversations, most recent activity first, unknown activity last
    pub fn sorted(&self) -> Vec<&Conversation> {
        let mut sorted: Vec<&Conversation> = self.conversations.iter().collect();
        sorted.sort_by_key(|c| Reverse(c.last_activity()));
        sorted
    }

    /// Sorted conversations matching the search term
    pub fn visible(&self) -> Vec<&Conversation> {
        let needle = self.search_term.trim().to_lowercase();
        self.sorted()
            .into_iter()
            .filter(|c| needle.is_empty() || matches_search(c, &needle))
            .collect()
    }

    pub fn unread_count(&self) -> usize {
        count_unread(&self.conversations)
    }

    pub fn is_unread(&self, conversation_id: i64) -> bool {
        self.conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .map(conversation_has_unread)
            .unwrap_or(false)
    }

    /// Select a conversation present in the list
    pub fn select(&mut self, conversation_id: i64) -> bool {
        if self.conversations.iter().any(|c| c.id == conversation_id) {
            self.selected_id = Some(conversation_id);
            true
        } else {
            false
        }
    }

    pub fn selected_id(&self) -> Option<i64> {
        self.selected_id
    }

    pub fn selected(&self) -> Option<&Conversation> {
        let id = self.selected_id?;
        self.conversations.iter().find(|c| c.id == id)
    }

    fn reconcile_selection(&mut self) {
        let still_present = self
            .selected_id
            .map(|id| self.conversations.iter().any(|c| c.id == id))
            .unwrap_or(false);

        if !still_present {
            self.selected_id = self.sorted().first().map(|c| c.id);
        }
    }

    /// Create a conversation with the given participants, then select it.
    ///
    /// The name is trimmed; the current user is added to the participants.
    pub async fn create_conversation(
        &mut self,
        name: &str,
        participant_ids: &[i64],
    ) -> Result<Conversation> {
        let request = build_create_request(name, participant_ids, self.current_user_id)?;

        let created = self.api.create_conversation(&request).await.map_err(|e| {
            error!("Failed to create conversation {:?}: {}", request.name, e);
            e
        })?;
        info!("Created conversation {} ({})", created.id, created.display_label(self.current_user_id));

        self.refresh().await;
        if !self.conversations.iter().any(|c| c.id == created.id) {
            self.conversations.push(created.clone());
        }
        self.selected_id = Some(created.id);
        Ok(created)
    }

    /// Add participants to an existing conversation and update it in the list
    pub async fn add_participants(
        &mut self,
        conversation_id: i64,
        participant_ids: &[i64],
    ) -> Result<Conversation> {
        if participant_ids.is_empty() {
            return Err(Error::Validation("Select at least one participant".to_string()));
        }

        let updated = self
            .api
            .add_participants(conversation_id, participant_ids)
            .await?;

        match self.conversations.iter_mut().find(|c| c.id == updated.id) {
            Some(existing) => *existing = updated.clone(),
            None => self.conversations.push(updated.clone()),
        }
        Ok(updated)
    }

    /// Users matching `query`; short queries return nothing without a request
    pub async fn search_users(&self, query: &str) -> Result<Vec<Participant>> {
        let query = query.trim();
        if query.chars().count() < self.min_search_length {
            return Ok(Vec::new());
        }
        self.api.search_users(query).await
    }
}

/// `needle` must already be lowercase
fn matches_search(conversation: &Conversation, needle: &str) -> bool {
    let name = conversation.name.as_deref().unwrap_or_default().to_lowercase();
    if name.contains(needle) {
        return true;
    }

    if conversation
        .participants
        .iter()
        .any(|p| p.name.to_lowercase().contains(needle))
    {
        return true;
    }

    conversation
        .last_message
        .as_ref()
        .map(|m| m.body.to_lowercase().contains(needle))
        .unwrap_or(false)
}

fn build_create_request(
    name: &str,
    participant_ids: &[i64],
    current_user_id: Option<i64>,
) -> Result<CreateConversationRequest> {
    let name = name.trim();
    let length = name.chars().count();
    if !(CONVERSATION_NAME_MIN..=CONVERSATION_NAME_MAX).contains(&length) {
        return Err(Error::Validation(format!(
            "Conversation name must be between {} and {} characters",
            CONVERSATION_NAME_MIN, CONVERSATION_NAME_MAX
        )));
    }

    let mut ids: Vec<i64> = Vec::with_capacity(participant_ids.len() + 1);
    for id in participant_ids.iter().copied().chain(current_user_id) {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    if ids.is_empty() {
        return Err(Error::Validation("Select at least one participant".to_string()));
    }
    if ids.len() > MAX_PARTICIPANTS {
        return Err(Error::Validation(format!(
            "A conversation can have at most {} participants",
            MAX_PARTICIPANTS
        )));
    }

    Ok(CreateConversationRequest {
        name: name.to_string(),
        participant_ids: ids,
    })
}
