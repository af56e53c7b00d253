//! Controller for the one conversation the user has open
//!
//! Owns the visible message page, the draft and the read cursor. Every load or
//! refresh takes a new generation number; a response is applied only if no newer
//! request was started and the session is still open. The whole page replaces
//! the local list each time.

use crate::api::ChatApi;
use crate::bus::InvalidationBus;
use crate::config::{Config, MESSAGE_MAX_LENGTH, MESSAGE_PAGE_SIZE};
use crate::error::{Error, Result};
use crate::model::{Conversation, Message};
use crate::timeline::{build_timeline, TimelineEntry};
use chrono::{DateTime, TimeZone};
use parking_lot::Mutex;
use std::fmt::Display;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

const LOAD_ERROR: &str = "Could not load the messages for this conversation.";
const SEND_ERROR: &str = "Could not send the message.";

/// Tunables for one session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub page_size: u32,
    pub max_length: usize,
    /// Zero disables background refresh
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: MESSAGE_PAGE_SIZE,
            max_length: MESSAGE_MAX_LENGTH,
            poll_interval: Duration::from_secs(8),
        }
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            page_size: config.message_page_size,
            max_length: config.message_max_length,
            poll_interval: config.session_poll_interval(),
        }
    }
}

/// Read-only view of a session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub conversation_id: i64,
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub is_refreshing: bool,
    pub error: Option<String>,
    pub draft: String,
    pub is_sending: bool,
    pub send_error: Option<String>,
    pub last_acknowledged_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    Initial,
    Refresh,
}

struct SessionState {
    messages: Vec<Message>,
    loads_pending: usize,
    refreshes_pending: usize,
    error: Option<String>,
    draft: String,
    is_sending: bool,
    send_error: Option<String>,
    /// Highest id the server confirmed as read
    last_acknowledged: Option<i64>,
    /// Highest id an acknowledgement was issued for, successful or not
    last_ack_attempt: Option<i64>,
    generation: u64,
    closed: bool,
}

struct SessionInner {
    api: Arc<dyn ChatApi>,
    bus: InvalidationBus,
    conversation_id: i64,
    config: SessionConfig,
    state: Mutex<SessionState>,
    changes: watch::Sender<u64>,
}

/// One open conversation. Closing (or dropping) it cancels its timer and makes
/// any response still in flight a no-op.
pub struct ConversationSession {
    inner: Arc<SessionInner>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConversationSession {
    /// Create a session without starting anything
    pub fn new(
        api: Arc<dyn ChatApi>,
        bus: InvalidationBus,
        conversation: &Conversation,
        config: SessionConfig,
    ) -> Self {
        let state = SessionState {
            messages: Vec::new(),
            loads_pending: 0,
            refreshes_pending: 0,
            error: None,
            draft: String::new(),
            is_sending: false,
            send_error: None,
            last_acknowledged: conversation.last_read_message_id,
            last_ack_attempt: conversation.last_read_message_id,
            generation: 0,
            closed: false,
        };
        let (changes, _) = watch::channel(0);

        Self {
            inner: Arc::new(SessionInner {
                api,
                bus,
                conversation_id: conversation.id,
                config,
                state: Mutex::new(state),
                changes,
            }),
            poll_task: Mutex::new(None),
        }
    }

    /// Create a session, load the first page and keep it fresh in the background
    pub fn open(
        api: Arc<dyn ChatApi>,
        bus: InvalidationBus,
        conversation: &Conversation,
        config: SessionConfig,
    ) -> Self {
        let session = Self::new(api, bus, conversation, config);
        session.start();
        session
    }

    /// Spawn the initial load followed by the refresh loop
    pub fn start(&self) {
        let mut slot = self.poll_task.lock();
        if slot.is_some() || self.inner.is_closed() {
            return;
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!(
                    "No async runtime, conversation {} not started",
                    self.inner.conversation_id
                );
                return;
            }
        };

        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.poll_interval;
        info!("Opening conversation {}", self.inner.conversation_id);

        *slot = Some(runtime.spawn(async move {
            match weak.upgrade() {
                Some(inner) => inner.fetch(FetchMode::Initial).await,
                None => return,
            }

            if period.is_zero() {
                return;
            }

            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.is_closed() {
                    break;
                }
                inner.fetch(FetchMode::Refresh).await;
            }
        }));
    }

    pub fn conversation_id(&self) -> i64 {
        self.inner.conversation_id
    }

    /// Fetch the first page, showing a loading state
    pub async fn load(&self) {
        self.inner.fetch(FetchMode::Initial).await;
    }

    /// Re-fetch the first page in place
    pub async fn refresh(&self) {
        self.inner.fetch(FetchMode::Refresh).await;
    }

    pub fn set_draft(&self, text: impl Into<String>) {
        {
            let mut state = self.inner.state.lock();
            state.draft = text.into();
            state.send_error = None;
        }
        self.inner.notify();
    }

    pub fn draft(&self) -> String {
        self.inner.state.lock().draft.clone()
    }

    /// Characters left before the draft hits the length limit
    pub fn remaining_characters(&self) -> usize {
        let used = self.inner.state.lock().draft.chars().count();
        self.inner.config.max_length.saturating_sub(used)
    }

    pub fn can_send(&self) -> bool {
        let state = self.inner.state.lock();
        !state.draft.trim().is_empty() && !state.is_sending
    }

    /// Send the current draft.
    ///
    /// On success the draft is cleared, the returned message is appended unless
    /// a refresh already brought it in, and the page is refreshed once more. On
    /// failure the draft is kept and `send_error` is set.
    pub async fn send(&self) -> Result<Message> {
        self.inner.send().await
    }

    /// Replace the draft with `text` and send it
    pub async fn send_text(&self, text: &str) -> Result<Message> {
        self.set_draft(text);
        self.send().await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.lock();
        SessionSnapshot {
            conversation_id: self.inner.conversation_id,
            messages: state.messages.clone(),
            is_loading: state.loads_pending > 0,
            is_refreshing: state.refreshes_pending > 0,
            error: state.error.clone(),
            draft: state.draft.clone(),
            is_sending: state.is_sending,
            send_error: state.send_error.clone(),
            last_acknowledged_id: state.last_acknowledged,
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.state.lock().messages.clone()
    }

    pub fn last_acknowledged_id(&self) -> Option<i64> {
        self.inner.state.lock().last_acknowledged
    }

    /// Timeline of the current messages as of `now`
    pub fn timeline<Tz>(
        &self,
        current_user_id: Option<i64>,
        now: &DateTime<Tz>,
    ) -> Vec<TimelineEntry>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        build_timeline(&self.messages(), current_user_id, now)
    }

    /// Receiver bumped on every state change
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.changes.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Cancel the timer; responses arriving later are discarded
    pub fn close(&self) {
        let first_close = {
            let mut state = self.inner.state.lock();
            let first = !state.closed;
            state.closed = true;
            state.generation += 1;
            first
        };

        if let Some(task) = self.poll_task.lock().take() {
            task.abort();
        }

        if first_close {
            info!("Closed conversation {}", self.inner.conversation_id);
            self.inner.notify();
        }
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.close();
    }
}

impl SessionInner {
    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }

    async fn fetch(&self, mode: FetchMode) {
        let generation = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.generation += 1;
            state.error = None;
            match mode {
                FetchMode::Initial => state.loads_pending += 1,
                FetchMode::Refresh => state.refreshes_pending += 1,
            }
            state.generation
        };
        let pending = PendingFetch { session: self, mode };
        self.notify();

        let result = self
            .api
            .list_messages(self.conversation_id, 0, self.config.page_size)
            .await;
        drop(pending);

        let applied = {
            let mut state = self.state.lock();
            if state.closed || state.generation != generation {
                debug!(
                    "Discarding stale message page for conversation {}",
                    self.conversation_id
                );
                false
            } else {
                match result {
                    Ok(page) => {
                        debug!(
                            "Loaded {} messages for conversation {}",
                            page.content.len(),
                            self.conversation_id
                        );
                        state.messages = page.content;
                    }
                    Err(e) => {
                        error!(
                            "Failed to load messages for conversation {}: {}",
                            self.conversation_id, e
                        );
                        state.error = Some(e.user_message(LOAD_ERROR));
                    }
                }
                true
            }
        };
        self.notify();

        if applied {
            self.acknowledge_latest().await;
        }
    }

    /// Mark the conversation read up to its last message, at most once per id
    async fn acknowledge_latest(&self) {
        let target = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            let Some(last_id) = state.messages.last().map(|m| m.id) else {
                return;
            };
            if state.last_ack_attempt.map_or(false, |attempted| attempted >= last_id) {
                return;
            }
            state.last_ack_attempt = Some(last_id);
            last_id
        };

        match self.api.update_last_read(self.conversation_id, target).await {
            Ok(()) => {
                {
                    let mut state = self.state.lock();
                    if state.closed {
                        return;
                    }
                    state.last_acknowledged = state.last_acknowledged.max(Some(target));
                }
                debug!(
                    "Conversation {} read up to message {}",
                    self.conversation_id, target
                );
                self.notify();
                self.bus.publish();
            }
            Err(e) => {
                // Not retried until a newer message arrives
                warn!(
                    "Failed to mark conversation {} read up to {}: {}",
                    self.conversation_id, target, e
                );
            }
        }
    }

    async fn send(&self) -> Result<Message> {
        let body = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::SessionClosed);
            }
            if state.is_sending {
                return Err(Error::SendInFlight);
            }

            let trimmed = state.draft.trim();
            if trimmed.is_empty() {
                return Err(Error::Validation("Message is empty".to_string()));
            }
            if trimmed.chars().count() > self.config.max_length {
                return Err(Error::Validation(format!(
                    "Message exceeds {} characters",
                    self.config.max_length
                )));
            }

            let body = trimmed.to_string();
            state.is_sending = true;
            state.send_error = None;
            body
        };
        let _sending = SendingFlag { session: self };
        self.notify();

        match self.api.send_message(self.conversation_id, &body).await {
            Ok(message) => {
                {
                    let mut state = self.state.lock();
                    if state.closed {
                        return Ok(message);
                    }
                    state.draft.clear();
                    if !state.messages.iter().any(|m| m.id == message.id) {
                        state.messages.push(message.clone());
                        // Pages fetched before the send no longer apply
                        state.generation += 1;
                    }
                }
                self.notify();

                self.fetch(FetchMode::Refresh).await;
                Ok(message)
            }
            Err(e) => {
                error!(
                    "Failed to send message to conversation {}: {}",
                    self.conversation_id, e
                );
                self.state.lock().send_error = Some(e.user_message(SEND_ERROR));
                Err(e)
            }
        }
    }
}

/// Counts a fetch as pending until dropped, including when the caller
/// abandons the future mid-request
struct PendingFetch<'a> {
    session: &'a SessionInner,
    mode: FetchMode,
}

impl Drop for PendingFetch<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.session.state.lock();
            match self.mode {
                FetchMode::Initial => state.loads_pending = state.loads_pending.saturating_sub(1),
                FetchMode::Refresh => {
                    state.refreshes_pending = state.refreshes_pending.saturating_sub(1)
                }
            }
        }
        self.session.notify();
    }
}

/// Holds `is_sending` for the lifetime of one send
struct SendingFlag<'a> {
    session: &'a SessionInner,
}

impl Drop for SendingFlag<'_> {
    fn drop(&mut self) {
        self.session.state.lock().is_sending = false;
        self.session.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryChatApi, Operation};
    use crate::model::Participant;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn person(id: i64, name: &str) -> Participant {
        Participant {
            id,
            name: name.to_string(),
            email: None,
            role: None,
        }
    }

    fn message(id: i64, sender: &Participant) -> Message {
        Message {
            id,
            sender: Some(sender.clone()),
            body: format!("message {}", id),
            sent_at: Some(format!("2025-01-01T10:{:02}:00", id % 60)),
            kind: Some("TEXT".to_string()),
        }
    }

    fn conversation(id: i64, last_read: Option<i64>) -> Conversation {
        Conversation {
            id,
            name: Some("Care team".to_string()),
            participants: vec![person(1, "Maria"), person(2, "Ana")],
            last_message: None,
            last_read_message_id: last_read,
            has_unread_messages: None,
            created_at: None,
        }
    }

    fn setup(last_read: Option<i64>) -> (MemoryChatApi, InvalidationBus, ConversationSession) {
        let api = MemoryChatApi::new(person(1, "Maria"));
        let chat = conversation(10, last_read);
        api.put_conversation(chat.clone());
        let bus = InvalidationBus::new();
        let session = ConversationSession::new(
            Arc::new(api.clone()),
            bus.clone(),
            &chat,
            SessionConfig {
                poll_interval: Duration::from_secs(4),
                ..SessionConfig::default()
            },
        );
        (api, bus, session)
    }

    #[tokio::test]
    async fn test_load_replaces_messages() {
        let (api, _bus, session) = setup(None);
        let ana = person(2, "Ana");
        api.put_messages(10, vec![message(1, &ana), message(2, &ana)]);

        session.load().await;
        let snapshot = session.snapshot();
        assert_eq!(snapshot.messages.len(), 2);
        assert!(!snapshot.is_loading);
        assert!(snapshot.error.is_none());

        api.put_messages(10, vec![message(3, &ana)]);
        session.refresh().await;
        assert_eq!(session.messages(), vec![message(3, &ana)]);
    }

    #[tokio::test]
    async fn test_timeline_of_loaded_page() {
        let (api, _bus, session) = setup(None);
        let ana = person(2, "Ana");
        api.put_messages(10, vec![message(2, &ana), message(1, &ana)]);
        session.load().await;

        let now = chrono::Utc.with_ymd_and_hms(2025, 1, 1, 18, 0, 0).unwrap();
        let timeline = session.timeline(Some(1), &now);
        assert_eq!(timeline.len(), 3);
        assert!(timeline[0].is_separator());
        assert_eq!(timeline[1].as_message().unwrap().message.id, 1);
    }

    #[tokio::test]
    async fn test_load_error_prefers_server_message() {
        let (api, _bus, session) = setup(None);
        api.fail(Operation::ListMessages, Some("Chat not accessible"));
        session.load().await;
        assert_eq!(session.snapshot().error.as_deref(), Some("Chat not accessible"));

        api.fail(Operation::ListMessages, None);
        session.refresh().await;
        assert_eq!(session.snapshot().error.as_deref(), Some(LOAD_ERROR));
    }

    #[tokio::test]
    async fn test_read_ack_once_per_message() {
        let (api, bus, session) = setup(None);
        let published = Arc::new(AtomicUsize::new(0));
        let _sub = bus.subscribe({
            let published = published.clone();
            move || {
                published.fetch_add(1, Ordering::SeqCst);
            }
        });

        let ana = person(2, "Ana");
        api.put_messages(10, vec![message(4, &ana), message(5, &ana)]);
        session.load().await;
        assert_eq!(api.read_updates(), vec![(10, 5)]);
        assert_eq!(session.last_acknowledged_id(), Some(5));
        assert_eq!(published.load(Ordering::SeqCst), 1);

        session.refresh().await;
        assert_eq!(api.calls(Operation::UpdateLastRead), 1);

        api.deliver(10, message(6, &ana));
        session.refresh().await;
        assert_eq!(api.read_updates(), vec![(10, 5), (10, 6)]);
        assert_eq!(published.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cursor_seeded_from_conversation() {
        let (api, _bus, session) = setup(Some(5));
        let ana = person(2, "Ana");
        api.put_messages(10, vec![message(5, &ana)]);

        session.load().await;
        assert_eq!(api.calls(Operation::UpdateLastRead), 0);
    }

    #[tokio::test]
    async fn test_failed_ack_waits_for_newer_message() {
        let (api, bus, session) = setup(None);
        let published = Arc::new(AtomicUsize::new(0));
        let _sub = bus.subscribe({
            let published = published.clone();
            move || {
                published.fetch_add(1, Ordering::SeqCst);
            }
        });

        let ana = person(2, "Ana");
        api.put_messages(10, vec![message(5, &ana)]);
        api.fail(Operation::UpdateLastRead, None);
        session.load().await;
        assert_eq!(api.calls(Operation::UpdateLastRead), 1);
        assert_eq!(session.last_acknowledged_id(), None);
        assert_eq!(published.load(Ordering::SeqCst), 0);

        api.recover(Operation::UpdateLastRead);
        session.refresh().await;
        assert_eq!(api.calls(Operation::UpdateLastRead), 1);

        api.deliver(10, message(6, &ana));
        session.refresh().await;
        assert_eq!(api.calls(Operation::UpdateLastRead), 2);
        assert_eq!(session.last_acknowledged_id(), Some(6));
    }

    #[tokio::test]
    async fn test_send_appends_and_clears_draft() {
        let (api, _bus, session) = setup(None);
        session.set_draft("  hello there  ");
        assert!(session.can_send());

        let sent = session.send().await.unwrap();
        assert_eq!(sent.body, "hello there");
        assert_eq!(api.sent_bodies(), vec![(10, "hello there".to_string())]);

        let snapshot = session.snapshot();
        assert!(snapshot.draft.is_empty());
        assert!(!snapshot.is_sending);
        assert_eq!(snapshot.messages.iter().filter(|m| m.id == sent.id).count(), 1);
        assert_eq!(api.calls(Operation::ListMessages), 1);
    }

    #[tokio::test]
    async fn test_send_failure_keeps_draft() {
        let (api, _bus, session) = setup(None);
        api.fail(Operation::SendMessage, Some("You are not a participant"));

        let result = session.send_text("draft text").await;
        assert!(result.is_err());

        let snapshot = session.snapshot();
        assert_eq!(snapshot.draft, "draft text");
        assert_eq!(snapshot.send_error.as_deref(), Some("You are not a participant"));
        assert!(!snapshot.is_sending);
    }

    #[tokio::test]
    async fn test_send_validation() {
        let (api, _bus, session) = setup(None);
        assert!(matches!(session.send_text("   ").await, Err(Error::Validation(_))));

        let too_long = "x".repeat(MESSAGE_MAX_LENGTH + 1);
        assert!(matches!(session.send_text(&too_long).await, Err(Error::Validation(_))));
        assert_eq!(session.remaining_characters(), 0);
        assert_eq!(api.calls(Operation::SendMessage), 0);

        session.set_draft("abc");
        assert_eq!(session.remaining_characters(), MESSAGE_MAX_LENGTH - 3);
    }

    #[tokio::test]
    async fn test_no_concurrent_sends() {
        let (api, _bus, session) = setup(None);
        let session = Arc::new(session);
        api.hold(Operation::SendMessage);
        session.set_draft("first");

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.send().await }
        });
        tokio::task::yield_now().await;
        assert!(session.snapshot().is_sending);
        assert!(!session.can_send());

        assert!(matches!(session.send().await, Err(Error::SendInFlight)));

        api.release(Operation::SendMessage, 1);
        assert!(pending.await.unwrap().is_ok());
        assert_eq!(api.calls(Operation::SendMessage), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_send_releases_sending_flag() {
        let (api, _bus, session) = setup(None);
        api.hold(Operation::SendMessage);
        session.set_draft("first");

        let abandoned = tokio::time::timeout(Duration::from_millis(50), session.send()).await;
        assert!(abandoned.is_err());

        let snapshot = session.snapshot();
        assert!(!snapshot.is_sending);
        assert_eq!(snapshot.draft, "first");
        assert!(session.can_send());

        api.open(Operation::SendMessage);
        session.set_draft("second");
        let sent = session.send().await.unwrap();
        assert_eq!(sent.body, "second");
        assert!(!session.snapshot().is_sending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_load_clears_loading() {
        let (api, _bus, session) = setup(None);
        api.hold(Operation::ListMessages);

        let abandoned = tokio::time::timeout(Duration::from_millis(50), session.load()).await;
        assert!(abandoned.is_err());
        assert!(!session.snapshot().is_loading);

        let abandoned = tokio::time::timeout(Duration::from_millis(50), session.refresh()).await;
        assert!(abandoned.is_err());
        assert!(!session.snapshot().is_refreshing);

        api.open(Operation::ListMessages);
        session.refresh().await;
        let snapshot = session.snapshot();
        assert!(!snapshot.is_loading);
        assert!(!snapshot.is_refreshing);
    }

    #[tokio::test]
    async fn test_stale_page_discarded() {
        let (api, _bus, session) = setup(None);
        let session = Arc::new(session);
        let ana = person(2, "Ana");
        api.put_messages(10, vec![message(1, &ana)]);
        api.hold(Operation::ListMessages);

        let slow = tokio::spawn({
            let session = session.clone();
            async move { session.load().await }
        });
        tokio::task::yield_now().await;

        let fast = tokio::spawn({
            let session = session.clone();
            async move { session.refresh().await }
        });
        tokio::task::yield_now().await;
        assert_eq!(api.calls(Operation::ListMessages), 2);

        // The older request finishes first and is dropped
        api.release(Operation::ListMessages, 1);
        slow.await.unwrap();
        let snapshot = session.snapshot();
        assert!(snapshot.messages.is_empty());
        assert!(!snapshot.is_loading);
        assert!(snapshot.is_refreshing);

        api.put_messages(10, vec![message(1, &ana), message(2, &ana)]);
        api.release(Operation::ListMessages, 1);
        fast.await.unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.messages.len(), 2);
        assert!(!snapshot.is_refreshing);
        assert_eq!(api.read_updates(), vec![(10, 2)]);
    }

    #[tokio::test]
    async fn test_results_after_close_ignored() {
        let (api, bus, session) = setup(None);
        let session = Arc::new(session);
        let published = Arc::new(AtomicUsize::new(0));
        let _sub = bus.subscribe({
            let published = published.clone();
            move || {
                published.fetch_add(1, Ordering::SeqCst);
            }
        });

        let ana = person(2, "Ana");
        api.put_messages(10, vec![message(1, &ana)]);
        api.hold(Operation::ListMessages);

        let pending = tokio::spawn({
            let session = session.clone();
            async move { session.load().await }
        });
        tokio::task::yield_now().await;

        session.close();
        api.open(Operation::ListMessages);
        pending.await.unwrap();

        assert!(session.messages().is_empty());
        assert_eq!(api.calls(Operation::UpdateLastRead), 0);
        assert_eq!(published.load(Ordering::SeqCst), 0);
        assert!(matches!(session.send_text("late").await, Err(Error::SessionClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_refresh_until_closed() {
        let (api, _bus, session) = setup(None);
        session.start();
        tokio::task::yield_now().await;
        assert_eq!(api.calls(Operation::ListMessages), 1);

        tokio::time::sleep(Duration::from_millis(8_001)).await;
        tokio::task::yield_now().await;
        assert_eq!(api.calls(Operation::ListMessages), 3);

        session.close();
        tokio::time::sleep(Duration::from_secs(40)).await;
        tokio::task::yield_now().await;
        assert_eq!(api.calls(Operation::ListMessages), 3);
    }

    #[tokio::test]
    async fn test_changes_signalled() {
        let (_api, _bus, session) = setup(None);
        let mut changes = session.changes();
        session.set_draft("hi");
        assert!(changes.has_changed().unwrap());
        changes.borrow_and_update();
        session.load().await;
        assert!(changes.has_changed().unwrap());
    }
}
