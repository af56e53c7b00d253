//! Display-ready message timeline for one conversation

use crate::model::Message;
use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone};
use std::fmt::Display;

/// One row of the rendered conversation
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineEntry {
    DateSeparator { key: String, label: String },
    Message(MessageEntry),
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageEntry {
    pub key: String,
    pub message: Message,
    pub is_mine: bool,
    pub is_system: bool,
    pub show_sender_name: bool,
    pub time_label: String,
}

impl TimelineEntry {
    pub fn as_message(&self) -> Option<&MessageEntry> {
        match self {
            TimelineEntry::Message(entry) => Some(entry),
            TimelineEntry::DateSeparator { .. } => None,
        }
    }

    pub fn is_separator(&self) -> bool {
        matches!(self, TimelineEntry::DateSeparator { .. })
    }
}

/// Build the timeline as of `now`, whose zone decides calendar days.
///
/// Messages are ordered by sent time, unknown times first (as the epoch), with
/// the id breaking ties. A date separator opens every new day; messages with an
/// unknown time each get their own. Within a day, consecutive messages from the
/// same other participant show the sender name only on the first.
pub fn build_timeline<Tz>(
    messages: &[Message],
    current_user_id: Option<i64>,
    now: &DateTime<Tz>,
) -> Vec<TimelineEntry>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let zone = now.timezone();
    let today = now.date_naive();

    let mut sorted: Vec<(Option<DateTime<Tz>>, &Message)> = messages
        .iter()
        .map(|m| (m.sent_at().map(|t| t.with_timezone(&zone)), m))
        .collect();
    sorted.sort_by_key(|(sent, m)| {
        let millis = sent.as_ref().map(|t| t.timestamp_millis()).unwrap_or(0);
        (millis, m.id)
    });

    let mut entries = Vec::with_capacity(sorted.len() + 4);
    let mut current_day: Option<String> = None;
    let mut previous_sender: Option<i64> = None;

    for (sent, message) in sorted {
        let day_key = match &sent {
            Some(t) => t.date_naive().format("%Y-%m-%d").to_string(),
            None => format!("unknown-{}", message.id),
        };

        if current_day.as_deref() != Some(day_key.as_str()) {
            entries.push(TimelineEntry::DateSeparator {
                key: format!("separator-{}-{}", day_key, message.id),
                label: day_label(sent.as_ref().map(|t| t.date_naive()), today),
            });
            current_day = Some(day_key);
            previous_sender = None;
        }

        let sender_id = message.sender_id();
        let is_mine = sender_id.is_some() && sender_id == current_user_id;
        let is_system = message.is_system();
        let has_name = message
            .sender
            .as_ref()
            .map(|s| !s.name.trim().is_empty())
            .unwrap_or(false);
        let show_sender_name = !is_mine
            && !is_system
            && has_name
            && (previous_sender.is_none() || sender_id != previous_sender);

        entries.push(TimelineEntry::Message(MessageEntry {
            key: format!("message-{}", message.id),
            message: message.clone(),
            is_mine,
            is_system,
            show_sender_name,
            time_label: sent
                .as_ref()
                .map(|t| t.format("%H:%M").to_string())
                .unwrap_or_else(|| "--:--".to_string()),
        }));

        previous_sender = sender_id;
    }

    entries
}

/// [`build_timeline`] in the local zone, as of now
pub fn build_local_timeline(messages: &[Message], current_user_id: Option<i64>) -> Vec<TimelineEntry> {
    build_timeline(messages, current_user_id, &Local::now())
}

fn day_label(date: Option<NaiveDate>, today: NaiveDate) -> String {
    let Some(date) = date else {
        return "Unknown date".to_string();
    };

    if date == today {
        "Today".to_string()
    } else if today.pred_opt() == Some(date) {
        "Yesterday".to_string()
    } else {
        format!("{} of {}", date.day(), date.format("%B"))
    }
}
