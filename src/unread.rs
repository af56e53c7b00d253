//! Unread rules for conversation summaries

use crate::model::Conversation;

/// Whether a conversation has content the current user has not read.
///
/// The server hint wins when set. Otherwise a conversation with a last message
/// is unread unless the user's read position has reached that message.
pub fn conversation_has_unread(conversation: &Conversation) -> bool {
    if conversation.has_unread_messages == Some(true) {
        return true;
    }

    let Some(last_message) = conversation.last_message.as_ref() else {
        return false;
    };

    match conversation.last_read_message_id {
        None => true,
        Some(last_read) => last_read < last_message.id,
    }
}

/// Number of conversations with unread content
pub fn count_unread(conversations: &[Conversation]) -> usize {
    conversations
        .iter()
        .filter(|c| conversation_has_unread(c))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;
    use proptest::prelude::*;

    fn conversation(
        id: i64,
        last_message_id: Option<i64>,
        last_read: Option<i64>,
        hint: Option<bool>,
    ) -> Conversation {
        Conversation {
            id,
            name: None,
            participants: vec![],
            last_message: last_message_id.map(|id| Message {
                id,
                sender: None,
                body: "hello".to_string(),
                sent_at: None,
                kind: None,
            }),
            last_read_message_id: last_read,
            has_unread_messages: hint,
            created_at: None,
        }
    }

    #[test]
    fn test_no_last_message_is_read() {
        assert!(!conversation_has_unread(&conversation(1, None, None, None)));
        assert!(!conversation_has_unread(&conversation(1, None, Some(3), Some(false))));
    }

    #[test]
    fn test_null_read_position_is_unread() {
        assert!(conversation_has_unread(&conversation(1, Some(5), None, None)));
    }

    #[test]
    fn test_read_position_comparison() {
        assert!(conversation_has_unread(&conversation(1, Some(5), Some(4), None)));
        assert!(!conversation_has_unread(&conversation(1, Some(5), Some(5), None)));
        assert!(!conversation_has_unread(&conversation(1, Some(5), Some(6), None)));
    }

    #[test]
    fn test_server_hint_wins() {
        assert!(conversation_has_unread(&conversation(1, None, None, Some(true))));
        assert!(conversation_has_unread(&conversation(1, Some(5), Some(5), Some(true))));
    }

    #[test]
    fn test_count_empty() {
        assert_eq!(count_unread(&[]), 0);
    }

    #[test]
    fn test_count_mixed() {
        let chats = vec![
            conversation(1, Some(5), None, None),
            conversation(2, Some(5), Some(5), None),
            conversation(3, None, None, Some(true)),
            conversation(4, None, None, None),
        ];
        assert_eq!(count_unread(&chats), 2);
    }

    fn arb_conversation() -> impl Strategy<Value = Conversation> {
        (
            0i64..1000,
            proptest::option::of(1i64..50),
            proptest::option::of(1i64..50),
            proptest::option::of(any::<bool>()),
        )
            .prop_map(|(id, last, read, hint)| conversation(id, last, read, hint))
    }

    proptest! {
        #[test]
        fn prop_predicate_definition(c in arb_conversation()) {
            let expected = c.has_unread_messages == Some(true)
                || c.last_message.as_ref().map_or(false, |m| {
                    c.last_read_message_id.map_or(true, |read| read < m.id)
                });
            prop_assert_eq!(conversation_has_unread(&c), expected);
        }

        #[test]
        fn prop_count_order_independent(mut chats in proptest::collection::vec(arb_conversation(), 0..30)) {
            let before = count_unread(&chats);
            chats.reverse();
            prop_assert_eq!(count_unread(&chats), before);
        }

        #[test]
        fn prop_count_non_decreasing(
            chats in proptest::collection::vec(arb_conversation(), 0..30),
            extra in arb_conversation(),
        ) {
            let before = count_unread(&chats);
            let mut grown = chats.clone();
            grown.push(extra);
            prop_assert!(count_unread(&grown) >= before);
        }
    }
}
