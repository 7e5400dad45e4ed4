//! Token estimation and conversation trimming.
//!
//! Uses a character-based heuristic: ~4 characters per token, images at a
//! flat cost. It is deterministic and needs no tokenizer, which is all the
//! budgeter needs to keep requests under the model's context window.

use std::borrow::Cow;

use appforge_core::message::{Message, Role};

pub const CHARS_PER_TOKEN: usize = 4;

/// Flat charge for one image part.
pub const IMAGE_TOKEN_COST: usize = 1000;

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Estimate tokens for one message: text, images and tool-call payloads.
pub fn estimate_message_tokens(message: &Message) -> usize {
    let content = estimate_tokens(&message.content.to_text())
        + message.content.image_count() * IMAGE_TOKEN_COST;
    let calls: usize = message
        .tool_calls
        .iter()
        .map(|call| estimate_tokens(&call.name) + estimate_tokens(&call.arguments_json()))
        .sum();
    content + calls
}

/// Estimate tokens for a slice of messages.
pub fn estimate_conversation_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

/// Fit `messages` into `budget` tokens.
///
/// Within budget the input is returned untouched. Otherwise the result is
/// the anchor (`messages[0]`), one system notice saying how many messages
/// were elided, and the longest recent tail that fits next to the anchor.
/// The tail never starts with a tool result whose assistant message was
/// elided; such results are counted as elided too.
pub fn trim(messages: &[Message], budget: usize) -> Cow<'_, [Message]> {
    if messages.len() <= 1 || estimate_conversation_tokens(messages) <= budget {
        return Cow::Borrowed(messages);
    }

    let anchor = &messages[0];
    let mut used = estimate_message_tokens(anchor);
    let mut start = messages.len();
    for (idx, message) in messages.iter().enumerate().skip(1).rev() {
        let cost = estimate_message_tokens(message);
        if used + cost > budget {
            break;
        }
        used += cost;
        start = idx;
    }

    while start < messages.len() && messages[start].role == Role::Tool {
        start += 1;
    }

    let elided = start - 1;
    let mut trimmed = Vec::with_capacity(messages.len() - start + 2);
    trimmed.push(anchor.clone());
    if elided > 0 {
        trimmed.push(Message::system(elision_notice(elided)));
    }
    trimmed.extend_from_slice(&messages[start..]);
    Cow::Owned(trimmed)
}

fn elision_notice(count: usize) -> String {
    format!(
        "[{count} earlier messages trimmed for context length. The conversation continues from here.]"
    )
}

/// Keep the head and tail of an oversized text, splicing in a marker with
/// the number of characters removed.
pub fn truncate_middle(text: &str, max_chars: usize) -> Cow<'_, str> {
    let total = text.chars().count();
    if total <= max_chars {
        return Cow::Borrowed(text);
    }

    let half = max_chars / 2;
    let head: String = text.chars().take(half).collect();
    let tail: String = text.chars().skip(total - half).collect();
    let removed = total - 2 * half;
    Cow::Owned(format!(
        "{head}\n\n... [truncated {removed} characters] ...\n\n{tail}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use appforge_core::message::{ContentPart, MessageToolCall};

    /// A message whose content costs exactly `tokens` tokens.
    fn sized(role: Role, tokens: usize) -> Message {
        let text = "x".repeat(tokens * CHARS_PER_TOKEN);
        match role {
            Role::User => Message::user(text),
            Role::Assistant => Message::assistant(text),
            Role::System => Message::system(text),
            Role::Tool => Message::tool_result("call_1", text),
        }
    }

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn partial_token_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn images_cost_a_flat_amount() {
        let msg = Message::tool_parts(
            "call_1",
            vec![ContentPart::text("shot"), ContentPart::image("data:image/png;base64,AAAA")],
        );
        assert_eq!(estimate_message_tokens(&msg), 1 + IMAGE_TOKEN_COST);
    }

    #[test]
    fn tool_call_arguments_are_counted() {
        let msg = Message::assistant_with_tool_calls(
            "",
            vec![MessageToolCall::new(
                "call_1",
                "read_file",
                serde_json::json!({"path": "src/App.tsx"}),
            )],
        );
        // "read_file" = 3 tokens, {"path":"src/App.tsx"} = 22 chars = 6 tokens
        assert_eq!(estimate_message_tokens(&msg), 9);
    }

    #[test]
    fn within_budget_is_identity() {
        let messages = vec![sized(Role::System, 10), sized(Role::User, 10)];
        let trimmed = trim(&messages, 20);
        assert!(matches!(trimmed, Cow::Borrowed(_)));
        assert_eq!(trimmed.as_ref(), messages.as_slice());
    }

    #[test]
    fn over_budget_keeps_anchor_notice_and_recent_tail() {
        let messages = vec![
            sized(Role::System, 10),
            sized(Role::User, 10),
            sized(Role::Assistant, 10),
            sized(Role::User, 10),
            sized(Role::Assistant, 10),
        ];
        let trimmed = trim(&messages, 30);

        assert_eq!(trimmed.len(), 4);
        assert_eq!(trimmed[0], messages[0]);
        assert_eq!(trimmed[1].role, Role::System);
        assert_eq!(
            trimmed[1].text(),
            "[2 earlier messages trimmed for context length. The conversation continues from here.]"
        );
        assert_eq!(trimmed[2], messages[3]);
        assert_eq!(trimmed[3], messages[4]);
    }

    #[test]
    fn exactly_one_notice_even_when_only_anchor_fits() {
        let messages = vec![
            sized(Role::System, 50),
            sized(Role::User, 10),
            sized(Role::Assistant, 10),
        ];
        let trimmed = trim(&messages, 40);
        assert_eq!(trimmed.len(), 2);
        assert_eq!(trimmed[0], messages[0]);
        assert!(trimmed[1].text().starts_with("[2 earlier messages trimmed"));
    }

    #[test]
    fn tail_never_starts_with_orphaned_tool_result() {
        let messages = vec![
            sized(Role::System, 5),
            sized(Role::User, 5),
            sized(Role::Assistant, 40),
            sized(Role::Tool, 5),
            sized(Role::Assistant, 5),
        ];
        let trimmed = trim(&messages, 20);

        assert_eq!(trimmed.len(), 3);
        assert!(trimmed[1].text().starts_with("[3 earlier messages trimmed"));
        assert_eq!(trimmed[2], messages[4]);
    }

    #[test]
    fn short_text_is_not_truncated() {
        assert!(matches!(truncate_middle("hello", 10), Cow::Borrowed("hello")));
    }

    #[test]
    fn long_text_keeps_head_and_tail() {
        let text = format!("{}{}{}", "a".repeat(10), "b".repeat(80), "c".repeat(10));
        let out = truncate_middle(&text, 20);
        assert_eq!(
            out,
            format!(
                "{}\n\n... [truncated 80 characters] ...\n\n{}",
                "a".repeat(10),
                "c".repeat(10)
            )
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let text = "é".repeat(30);
        let out = truncate_middle(&text, 10);
        assert_eq!(out, "ééééé\n\n... [truncated 20 characters] ...\n\nééééé");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn role_strategy() -> impl Strategy<Value = Role> {
            prop_oneof![
                Just(Role::User),
                Just(Role::Assistant),
                Just(Role::Tool),
                Just(Role::System),
            ]
        }

        fn conversation_strategy() -> impl Strategy<Value = Vec<Message>> {
            (
                0usize..60,
                prop::collection::vec((role_strategy(), 0usize..40), 0..14),
            )
                .prop_map(|(anchor, rest)| {
                    let mut messages = vec![sized(Role::System, anchor)];
                    messages.extend(rest.into_iter().map(|(role, tokens)| sized(role, tokens)));
                    messages
                })
        }

        fn is_notice(message: &Message) -> bool {
            message.role == Role::System && message.text().contains("earlier messages trimmed")
        }

        fn notice_count(message: &Message) -> usize {
            message
                .text()
                .trim_start_matches('[')
                .split(' ')
                .next()
                .and_then(|n| n.parse().ok())
                .unwrap_or(0)
        }

        proptest! {
            #[test]
            fn anchor_always_survives(messages in conversation_strategy(), budget in 0usize..400) {
                let trimmed = trim(&messages, budget);
                prop_assert_eq!(&trimmed[0], &messages[0]);
            }

            #[test]
            fn within_budget_or_single_message_is_identity(
                messages in conversation_strategy(),
                budget in 0usize..400,
            ) {
                let trimmed = trim(&messages, budget);
                if messages.len() <= 1 || estimate_conversation_tokens(&messages) <= budget {
                    prop_assert!(matches!(trimmed, Cow::Borrowed(_)));
                    prop_assert_eq!(trimmed.as_ref(), messages.as_slice());
                }
            }

            #[test]
            fn one_notice_counts_every_dropped_message(
                messages in conversation_strategy(),
                budget in 0usize..400,
            ) {
                let trimmed = trim(&messages, budget);
                if matches!(trimmed, Cow::Borrowed(_)) {
                    return Ok(());
                }

                let notices: Vec<&Message> = trimmed.iter().filter(|m| is_notice(m)).collect();
                prop_assert_eq!(notices.len(), 1);
                prop_assert!(is_notice(&trimmed[1]));

                let tail = &trimmed[2..];
                let dropped = messages.len() - 1 - tail.len();
                prop_assert_eq!(notice_count(notices[0]), dropped);
                prop_assert_eq!(tail, &messages[messages.len() - tail.len()..]);
            }

            #[test]
            fn kept_tail_never_starts_with_a_tool_result(
                messages in conversation_strategy(),
                budget in 0usize..400,
            ) {
                let trimmed = trim(&messages, budget);
                if matches!(trimmed, Cow::Borrowed(_)) {
                    return Ok(());
                }
                if let Some(first) = trimmed.get(2) {
                    prop_assert_ne!(first.role, Role::Tool);
                }
            }

            #[test]
            fn kept_tail_fits_beside_the_anchor(
                messages in conversation_strategy(),
                budget in 0usize..400,
            ) {
                let trimmed = trim(&messages, budget);
                if matches!(trimmed, Cow::Borrowed(_)) {
                    return Ok(());
                }
                let anchor = estimate_message_tokens(&messages[0]);
                let tail = estimate_conversation_tokens(&trimmed[2..]);
                prop_assert!(anchor + tail <= budget.max(anchor));
            }
        }
    }
}
