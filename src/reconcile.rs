//! Gmail chat reconciliation.
//!
//! Chat lines arrive as one MBOX record each. They are stored as
//! [`Conversation`] fragments and, after an import, collapsed into one
//! synthetic [`Message`] per thread.

use std::collections::BTreeMap;

use crate::model::address::{dedup_preserving_order, join_addresses, split_addresses};
use crate::model::conversation::Conversation;
use crate::model::mail::{Message, CONVERSATION_CATEGORY};

/// Participant recorded for an address-less fragment the owner sent.
pub const PLACEHOLDER_SELF: &str = "me";

/// Participant recorded for an address-less fragment someone else sent.
pub const PLACEHOLDER_OTHER: &str = "other";

/// Participants of one fragment and the name shown next to its text.
///
/// Returns `(participants, display_sender)` where `participants` is the
/// comma-joined, deduplicated union of senders and receivers. A fragment with
/// neither gets a single placeholder participant, which is also the display
/// sender.
pub fn fragment_participants(
    senders: &[String],
    receivers: &[String],
    sent: bool,
) -> (String, String) {
    let mut display_sender = join_addresses(senders);
    let mut all: Vec<String> = senders.iter().chain(receivers).cloned().collect();

    if senders.is_empty() && receivers.is_empty() {
        let placeholder = if sent { PLACEHOLDER_SELF } else { PLACEHOLDER_OTHER };
        display_sender = placeholder.to_string();
        all.push(display_sender.clone());
    }

    (join_addresses(&dedup_preserving_order(all)), display_sender)
}

/// HTML shown for one fragment.
///
/// A non-blank HTML body is used as is; otherwise an inline snippet with the
/// date, the sender and the plain text is built. The first fragment of a
/// thread (`conversation_id == thread_id`) is preceded by a date divider.
pub fn fragment_content(
    thread_id: i64,
    conversation_id: i64,
    date: &str,
    sender: &str,
    html: &str,
    plain: &str,
) -> String {
    let mut content = if html.trim().is_empty() {
        format!(
            "<div><span style=display:block;float:left;color:#888>{date}&nbsp;&nbsp;&nbsp;&nbsp;</span>\
<span style=display:block;padding-left:6em;text-indent:-1em><span>\
<span style=\"font-weight:bold\">{sender}: </span>{text}</span></span></div>",
            sender = escape_html(sender),
            text = escape_html(plain.trim_end()),
        )
    } else {
        html.to_string()
    };

    if thread_id == conversation_id {
        content.insert_str(
            0,
            &format!(
                "<table cellpadding=0 cellspacing=1><tr><td style=font-size:1;width:100%>\
<hr noshade size=1 color=#cccccc></td><td nowrap style=font-size:80%;color:#aaa>{date}</td></tr></table>"
            ),
        );
    }
    content
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Collapse fragments into one synthetic message per thread.
///
/// Threads are emitted in ascending `thread_id` order. Inside a thread,
/// fragments are ordered by `conversation_id` descending before their
/// participants are merged and their content concatenated. The message date
/// is the newest fragment date and the subject names the oldest.
/// `self_address` is dropped from the recipients.
pub fn group_conversations(fragments: &[Conversation], self_address: Option<&str>) -> Vec<Message> {
    let mut threads: BTreeMap<i64, Vec<&Conversation>> = BTreeMap::new();
    for fragment in fragments {
        threads.entry(fragment.thread_id).or_default().push(fragment);
    }

    threads
        .into_iter()
        .map(|(thread_id, mut group)| {
            group.sort_by(|a, b| b.conversation_id.cmp(&a.conversation_id));
            build_thread_message(thread_id, &group, self_address)
        })
        .collect()
}

fn build_thread_message(
    thread_id: i64,
    group: &[&Conversation],
    self_address: Option<&str>,
) -> Message {
    let participants = dedup_preserving_order(
        group
            .iter()
            .flat_map(|f| split_addresses(&f.participants))
            .map(str::to_string),
    );
    let content: String = group.iter().map(|f| f.content.as_str()).collect();

    let newest = group.iter().map(|f| f.date.as_str()).max().unwrap_or_default();
    let oldest = group.iter().map(|f| f.date.as_str()).min().unwrap_or_default();

    Message {
        id: thread_id.to_string(),
        sender: String::new(),
        recipients: normalize_recipients(&participants, self_address),
        subject: format!("Conversation from {oldest}"),
        date: newest.to_string(),
        content: String::new(),
        rich_content: content,
        has_attachments: 0,
        category: CONVERSATION_CATEGORY.to_string(),
        is_conversation: true,
    }
}

/// Drop blanks and the owner's address, then deduplicate and sort.
fn normalize_recipients(participants: &[String], self_address: Option<&str>) -> String {
    let mut recipients: Vec<String> = participants
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .filter(|p| !matches!(self_address, Some(me) if p.eq_ignore_ascii_case(me)))
        .map(str::to_string)
        .collect();
    recipients.sort();
    recipients.dedup();
    join_addresses(&recipients)
}
