//! MIME message handling on top of `mail-parser`: body selection, attachment
//! extraction and HTML-to-text conversion.

use mail_parser::decoders::base64::base64_decode;
use mail_parser::decoders::quoted_printable::quoted_printable_decode;
use mail_parser::{Encoding, Message, MessageParser, MessagePart, MimeHeaders, PartType};

use super::header::decode_encoded_words;
use super::header::decode_text_bytes;

/// Plain and HTML bodies of one message. Empty strings mean "absent".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bodies {
    pub plain: String,
    pub html: String,
}

/// A decoded attachment: display name and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAttachment {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TextKind {
    Plain,
    Html,
}

/// Parse a raw message (without MBOX envelope) into a MIME tree.
pub fn parse_mime(raw_message: &[u8]) -> Option<Message<'_>> {
    MessageParser::default().parse(raw_message)
}

/// Select the canonical bodies the way a mail reader would.
///
/// The HTML body is the first `text/html` part the message designates as
/// its HTML body; the plain body is the first designated `text/plain` part.
/// `mail-parser` fills the missing alternative with a converted copy; those
/// conversions are ignored so each body stays independently optional.
pub fn canonical_bodies(msg: &Message<'_>) -> Bodies {
    let html = msg
        .html_body
        .iter()
        .filter_map(|id| msg.parts.get(*id as usize))
        .find_map(|part| part_text(msg, part, TextKind::Html))
        .unwrap_or_default();

    let plain = msg
        .text_body
        .iter()
        .filter_map(|id| msg.parts.get(*id as usize))
        .find_map(|part| part_text(msg, part, TextKind::Plain))
        .unwrap_or_default();

    Bodies { plain, html }
}

/// Visit every non-attachment leaf part depth-first.
///
/// Each `text/plain` part overwrites the plain body and each `text/html` part
/// overwrites the HTML body, so the last part of each type wins. Nested
/// `message/rfc822` parts are descended into.
pub fn walk_bodies(msg: &Message<'_>) -> Bodies {
    let mut bodies = Bodies::default();
    walk_into(msg, &mut bodies, 0);
    bodies
}

/// Maximum nesting of `message/rfc822` parts followed by [`walk_bodies`].
const MAX_DEPTH: usize = 10;

fn walk_into(msg: &Message<'_>, bodies: &mut Bodies, depth: usize) {
    if depth > MAX_DEPTH {
        return;
    }
    for part in &msg.parts {
        if let PartType::Message(inner) = &part.body {
            walk_into(inner, bodies, depth + 1);
            continue;
        }
        if is_attachment_part(part) {
            continue;
        }
        if let Some(text) = part_text(msg, part, TextKind::Plain) {
            bodies.plain = text;
        } else if let Some(text) = part_text(msg, part, TextKind::Html) {
            bodies.html = text;
        }
    }
}

/// Attachments marked with `Content-Disposition: attachment; filename=…`.
///
/// Parts without a `filename` parameter are not listed. The name is unquoted
/// with [`unquote`].
pub fn disposition_attachments(msg: &Message<'_>) -> Vec<DecodedAttachment> {
    msg.parts
        .iter()
        .filter_map(|part| {
            let disposition = part.content_disposition()?;
            if !disposition.ctype().eq_ignore_ascii_case("attachment") {
                return None;
            }
            let name = disposition.attribute("filename")?;
            Some(DecodedAttachment {
                name: unquote(&decode_encoded_words(name)).to_string(),
                data: part.contents().to_vec(),
            })
        })
        .collect()
}

/// Attachments identified by a file name (`filename` or `name` parameter).
pub fn named_attachments(msg: &Message<'_>) -> Vec<DecodedAttachment> {
    msg.parts
        .iter()
        .filter(|part| !matches!(part.body, PartType::Multipart(_) | PartType::Message(_)))
        .filter_map(|part| {
            let name = part.attachment_name()?;
            Some(DecodedAttachment {
                name: decode_encoded_words(name),
                data: part.contents().to_vec(),
            })
        })
        .collect()
}

/// Strip a single matching pair of `"` or `'` around a parameter value.
pub fn unquote(value: &str) -> &str {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return &trimmed[1..trimmed.len() - 1];
        }
    }
    trimmed
}

fn is_attachment_part(part: &MessagePart<'_>) -> bool {
    part.attachment_name().is_some()
        || part
            .content_disposition()
            .is_some_and(|d| d.ctype().eq_ignore_ascii_case("attachment"))
}

/// Text of a part if it is a `text/plain` or `text/html` leaf of the wanted kind.
///
/// Bodies are decoded as UTF-8 with a Latin-1 fallback unless the part names
/// another charset.
fn part_text(msg: &Message<'_>, part: &MessagePart<'_>, kind: TextKind) -> Option<String> {
    let declared = part.content_type().map(|ct| {
        (
            ct.ctype().to_ascii_lowercase(),
            ct.subtype().unwrap_or("plain").to_ascii_lowercase(),
        )
    });
    let declared_kind = match declared.as_ref().map(|(t, s)| (t.as_str(), s.as_str())) {
        None | Some(("text", "plain")) => TextKind::Plain,
        Some(("text", "html")) => TextKind::Html,
        _ => return None,
    };
    if declared_kind != kind {
        return None;
    }

    match (&part.body, kind) {
        (PartType::Text(text), TextKind::Plain) => Some(recover_text(msg, part, text)),
        (PartType::Html(html), TextKind::Html) => Some(recover_text(msg, part, html)),
        (PartType::Binary(raw) | PartType::InlineBinary(raw), _) => Some(decode_text_bytes(raw)),
        _ => None,
    }
}

/// Redo the charset step for a part `mail-parser` decoded lossily as UTF-8.
///
/// Only parts without a charset or with a UTF-8 or ASCII charset are
/// retried. Their transfer-decoded bytes go through [`decode_text_bytes`].
fn recover_text(msg: &Message<'_>, part: &MessagePart<'_>, decoded: &str) -> String {
    if !decoded.contains(char::REPLACEMENT_CHARACTER) || !declares_utf8(part) {
        return decoded.to_string();
    }
    let Some(raw) = msg.raw_message.get(part.offset_body..part.offset_end) else {
        return decoded.to_string();
    };
    let bytes = match part.encoding {
        Encoding::None => Some(raw.to_vec()),
        Encoding::QuotedPrintable => quoted_printable_decode(raw),
        Encoding::Base64 => base64_decode(raw),
    };
    bytes.map_or_else(|| decoded.to_string(), |b| decode_text_bytes(&b))
}

fn declares_utf8(part: &MessagePart<'_>) -> bool {
    match part.content_type().and_then(|ct| ct.attribute("charset")) {
        None => true,
        Some(charset) => ["utf-8", "utf8", "us-ascii", "ascii"]
            .iter()
            .any(|c| charset.trim().eq_ignore_ascii_case(c)),
    }
}

/// Convert HTML to plain text for terminal display.
///
/// - Preserves line breaks from `<br>`, `<p>`, `<div>`
/// - Removes scripts and styles
/// - Decodes common HTML entities
/// - Collapses runs of blank lines
pub fn html_to_text(html: &str) -> String {
    let mut text = remove_tag_block(html, "script");
    text = remove_tag_block(&text, "style");

    for tag in ["br", "br/", "br /"] {
        text = text.replace(&format!("<{tag}>"), "\n");
        text = text.replace(&format!("<{}>", tag.to_uppercase()), "\n");
    }
    for tag in ["p", "div", "tr", "li", "h1", "h2", "h3", "h4", "h5", "h6", "hr"] {
        let upper = tag.to_uppercase();
        for open in [tag, upper.as_str()] {
            text = text.replace(&format!("<{open}>"), "\n");
            text = text.replace(&format!("<{open} "), "\n<");
            text = text.replace(&format!("</{open}>"), "\n");
        }
    }

    let mut stripped = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => stripped.push(ch),
            _ => {}
        }
    }

    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&#160;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&");

    let mut cleaned = String::with_capacity(decoded.len());
    let mut prev_was_blank = false;
    for line in decoded.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !prev_was_blank {
                cleaned.push('\n');
                prev_was_blank = true;
            }
        } else {
            cleaned.push_str(trimmed);
            cleaned.push('\n');
            prev_was_blank = false;
        }
    }

    cleaned.trim().to_string()
}

/// Remove an entire tag block (e.g. `<script>…</script>`), case-insensitively.
fn remove_tag_block(html: &str, tag: &str) -> String {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let lower = html.to_ascii_lowercase();

    let mut result = String::with_capacity(html.len());
    let mut pos = 0;
    while let Some(start) = lower[pos..].find(&open).map(|s| s + pos) {
        result.push_str(&html[pos..start]);
        match lower[start..].find(&close) {
            Some(end) => pos = start + end + close.len(),
            None => return result,
        }
    }
    result.push_str(&html[pos..]);
    result
}
