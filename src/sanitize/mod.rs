use html2text::from_read;
use mailparse::{MailHeaderMap, ParsedMail};

use crate::types::MessageContent;

/// Marker appended to bodies cut down to the classification bound.
pub const TRUNCATION_MARKER: &str = "...";

/// Pull subject, sender and readable text out of a raw RFC 822 message.
/// Unparseable input falls back to the raw bytes as lossy text.
pub fn extract_content(raw_bytes: &[u8]) -> MessageContent {
    match mailparse::parse_mail(raw_bytes) {
        Ok(parsed) => MessageContent {
            subject: parsed.headers.get_first_value("Subject").unwrap_or_default(),
            from: parsed.headers.get_first_value("From").unwrap_or_default(),
            body: extract_text(&parsed).trim().to_string(),
        },
        Err(_) => MessageContent {
            body: String::from_utf8_lossy(raw_bytes).trim().to_string(),
            ..MessageContent::default()
        },
    }
}

/// Prefer every `text/plain` part, then every `text/html` part rendered as
/// text, then whatever a single-part message's body holds.
fn extract_text(parsed: &ParsedMail) -> String {
    let mut plain = Vec::new();
    let mut html = Vec::new();
    collect_texts(parsed, &mut plain, &mut html);

    let plain: Vec<_> = plain.into_iter().filter(|t| !t.trim().is_empty()).collect();
    if !plain.is_empty() {
        return plain.join("\n\n");
    }
    let html: Vec<_> = html.into_iter().filter(|t| !t.trim().is_empty()).collect();
    if !html.is_empty() {
        return html_to_text(html.join("\n\n").as_bytes());
    }

    if !parsed.subparts.is_empty() || is_attachment(parsed) {
        return String::new();
    }
    let body = parsed.get_body().unwrap_or_default();
    if parsed.ctype.mimetype.eq_ignore_ascii_case("text/html") {
        return html_to_text(body.as_bytes());
    }
    body
}

fn collect_texts(part: &ParsedMail, plain: &mut Vec<String>, html: &mut Vec<String>) {
    for sub in &part.subparts {
        collect_texts(sub, plain, html);
    }
    if !part.subparts.is_empty() || is_attachment(part) {
        return;
    }
    let mime = part.ctype.mimetype.to_ascii_lowercase();
    if mime.starts_with("text/plain") {
        plain.push(part.get_body().unwrap_or_default());
    } else if mime.starts_with("text/html") {
        html.push(part.get_body().unwrap_or_default());
    }
}

fn is_attachment(part: &ParsedMail) -> bool {
    part.get_content_disposition().disposition == mailparse::DispositionType::Attachment
}

fn html_to_text(html: &[u8]) -> String {
    from_read(html, 80).unwrap_or_default()
}

/// Cut `body` to at most `max_chars` characters. A pure prefix cut, so the
/// same message always yields the same classifier input.
pub fn truncate_body(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &body[..byte_idx], TRUNCATION_MARKER),
        None => body.to_string(),
    }
}
