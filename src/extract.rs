//! Pulls headers and a readable body out of a full Gmail message resource.
//!
//! Body data arrives already reversed from Gmail's base64url transport
//! encoding (the client library decodes it while deserializing), so only the
//! UTF-8 decoding happens here, lossily.

use google_gmail1::api::{Message as ApiMessage, MessagePart};
use tracing::trace;

type BodyStrategy = fn(&ApiMessage) -> Option<String>;

/// Tried in order; the first strategy producing a body wins.
const BODY_STRATEGIES: [(&str, BodyStrategy); 4] = [
    ("inline", inline_body),
    ("text/plain", plain_text_part),
    ("text/html", html_part),
    ("snippet", snippet),
];

/// First header whose name matches exactly (case-sensitive).
pub fn header_value(payload: Option<&MessagePart>, name: &str) -> Option<String> {
    payload?
        .headers
        .as_ref()?
        .iter()
        .find(|h| h.name.as_deref() == Some(name))
        .and_then(|h| h.value.clone())
}

pub fn extract_body(msg: &ApiMessage) -> String {
    BODY_STRATEGIES
        .iter()
        .find_map(|(name, strategy)| {
            let body = strategy(msg)?;
            trace!(strategy = *name, "body extracted");
            Some(body)
        })
        .unwrap_or_default()
}

fn inline_body(msg: &ApiMessage) -> Option<String> {
    let payload = msg.payload.as_ref()?;
    if is_multipart(payload) {
        return None;
    }
    part_data(payload)
}

fn plain_text_part(msg: &ApiMessage) -> Option<String> {
    first_part_of_type(msg, "text/plain")
}

fn html_part(msg: &ApiMessage) -> Option<String> {
    first_part_of_type(msg, "text/html")
}

fn snippet(msg: &ApiMessage) -> Option<String> {
    msg.snippet.clone()
}

fn is_multipart(part: &MessagePart) -> bool {
    let declared = part
        .mime_type
        .as_deref()
        .is_some_and(|m| m.to_ascii_lowercase().starts_with("multipart/"));
    declared || part.parts.as_ref().is_some_and(|p| !p.is_empty())
}

/// Depth-first in provider order, so a text part nested inside
/// `multipart/alternative` is still found.
fn first_part_of_type(msg: &ApiMessage, mime_type: &str) -> Option<String> {
    let parts = msg.payload.as_ref()?.parts.as_ref()?;
    parts.iter().find_map(|p| find_in_part(p, mime_type))
}

fn find_in_part(part: &MessagePart, mime_type: &str) -> Option<String> {
    let matches = part
        .mime_type
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case(mime_type));
    if matches {
        if let Some(body) = part_data(part) {
            return Some(body);
        }
    }

    part.parts
        .as_ref()?
        .iter()
        .find_map(|p| find_in_part(p, mime_type))
}

fn part_data(part: &MessagePart) -> Option<String> {
    let data = part.body.as_ref()?.data.as_ref()?;
    if data.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(data).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_gmail1::api::{MessagePartBody, MessagePartHeader};

    fn part(mime: &str, data: Option<&[u8]>) -> MessagePart {
        MessagePart {
            mime_type: Some(mime.to_string()),
            body: Some(MessagePartBody {
                data: data.map(|d| d.to_vec()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn multipart(parts: Vec<MessagePart>) -> MessagePart {
        MessagePart {
            mime_type: Some("multipart/alternative".to_string()),
            body: Some(MessagePartBody::default()),
            parts: Some(parts),
            ..Default::default()
        }
    }

    fn message(payload: MessagePart, snippet: Option<&str>) -> ApiMessage {
        ApiMessage {
            payload: Some(payload),
            snippet: snippet.map(String::from),
            ..Default::default()
        }
    }

    fn header(name: &str, value: &str) -> MessagePartHeader {
        MessagePartHeader {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
        }
    }

    #[test]
    fn test_simple_message_uses_inline_body() {
        let msg = message(part("text/plain", Some(b"hello there")), Some("hello"));
        assert_eq!(extract_body(&msg), "hello there");
    }

    #[test]
    fn test_plain_part_wins_over_html() {
        let msg = message(
            multipart(vec![
                part("text/html", Some(b"<p>hi</p>")),
                part("text/plain", Some(b"hi")),
            ]),
            None,
        );
        assert_eq!(extract_body(&msg), "hi");
    }

    #[test]
    fn test_html_part_used_when_no_plain_text() {
        let msg = message(multipart(vec![part("text/html", Some(b"<p>hi</p>"))]), None);
        assert_eq!(extract_body(&msg), "<p>hi</p>");
    }

    #[test]
    fn test_plain_part_without_data_is_skipped() {
        let msg = message(
            multipart(vec![
                part("text/plain", None),
                part("text/html", Some(b"<b>body</b>")),
            ]),
            None,
        );
        assert_eq!(extract_body(&msg), "<b>body</b>");
    }

    #[test]
    fn test_nested_alternative_is_searched() {
        let mixed = MessagePart {
            mime_type: Some("multipart/mixed".to_string()),
            parts: Some(vec![
                multipart(vec![part("text/plain", Some(b"nested"))]),
                part("application/pdf", None),
            ]),
            ..Default::default()
        };
        assert_eq!(extract_body(&message(mixed, None)), "nested");
    }

    #[test]
    fn test_snippet_is_last_resort() {
        let msg = message(
            multipart(vec![part("image/png", None)]),
            Some("Quick &amp; short"),
        );
        assert_eq!(extract_body(&msg), "Quick &amp; short");
    }

    #[test]
    fn test_no_body_and_no_snippet_is_empty() {
        let msg = ApiMessage::default();
        assert_eq!(extract_body(&msg), "");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let msg = message(part("text/plain", Some(&[b'o', b'k', 0xff])), None);
        assert_eq!(extract_body(&msg), "ok\u{fffd}");
    }

    #[test]
    fn test_header_lookup_is_exact_and_first_wins() {
        let payload = MessagePart {
            headers: Some(vec![
                header("from", "lower@example.com"),
                header("From", "Ada <ada@example.com>"),
                header("From", "second@example.com"),
            ]),
            ..Default::default()
        };
        assert_eq!(
            header_value(Some(&payload), "From").as_deref(),
            Some("Ada <ada@example.com>")
        );
        assert_eq!(header_value(Some(&payload), "Subject"), None);
        assert_eq!(header_value(None, "From"), None);
    }
}
