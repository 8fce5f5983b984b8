/* src/server/injector/rust/src/render.rs */

use crate::helpers::{escape_html, find_body_close};

pub const STATE_GLOBAL: &str = "__ROUTER_STATE__";

const SCRIPT_OPEN: &str = "<script>window.__ROUTER_STATE__ = JSON.parse(";
const SCRIPT_CLOSE: &str = ")</script>";

/// A document cut at its closing `</body>`; `tail` starts with the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentParts<'a> {
  pub head: &'a str,
  pub tail: &'a str,
}

/// Split at the last `</body>`. Documents without one keep everything in
/// `head` so injected content lands at the end.
pub fn split_document(html: &str) -> DocumentParts<'_> {
  match find_body_close(html) {
    Some(pos) => DocumentParts { head: &html[..pos], tail: &html[pos..] },
    None => DocumentParts { head: html, tail: "" },
  }
}

/// Inline script assigning the JSON text `payload` to `window.__ROUTER_STATE__`.
pub fn state_script(payload: &str) -> String {
  let literal = serde_json::Value::String(payload.to_string()).to_string();
  format!("{SCRIPT_OPEN}{}{SCRIPT_CLOSE}", escape_html(&literal))
}

pub fn inject_state(html: &str, payload: &str) -> String {
  let parts = split_document(html);
  let script = state_script(payload);
  let mut out = String::with_capacity(html.len() + script.len());
  out.push_str(parts.head);
  out.push_str(&script);
  out.push_str(parts.tail);
  out
}

/// Recover the payload written by [`inject_state`]. Returns `None` when the
/// document carries no state script or the literal is damaged.
pub fn extract_state(html: &str) -> Option<String> {
  let start = html.rfind(SCRIPT_OPEN)? + SCRIPT_OPEN.len();
  let len = html[start..].find(SCRIPT_CLOSE)?;
  serde_json::from_str::<String>(&html[start..start + len]).ok()
}

#[cfg(test)]
mod tests {
  use super::*;

  const SHELL: &str = "<html><head></head><body><div id=\"app\"></div></body></html>";

  #[test]
  fn script_goes_before_body_close() {
    let html = inject_state(SHELL, r#"{"a":1}"#);
    assert!(html.starts_with("<html><head></head><body><div id=\"app\"></div><script>"));
    assert!(html.ends_with("</script></body></html>"));
    assert!(html.contains(r#"JSON.parse("{\"a\":1}")"#));
  }

  #[test]
  fn shell_without_body_appends() {
    let html = inject_state("<p>hi</p>", "1");
    assert_eq!(html, "<p>hi</p><script>window.__ROUTER_STATE__ = JSON.parse(\"1\")</script>");
  }

  #[test]
  fn payload_cannot_close_the_script() {
    let payload = r#"{"title":"</script><script>alert(1)</script>"}"#;
    let html = inject_state(SHELL, payload);
    assert_eq!(html.matches("</script>").count(), 1);
    assert_eq!(extract_state(&html).as_deref(), Some(payload));
  }

  #[test]
  fn state_round_trips_through_the_document() {
    let payload = "{\"sep\":\"\u{2028}\",\"amp\":\"&amp;\",\"quote\":\"\\\"\"}";
    let html = inject_state(SHELL, payload);
    assert_eq!(extract_state(&html).as_deref(), Some(payload));
  }

  #[test]
  fn split_uses_the_last_body_close() {
    let html = "<body><template></body></template></body>";
    let parts = split_document(html);
    assert_eq!(parts.tail, "</body>");
    assert_eq!(parts.head.len() + parts.tail.len(), html.len());
  }

  #[test]
  fn missing_state_is_none() {
    assert_eq!(extract_state(SHELL), None);
    assert_eq!(extract_state("<script>window.__ROUTER_STATE__ = JSON.parse(oops)</script>"), None);
  }
}
