/* src/server/injector/rust/src/helpers.rs */

/// Escape text for embedding inside an inline `<script>` element.
///
/// The output stays a valid JSON/JS string body: `<`, `>` and `&` become
/// `\u003c`, `\u003e` and `\u0026`, so no `</script>` or `<!--` sequence can
/// survive. U+2028 and U+2029 are escaped because pre-ES2019 engines treat
/// them as line terminators inside string literals.
pub fn escape_html(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for ch in s.chars() {
    match ch {
      '<' => out.push_str("\\u003c"),
      '>' => out.push_str("\\u003e"),
      '&' => out.push_str("\\u0026"),
      '\u{2028}' => out.push_str("\\u2028"),
      '\u{2029}' => out.push_str("\\u2029"),
      c => out.push(c),
    }
  }
  out
}

/// Byte offset of the last `</body>` (ASCII case-insensitive).
pub(crate) fn find_body_close(html: &str) -> Option<usize> {
  const TAG: &[u8] = b"</body>";
  let bytes = html.as_bytes();
  if bytes.len() < TAG.len() {
    return None;
  }
  (0..=bytes.len() - TAG.len()).rev().find(|&i| bytes[i..i + TAG.len()].eq_ignore_ascii_case(TAG))
}
