/* src/router/core/rust/src/path.rs */

use std::collections::BTreeMap;
use std::sync::OnceLock;

use percent_encoding::{AsciiSet, CONTROLS, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;
use serde::Deserialize;

/// Param name to decoded value. Splats are stored under both `*` and `_splat`.
pub type Params = BTreeMap<String, String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
  Pathname,
  Param,
  Wildcard,
  OptionalParam,
}

/// One parsed segment of a route pattern. For params `value` is the bare
/// name (no `$`); the root and trailing slashes are `Pathname` segments with
/// value `/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segment {
  pub kind: SegmentKind,
  pub value: String,
  pub prefix: Option<String>,
  pub suffix: Option<String>,
}

impl Segment {
  fn pathname(value: impl Into<String>) -> Self {
    Self { kind: SegmentKind::Pathname, value: value.into(), prefix: None, suffix: None }
  }

  fn slash() -> Self {
    Self::pathname("/")
  }

  pub fn is_slash(&self) -> bool {
    self.kind == SegmentKind::Pathname && self.value == "/"
  }

  pub fn has_affixes(&self) -> bool {
    self.prefix.is_some() || self.suffix.is_some()
  }

  fn affixes(&self) -> (&str, &str) {
    (self.prefix.as_deref().unwrap_or(""), self.suffix.as_deref().unwrap_or(""))
  }

  /// Render the segment back into pattern syntax.
  pub fn to_pattern(&self) -> String {
    let (prefix, suffix) = self.affixes();
    match self.kind {
      SegmentKind::Pathname => self.value.clone(),
      SegmentKind::Param if self.has_affixes() => format!("{prefix}{{${}}}{suffix}", self.value),
      SegmentKind::Param => format!("${}", self.value),
      SegmentKind::OptionalParam => format!("{prefix}{{-${}}}{suffix}", self.value),
      SegmentKind::Wildcard if self.has_affixes() => format!("{prefix}{{$}}{suffix}"),
      SegmentKind::Wildcard => "$".to_string(),
    }
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailingSlash {
  Never,
  Always,
  #[default]
  Preserve,
}

// -- encoding --------------------------------------------------------------

const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
  .remove(b'-')
  .remove(b'_')
  .remove(b'.')
  .remove(b'!')
  .remove(b'~')
  .remove(b'*')
  .remove(b'\'')
  .remove(b'(')
  .remove(b')');

const URI: &AsciiSet = &URI_COMPONENT
  .remove(b';')
  .remove(b',')
  .remove(b'/')
  .remove(b'?')
  .remove(b':')
  .remove(b'@')
  .remove(b'&')
  .remove(b'=')
  .remove(b'+')
  .remove(b'$')
  .remove(b'#');

const PATH_LIKE: &AsciiSet = &CONTROLS.add(b' ');

const HREF_PATH: &AsciiSet = &PATH_LIKE.add(b'?').add(b'#');

const URI_RESERVED: &[u8] = b";/?:@&=+$,#";

pub fn encode_uri_component(input: &str) -> String {
  utf8_percent_encode(input, URI_COMPONENT).to_string()
}

pub fn encode_uri(input: &str) -> String {
  utf8_percent_encode(input, URI).to_string()
}

/// Encode whitespace and non-ASCII only; every other ASCII byte is kept.
pub fn encode_path_like_url(path: &str) -> String {
  utf8_percent_encode(path, PATH_LIKE).to_string()
}

fn hex_value(b: u8) -> Option<u8> {
  match b {
    b'0'..=b'9' => Some(b - b'0'),
    b'a'..=b'f' => Some(b - b'a' + 10),
    b'A'..=b'F' => Some(b - b'A' + 10),
    _ => None,
  }
}

/// Percent-decode runs of `%XX` escapes. Escapes whose byte satisfies `keep`
/// stay verbatim, as do malformed escapes and runs that are not valid UTF-8.
fn decode_with(input: &str, keep: impl Fn(u8) -> bool) -> String {
  let bytes = input.as_bytes();
  let mut out = String::with_capacity(input.len());
  let mut i = 0;
  let mut literal_start = 0;

  while i < bytes.len() {
    if bytes[i] != b'%' {
      i += 1;
      continue;
    }
    out.push_str(&input[literal_start..i]);
    let run_start = i;
    let mut decoded = Vec::new();
    while bytes.get(i) == Some(&b'%') {
      let (Some(hi), Some(lo)) =
        (bytes.get(i + 1).copied().and_then(hex_value), bytes.get(i + 2).copied().and_then(hex_value))
      else {
        break;
      };
      let byte = (hi << 4) | lo;
      if keep(byte) {
        break;
      }
      decoded.push(byte);
      i += 3;
    }
    if decoded.is_empty() {
      // kept or malformed escape: copy the three (or one) raw bytes through
      let kept = bytes.get(i + 1).copied().and_then(hex_value).is_some()
        && bytes.get(i + 2).copied().and_then(hex_value).is_some();
      let end = if kept { i + 3 } else { i + 1 };
      out.push_str(&input[i..end]);
      i = end;
    } else {
      match std::str::from_utf8(&decoded) {
        Ok(s) => out.push_str(s),
        Err(_) => out.push_str(&input[run_start..i]),
      }
    }
    literal_start = i;
  }
  out.push_str(&input[literal_start..]);
  out
}

pub fn decode_uri_component(input: &str) -> String {
  decode_with(input, |_| false)
}

pub fn decode_uri(input: &str) -> String {
  decode_with(input, |b| URI_RESERVED.contains(&b))
}

fn decode_segment(part: &str) -> String {
  decode_with(part, |b| b == b'%' || URI_RESERVED.contains(&b))
}

/// `decodeURI` semantics: reserved escapes stay verbatim, and a malformed
/// escape or invalid UTF-8 anywhere fails the whole input.
fn decode_uri_strict(input: &str) -> Option<String> {
  let bytes = input.as_bytes();
  let mut out = Vec::with_capacity(bytes.len());
  let mut i = 0;
  while i < bytes.len() {
    if bytes[i] != b'%' {
      out.push(bytes[i]);
      i += 1;
      continue;
    }
    let hi = bytes.get(i + 1).copied().and_then(hex_value)?;
    let lo = bytes.get(i + 2).copied().and_then(hex_value)?;
    let byte = (hi << 4) | lo;
    if URI_RESERVED.contains(&byte) {
      out.extend_from_slice(&bytes[i..i + 3]);
    } else {
      out.push(byte);
    }
    i += 3;
  }
  String::from_utf8(out).ok()
}

fn is_kept_escape(rest: &[u8]) -> bool {
  const KEPT: [&[u8]; 3] = [b"%25", b"%5C", b"%2F"];
  rest.get(..3).is_some_and(|e| KEPT.iter().any(|k| e.eq_ignore_ascii_case(k)))
}

fn push_decoded_piece(out: &mut String, piece: &str) {
  match decode_uri_strict(piece) {
    Some(decoded) => out.push_str(&decoded),
    None => out.push_str(piece),
  }
}

/// Decode a location pathname. `%25`, `%5C` and `%2F` stay encoded so that a
/// literal percent, backslash or slash inside a segment survives a round trip
/// through `href`. The text between those escapes is decoded like `decodeURI`
/// (so `%3F` and `%23` stay encoded too); a piece with a malformed escape is
/// kept as-is. Control characters are dropped and a leading `//` collapses,
/// so a decoded path can never become protocol-relative.
pub fn decode_path(path: &str) -> String {
  let bytes = path.as_bytes();
  let mut decoded = String::with_capacity(path.len());
  let mut piece_start = 0;
  let mut i = 0;
  while i < bytes.len() {
    if is_kept_escape(&bytes[i..]) {
      push_decoded_piece(&mut decoded, &path[piece_start..i]);
      decoded.push_str(&path[i..i + 3]);
      i += 3;
      piece_start = i;
    } else {
      i += 1;
    }
  }
  push_decoded_piece(&mut decoded, &path[piece_start..]);
  let mut out: String = decoded.chars().filter(|c| !c.is_control()).collect();
  while out.starts_with("//") {
    out.remove(0);
  }
  out
}

/// Pathname form used inside an `href`: like [`encode_path_like_url`], plus
/// `?` and `#` so the path cannot leak into the query or fragment.
pub fn encode_href_path(pathname: &str) -> String {
  utf8_percent_encode(pathname, HREF_PATH).to_string()
}

/// One-shot match of `pathname` against `pattern` under `basepath`.
pub fn match_by_path(
  basepath: &str,
  pathname: &str,
  pattern: &str,
  options: MatchOptions,
) -> Option<Params> {
  if basepath != "/" && !pathname.starts_with(basepath) {
    return None;
  }
  let from = remove_basepath(basepath, pathname, options.case_sensitive);
  let to = remove_basepath(basepath, pattern, options.case_sensitive);
  Matcher::compile(&to, options).match_path(&from)
}

fn strip_affixes<'a>(value: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
  if value.len() < prefix.len() + suffix.len() || !value.starts_with(prefix) || !value.ends_with(suffix) {
    return None;
  }
  Some(&value[prefix.len()..value.len() - suffix.len()])
}

fn is_match(base: &[String], route: &[Segment], params: &mut Params, options: MatchOptions) -> bool {
  let mut bi = 0;
  let mut ri = 0;

  while bi < base.len() || ri < route.len() {
    let base_seg = base.get(bi).map(String::as_str);

    let Some(segment) = route.get(ri) else {
      // pattern exhausted with pathname left over
      let rest = join_paths(base[bi..].iter().map(String::as_str));
      params.insert("**".to_string(), rest);
      return options.fuzzy && route.last().is_none_or(|s| s.value != "/");
    };

    let (prefix, suffix) = segment.affixes();
    match segment.kind {
      SegmentKind::Wildcard => {
        let mut splat = decode_uri(&join_paths(base[bi..].iter().map(String::as_str)));
        if segment.has_affixes() {
          let Some(first) = base_seg else { return false };
          if !first.starts_with(prefix) || !base.last().is_some_and(|l| l.ends_with(suffix)) {
            return false;
          }
          if let Some(rest) = splat.strip_prefix(prefix) {
            splat = rest.to_string();
          }
          if let Some(rest) = splat.strip_suffix(suffix) {
            splat = rest.to_string();
          }
        }
        params.insert("*".to_string(), splat.clone());
        params.insert("_splat".to_string(), splat);
        return true;
      }
      SegmentKind::Pathname => {
        if segment.value == "/" && base_seg.is_none_or(str::is_empty) {
          ri += 1;
          continue;
        }
        let Some(value) = base_seg else { return false };
        let equal = if options.case_sensitive {
          segment.value == value
        } else {
          segment.value.to_lowercase() == value.to_lowercase()
        };
        if !equal {
          return false;
        }
        bi += 1;
        ri += 1;
      }
      SegmentKind::Param => {
        let Some(value) = base_seg.filter(|v| *v != "/") else { return false };
        let Some(raw) = strip_affixes(value, prefix, suffix) else { return false };
        params.insert(segment.value.clone(), decode_uri_component(raw));
        bi += 1;
        ri += 1;
      }
      SegmentKind::OptionalParam => {
        ri += 1;
        let Some(value) = base_seg.filter(|v| *v != "/") else { continue };
        let matched = if segment.has_affixes() {
          strip_affixes(value, prefix, suffix)
        } else {
          // skip the optional when the pathname segment belongs to a later static segment
          let mut take = true;
          for future in &route[ri..] {
            if future.kind == SegmentKind::Pathname && future.value == value {
              take = false;
              break;
            }
            if matches!(future.kind, SegmentKind::Param | SegmentKind::Wildcard) {
              take = base.len() >= route.len();
              break;
            }
          }
          take.then_some(value)
        };
        if let Some(raw) = matched {
          params.insert(segment.value.clone(), decode_uri_component(raw));
          bi += 1;
        }
      }
    }
  }
  true
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params(pairs: &[(&str, &str)]) -> Params {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
  }

  fn m(pattern: &str, path: &str) -> Option<Params> {
    Matcher::compile(pattern, MatchOptions::default()).match_path(path)
  }

  #[test]
  fn parse_segment_kinds() {
    let segs = parse_pathname("/files/pre{$id}.txt/{-$tab}/$");
    let kinds: Vec<_> = segs.iter().map(|s| s.kind).collect();
    assert_eq!(
      kinds,
      vec![
        SegmentKind::Pathname,
        SegmentKind::Pathname,
        SegmentKind::Param,
        SegmentKind::OptionalParam,
        SegmentKind::Wildcard,
      ]
    );
    assert_eq!(segs[2].value, "id");
    assert_eq!(segs[2].prefix.as_deref(), Some("pre"));
    assert_eq!(segs[2].suffix.as_deref(), Some(".txt"));
  }

  #[test]
  fn trailing_slash_becomes_segment() {
    let segs = parse_pathname("/posts/");
    assert_eq!(segs.len(), 3);
    assert!(segs[2].is_slash());
  }

  #[test]
  fn pattern_round_trip() {
    for pattern in ["$id", "pre{$id}suf", "{-$tab}", "a{-$tab}", "$", "x{$}"] {
      assert_eq!(parse_part(pattern).to_pattern(), pattern);
    }
  }

  #[test]
  fn required_param_match() {
    assert_eq!(m("/posts/$postId", "/posts/123"), Some(params(&[("postId", "123")])));
    assert_eq!(m("/posts/$postId", "/posts"), None);
  }

  #[test]
  fn optional_param_omission() {
    let pattern = "/users/$id/{-$tab}";
    assert_eq!(m(pattern, "/users/1"), Some(params(&[("id", "1")])));
    assert_eq!(m(pattern, "/users/1/settings"), Some(params(&[("id", "1"), ("tab", "settings")])));
  }

  #[test]
  fn optional_param_yields_to_later_static() {
    let pattern = "/{-$lang}/about";
    assert_eq!(m(pattern, "/about"), Some(Params::new()));
    assert_eq!(m(pattern, "/en/about"), Some(params(&[("lang", "en")])));
  }

  #[test]
  fn optional_param_with_affixes() {
    let pattern = "/files/pre{-$name}.txt";
    assert_eq!(m(pattern, "/files/prereadme.txt"), Some(params(&[("name", "readme")])));
    assert_eq!(m(pattern, "/files"), Some(Params::new()));
  }

  #[test]
  fn affixes_must_not_overlap() {
    assert_eq!(m("/pre{$id}e", "/pre"), None);
    assert_eq!(m("/pre{$id}e", "/prexe"), Some(params(&[("id", "x")])));
    assert_eq!(m("/files/ab{-$name}ba", "/files/aba"), None);
  }

  #[test]
  fn wildcard_binds_star_and_splat() {
    let got = m("/docs/$", "/docs/a/b/c").unwrap();
    assert_eq!(got.get("*").map(String::as_str), Some("a/b/c"));
    assert_eq!(got.get("_splat").map(String::as_str), Some("a/b/c"));
  }

  #[test]
  fn wildcard_with_prefix_and_suffix() {
    let got = m("/assets/img-{$}.png", "/assets/img-logo.png").unwrap();
    assert_eq!(got.get("_splat").map(String::as_str), Some("logo"));
    assert_eq!(m("/assets/img-{$}.png", "/assets/logo.png"), None);
  }

  #[test]
  fn index_route_matches_empty_remainder() {
    assert_eq!(m("/posts/", "/posts"), Some(Params::new()));
    assert_eq!(m("/", "/"), Some(Params::new()));
  }

  #[test]
  fn case_insensitive_by_default() {
    assert!(m("/About", "/about").is_some());
    let strict = Matcher::compile("/About", MatchOptions { case_sensitive: true, ..Default::default() });
    assert!(strict.match_path("/about").is_none());
  }

  #[test]
  fn fuzzy_reports_remainder() {
    let fuzzy = Matcher::compile("/posts", MatchOptions { fuzzy: true, ..Default::default() });
    let got = fuzzy.match_path("/posts/1/edit").unwrap();
    assert_eq!(got.get("**").map(String::as_str), Some("1/edit"));
    assert!(m("/posts", "/posts/1").is_none());
  }

  #[test]
  fn params_are_percent_decoded() {
    assert_eq!(m("/u/$name", "/u/caf%C3%A9"), Some(params(&[("name", "café")])));
    assert_eq!(m("/u/$name", "/u/foo%2Fabc"), Some(params(&[("name", "foo/abc")])));
    assert_eq!(m("/u/$name", "/u/100%25"), Some(params(&[("name", "100%")])));
  }

  #[test]
  fn basepath_is_removed_before_matching() {
    let got = match_by_path("/app", "/app/posts/7", "/app/posts/$id", MatchOptions::default());
    assert_eq!(got, Some(params(&[("id", "7")])));
    assert_eq!(match_by_path("/app", "/other/posts/7", "/posts/$id", MatchOptions::default()), None);
  }

  #[test]
  fn resolve_path_algebra() {
    let p = TrailingSlash::Never;
    assert_eq!(resolve_path("/", "/a/b/c", "../../..", p), "/");
    assert_eq!(resolve_path("/", "/", "./a/b", p), "/a/b");
    assert_eq!(resolve_path("/", "/a/b/c", "./d", p), "/a/b/c/d");
    assert_eq!(resolve_path("/", "/a/b/c", "../d", p), "/a/b/d");
    assert_eq!(resolve_path("/", "/a/b/c", "/d", p), "/d");
    assert_eq!(resolve_path("/", "/a/b/c", "d/e", p), "/a/b/c/d/e");
    assert_eq!(resolve_path("/", "/a/b/c", "./d/", p), "/a/b/c/d");
  }

  #[test]
  fn resolve_path_trailing_slash_policies() {
    assert_eq!(resolve_path("/", "/a", "./b/", TrailingSlash::Preserve), "/a/b/");
    assert_eq!(resolve_path("/", "/a", "./b", TrailingSlash::Preserve), "/a/b");
    assert_eq!(resolve_path("/", "/a", "./b", TrailingSlash::Always), "/a/b/");
  }

  #[test]
  fn resolve_path_with_basepath() {
    assert_eq!(resolve_path("/app", "/app/a", "./b", TrailingSlash::Never), "/app/a/b");
  }

  #[test]
  fn interpolate_encodes_and_reports_missing() {
    let got = interpolate_path("/posts/$id", &params(&[("id", "a b/c")]), false);
    assert_eq!(got.path, "/posts/a%20b%2Fc");
    assert!(!got.is_missing_params);

    let missing = interpolate_path("/posts/$id", &Params::new(), false);
    assert_eq!(missing.path, "/posts/undefined");
    assert!(missing.is_missing_params);
  }

  #[test]
  fn interpolate_drops_missing_optional_unit() {
    let got = interpolate_path("/files/pre{-$name}.txt/end", &Params::new(), false);
    assert_eq!(got.path, "/files/end");
    let got = interpolate_path("/files/pre{-$name}.txt", &params(&[("name", "x")]), false);
    assert_eq!(got.path, "/files/prex.txt");
  }

  #[test]
  fn interpolate_splat_and_leave_wildcards() {
    let p = params(&[("_splat", "a/b c")]);
    assert_eq!(interpolate_path("/docs/$", &p, false).path, "/docs/a/b%20c");
    assert_eq!(interpolate_path("/docs/$", &p, true).path, "/docs/$a/b%20c");
  }

  #[test]
  fn build_then_match_round_trips() {
    let pattern = "/org/$org/repo/$repo";
    for values in [("acme", "core"), ("a b", "x/y"), ("100%", "café"), ("a?b", "c#d")] {
      let input = params(&[("org", values.0), ("repo", values.1)]);
      let href = decode_path(&interpolate_path(pattern, &input, false).path);
      assert_eq!(m(pattern, &href), Some(input));
    }
  }

  #[test]
  fn decode_path_keeps_reserved_escapes() {
    assert_eq!(decode_path("/x=%D1%88%D0%B5%5C%D0%BB"), "/x=ше%5Cл");
    assert_eq!(decode_path("test%25%25end"), "test%25%25end");
    assert_eq!(decode_path("/named/foo%2Fabc/c%5C%2f%5cAh"), "/named/foo%2Fabc/c%5C%2f%5cAh");
    assert_eq!(decode_path("path%ZZ%D1%88test%5C%C3%A9"), "path%ZZ%D1%88test%5Cé");
    assert_eq!(decode_path("/files/a%3Fb%23c%20d"), "/files/a%3Fb%23c d");
    assert_eq!(decode_path("/bad/%E0%A4%A/ok"), "/bad/%E0%A4%A/ok");
    assert_eq!(decode_path(""), "");
  }

  #[test]
  fn decode_path_prevents_protocol_relative_results() {
    assert_eq!(decode_path("/%0d/google.com/"), "/google.com/");
    assert_eq!(decode_path("/%0d%0a/evil.com/"), "/evil.com/");
    assert_eq!(decode_path("/%00/test/"), "/test/");
    assert_eq!(decode_path("//"), "/");
    assert_eq!(decode_path("/users/profile/"), "/users/profile/");
  }

  #[test]
  fn encode_path_like_url_only_touches_whitespace_and_non_ascii() {
    assert_eq!(encode_path_like_url("/path/caf\u{e9}"), "/path/caf%C3%A9");
    assert_eq!(encode_path_like_url("/path/file name.pdf"), "/path/file%20name.pdf");
    assert_eq!(encode_path_like_url("/path/file[1].pdf"), "/path/file[1].pdf");
    assert_eq!(encode_path_like_url("/path#section"), "/path#section");
    assert_eq!(encode_path_like_url("/path/\u{1F600}/file"), "/path/%F0%9F%98%80/file");
  }

  #[test]
  fn path_helpers() {
    assert_eq!(clean_path("/a//b///c"), "/a/b/c");
    assert_eq!(join_paths(["/", "a", "/b"]), "/a/b");
    assert_eq!(trim_path("/a/b/"), "a/b");
    assert_eq!(trim_path_left("/"), "/");
    assert!(exact_path_test("/a/", "/a", "/"));
    assert_eq!(remove_basepath("/app", "/app", false), "");
    assert_eq!(remove_basepath("/app", "/application", false), "/application");
  }
}
