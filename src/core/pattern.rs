//! URL path pattern matching with named captures.
//!
//! Patterns are literal paths that may embed capture tokens of the form
//! `:name`, where the name consists of letters, digits and underscores. A
//! capture binds the longest run of bytes containing neither `/` nor the
//! literal byte that follows the token in the pattern; the empty string is a
//! legal binding. A pattern ending in `/` is a prefix pattern: once the
//! pattern is exhausted, any remaining path (the *tail*) is accepted.
//!
//! Examples:
//!
//! * `/hello/:name` matches `/hello/blake` with `:name = blake` but not
//!   `/hello/blake/foo`.
//! * `/hello/:name/` matches `/hello/blake/foo` and exposes `foo` as tail.
//! * `/foo/:a:b` against `/foo/val1:val2` binds `:a = val1`, `:b = :val2`.
use std::collections::BTreeMap;

/// Captured path parameters, keyed by the colon-prefixed capture name.
/// Duplicate names accumulate values in match order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures {
    values: BTreeMap<String, Vec<String>>,
}

impl Captures {
    fn add(&mut self, name: &str, value: String) {
        self.values
            .entry(format!(":{name}"))
            .or_default()
            .push(value);
    }

    /// First value bound to the colon-prefixed key, e.g. `get(":name")`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .and_then(|vs| vs.first())
            .map(String::as_str)
    }

    /// All values bound to the colon-prefixed key, in match order.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.values.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.values.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Encode as a query-string fragment. Capture names keep their leading
    /// colon verbatim; names and values are otherwise form-encoded. Keys are
    /// emitted in sorted order, values in match order.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (key, values) in &self.values {
            for value in values {
                if !out.is_empty() {
                    out.push('&');
                }
                out.push(':');
                for part in url::form_urlencoded::byte_serialize(key[1..].as_bytes()) {
                    out.push_str(part);
                }
                out.push('=');
                for part in url::form_urlencoded::byte_serialize(value.as_bytes()) {
                    out.push_str(part);
                }
            }
        }
        out
    }
}

/// Match `path` against `pattern`, returning the captures on success.
pub fn matches(pattern: &str, path: &str) -> Option<Captures> {
    let pat = pattern.as_bytes();
    let p = path.as_bytes();
    let mut captures = Captures::default();
    let mut i = 0;
    let mut j = 0;

    while i < p.len() {
        if j >= pat.len() {
            // Prefix patterns accept any remaining path.
            if pattern != "/" && !pat.is_empty() && pat[pat.len() - 1] == b'/' {
                return Some(captures);
            }
            return None;
        }
        if pat[j] == b':' {
            let (name, next_byte, nj) = scan(pat, j + 1, is_capture_name_byte);
            j = nj;
            let (value, _, ni) = scan(p, i, part_matcher(next_byte));
            i = ni;
            captures.add(
                std::str::from_utf8(name).ok()?,
                String::from_utf8_lossy(value).into_owned(),
            );
        } else if p[i] == pat[j] {
            i += 1;
            j += 1;
        } else {
            return None;
        }
    }

    if j != pat.len() {
        return None;
    }
    Some(captures)
}

/// For a prefix pattern (trailing `/`), the part of `path` left over once the
/// pattern is exhausted. Empty for exact patterns and non-matching paths.
///
/// `tail("/hello/:title/", "/hello/mr/mizerany")` is `"mizerany"`;
/// `tail("/:a/", "/x/y/z")` is `"y/z"`.
pub fn tail<'a>(pattern: &str, path: &'a str) -> &'a str {
    let pat = pattern.as_bytes();
    let p = path.as_bytes();
    let mut i = 0;
    let mut j = 0;

    while i < p.len() {
        if j >= pat.len() {
            if !pat.is_empty() && pat[pat.len() - 1] == b'/' {
                return &path[i..];
            }
            return "";
        }
        if pat[j] == b':' {
            let (_, next_byte, nj) = scan(pat, j + 1, is_capture_name_byte);
            j = nj;
            let (_, _, ni) = scan(p, i, part_matcher(next_byte));
            i = ni;
        } else if p[i] == pat[j] {
            i += 1;
            j += 1;
        } else {
            return "";
        }
    }
    ""
}

/// Scan `s` from `start` while `accept` holds; yields the consumed slice, the
/// terminating byte (0 at end of input) and the next index.
fn scan(s: &[u8], start: usize, accept: impl Fn(u8) -> bool) -> (&[u8], u8, usize) {
    let mut j = start;
    while j < s.len() && accept(s[j]) {
        j += 1;
    }
    let next = if j < s.len() { s[j] } else { 0 };
    (&s[start..j], next, j)
}

fn is_capture_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// A capture value runs until the byte following the token, or `/`,
/// whichever comes first.
fn part_matcher(terminator: u8) -> impl Fn(u8) -> bool {
    move |b| b != terminator && b != b'/'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(pairs: &[(&str, &[&str])]) -> Captures {
        let mut c = Captures::default();
        for (name, values) in pairs {
            for v in *values {
                c.add(name, (*v).to_string());
            }
        }
        c
    }

    #[test]
    fn match_table() {
        let table: &[(&str, &str, Option<Captures>)] = &[
            ("/", "/", Some(Captures::default())),
            ("/", "/wrong_url", None),
            ("/foo/:name", "/foo/bar", Some(caps(&[("name", &["bar"])]))),
            ("/foo/:name/baz", "/foo/bar", None),
            (
                "/foo/:name/bar/",
                "/foo/keith/bar/baz",
                Some(caps(&[("name", &["keith"])])),
            ),
            (
                "/foo/:name/bar/",
                "/foo/keith/bar/",
                Some(caps(&[("name", &["keith"])])),
            ),
            ("/foo/:name/bar/", "/foo/keith/bar", None),
            (
                "/foo/:name/baz",
                "/foo/bar/baz",
                Some(caps(&[("name", &["bar"])])),
            ),
            ("/foo/:name/baz/:id", "/foo/bar/baz", None),
            (
                "/foo/:name/baz/:id",
                "/foo/bar/baz/123",
                Some(caps(&[("name", &["bar"]), ("id", &["123"])])),
            ),
            (
                "/foo/:name/baz/:name",
                "/foo/bar/baz/123",
                Some(caps(&[("name", &["bar", "123"])])),
            ),
            (
                "/foo/:name.txt",
                "/foo/bar.txt",
                Some(caps(&[("name", &["bar"])])),
            ),
            (
                "/foo/:name",
                "/foo/:bar",
                Some(caps(&[("name", &[":bar"])])),
            ),
            (
                "/foo/:a:b",
                "/foo/val1:val2",
                Some(caps(&[("a", &["val1"]), ("b", &[":val2"])])),
            ),
            ("/foo/:a.", "/foo/.", Some(caps(&[("a", &[""])]))),
            (
                "/foo/:a:b",
                "/foo/:bar",
                Some(caps(&[("a", &[""]), ("b", &[":bar"])])),
            ),
            (
                "/foo/:a:b:c",
                "/foo/:bar",
                Some(caps(&[("a", &[""]), ("b", &[""]), ("c", &[":bar"])])),
            ),
            (
                "/foo/::name",
                "/foo/val1:val2",
                Some(caps(&[("", &["val1"]), ("name", &[":val2"])])),
            ),
            ("/foo/:name.txt", "/foo/bar/baz.txt", None),
            ("/foo/x:name", "/foo/bar", None),
            ("/foo/x:name", "/foo/xbar", Some(caps(&[("name", &["bar"])]))),
        ];

        for (i, (pattern, path, expected)) in table.iter().enumerate() {
            let got = matches(pattern, path);
            assert_eq!(
                &got, expected,
                "case {i}: pattern {pattern:?} against {path:?}"
            );
        }
    }

    #[test]
    fn tail_extraction() {
        assert_eq!(tail("/hello/:title/", "/hello/mr/mizerany"), "mizerany");
        assert_eq!(tail("/:a/", "/x/y/z"), "y/z");
        assert_eq!(tail("/foo/:name/bar/", "/foo/keith/bar/baz"), "baz");
        assert_eq!(tail("/foo/:name", "/foo/bar"), "");
        assert_eq!(tail("/foo/", "/bar/baz"), "");
    }

    #[test]
    fn encode_keeps_colon_and_sorts_keys() {
        let mut c = Captures::default();
        c.add("name", "blake".to_string());
        c.add("a", "x y".to_string());
        // BTreeMap ordering: ":a" before ":name".
        assert_eq!(c.encode(), ":a=x+y&:name=blake");
    }

    #[test]
    fn encode_repeats_duplicate_names_in_match_order() {
        let mut c = Captures::default();
        c.add("name", "bar".to_string());
        c.add("name", "123".to_string());
        assert_eq!(c.encode(), ":name=bar&:name=123");
        assert_eq!(c.get(":name"), Some("bar"));
        assert_eq!(c.get_all(":name"), &["bar".to_string(), "123".to_string()]);
    }
}
