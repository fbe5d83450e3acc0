//! Header lists as they travel inside protocol messages.
//!
//! Names are normalized to lowercase when they enter the map, which is the form
//! protocol servers expect, so lookups never have to fold case. Order and
//! repeated names are kept: a map serializes as a plain list of
//! `[name, value]` pairs.

use serde::{Deserialize, Serialize};

/// An ordered, multi-value header list with lowercase names.
///
/// ```
/// use wirebridge::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Set-Cookie", "a=1");
/// headers.insert("set-cookie", "b=2");
///
/// assert_eq!(headers.get("SET-COOKIE"), Some("a=1"));
/// assert_eq!(headers.get_all("set-cookie").collect::<Vec<_>>(), ["a=1", "b=2"]);
/// assert_eq!(headers.iter().next(), Some(("set-cookie", "a=1")));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<(String, String)>", into = "Vec<(String, String)>")]
pub struct Headers {
    entries: Vec<(String, String)>,
}

fn normalize(name: impl Into<String>) -> String {
    let mut name = name.into();
    name.make_ascii_lowercase();
    name
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry, keeping earlier values for the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((normalize(name), value.into()));
    }

    /// Appends an entry unless the name is already present. Returns whether it
    /// was added.
    pub fn set_default(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        let name = normalize(name);
        if self.contains(&name) {
            return false;
        }
        self.entries.push((name, value.into()));
        true
    }

    /// First value under `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Every value under `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        let name = normalize(name);
        self.entries
            .iter()
            .filter(move |(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Drops every entry under `name`, returning how many there were.
    pub fn remove(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        before - self.entries.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of entries, counting repeated names separately.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

impl From<Vec<(String, String)>> for Headers {
    fn from(entries: Vec<(String, String)>) -> Self {
        entries.into_iter().collect()
    }
}

impl From<Headers> for Vec<(String, String)> {
    fn from(headers: Headers) -> Self {
        headers.entries
    }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(name, value)| (normalize(name), value.into()))
                .collect(),
        }
    }
}

/// Splits a `Content-Type` value into its lowercased media type and parameters.
///
/// Parameter names are lowercased; values are unquoted but otherwise verbatim.
///
/// ```
/// use wirebridge::http::headers::parse_content_type;
///
/// let (mime, params) = parse_content_type("Text/HTML; Charset=\"UTF-8\"");
/// assert_eq!(mime, "text/html");
/// assert_eq!(params, vec![("charset".to_owned(), "UTF-8".to_owned())]);
/// ```
pub fn parse_content_type(value: &str) -> (String, Vec<(String, String)>) {
    let mut parts = value.split(';');
    let mime = parts.next().unwrap_or("").trim().to_ascii_lowercase();
    let params = parts
        .filter_map(|param| {
            let (name, value) = param.split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((name.trim().to_ascii_lowercase(), value.to_owned()))
        })
        .collect();
    (mime, params)
}
