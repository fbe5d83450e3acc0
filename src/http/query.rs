//! Ordered, multi-valued URL query and form parameters.

/// An ordered multi-map of query (or URL-encoded form) parameters.
///
/// Repeated keys are kept in order. [`get`](Self::get) returns the *last*
/// value for a key, [`get_all`](Self::get_all) every value.
///
/// # Examples
///
/// ```
/// use wirebridge::http::Query;
///
/// let query = Query::parse("name=Jack&tag=a&tag=b%20c");
/// assert_eq!(query.get("name"), Some("Jack"));
/// assert_eq!(query.get("tag"), Some("b c"));
/// assert_eq!(query.get_all("tag").collect::<Vec<_>>(), vec!["a", "b c"]);
/// assert_eq!(query.encode(), "name=Jack&tag=a&tag=b+c");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    inner: Vec<(String, String)>,
}

impl Query {
    /// Creates an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a URL-encoded string (`key=value&key2=value2`), without the leading `?`.
    ///
    /// `+` decodes to a space and `%XX` escapes are decoded; malformed escapes are
    /// kept literally. Keys without `=` get an empty value.
    pub fn parse(raw: &str) -> Self {
        form_urlencoded::parse(raw.as_bytes()).collect()
    }

    /// Serializes back to the URL-encoded form, preserving order.
    pub fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(&self.inner)
            .finish()
    }

    /// Appends a parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.push((key.into(), value.into()));
    }

    /// Returns the last value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Returns every value for `key` in insertion order.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.inner
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns an iterator over all `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for Query
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
