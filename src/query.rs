use url::form_urlencoded;

/// A single query parameter value.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// Serialized as one `name=value` pair per item.
    List(Vec<QueryValue>),
}

impl QueryValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn list<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<QueryValue>,
    {
        Self::List(values.into_iter().map(Into::into).collect())
    }

    fn push_pairs(&self, name: &str, out: &mut form_urlencoded::Serializer<'_, String>) {
        match self {
            QueryValue::Null => {}
            QueryValue::Bool(value) => {
                out.append_pair(name, if *value { "true" } else { "false" });
            }
            QueryValue::Integer(value) => {
                out.append_pair(name, &value.to_string());
            }
            QueryValue::Float(value) => {
                out.append_pair(name, &value.to_string());
            }
            QueryValue::Text(value) if value.is_empty() => {}
            QueryValue::Text(value) => {
                out.append_pair(name, value);
            }
            QueryValue::List(items) => {
                for item in items {
                    item.push_pairs(name, out);
                }
            }
        }
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for QueryValue {
    fn from(value: i32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<u32> for QueryValue {
    fn from(value: u32) -> Self {
        Self::Integer(value.into())
    }
}

impl From<f64> for QueryValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<QueryValue>> From<Option<T>> for QueryValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl<T: Into<QueryValue>> From<Vec<T>> for QueryValue {
    fn from(values: Vec<T>) -> Self {
        Self::list(values)
    }
}

/// Ordered query parameters. Serialization keeps insertion order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query(Vec<(String, QueryValue)>);

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a parameter and returns the query, for chaining.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<QueryValue>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }
}

impl From<()> for Query {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl<K, V> From<Vec<(K, V)>> for Query
where
    K: Into<String>,
    V: Into<QueryValue>,
{
    fn from(pairs: Vec<(K, V)>) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for Query
where
    K: Into<String>,
    V: Into<QueryValue>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K, V> FromIterator<(K, V)> for Query
where
    K: Into<String>,
    V: Into<QueryValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
        )
    }
}

/// Serializes `query` as `application/x-www-form-urlencoded` without a leading `?`.
///
/// Null and empty-text values are omitted; list values repeat the name once
/// per item (`c=2&c=3`).
pub fn build_query_string(query: &Query) -> String {
    let mut out = form_urlencoded::Serializer::new(String::new());
    for (name, value) in query.iter() {
        value.push_pairs(name, &mut out);
    }
    out.finish()
}

/// Appends the serialized query to `url`, respecting an existing `?`.
pub(crate) fn append_query(url: &str, query: &Query) -> String {
    let encoded = build_query_string(query);
    if encoded.is_empty() {
        return url.to_owned();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{encoded}")
}

#[cfg(test)]
mod tests {
    use super::{append_query, build_query_string, Query, QueryValue};

    #[test]
    fn omits_null_and_repeats_lists() {
        let query = Query::new()
            .with("a", 1)
            .with("b", QueryValue::Null)
            .with("c", vec![2, 3]);
        assert_eq!(build_query_string(&query), "a=1&c=2&c=3");
    }

    #[test]
    fn keeps_insertion_order() {
        let query: Query = [("z", "last"), ("a", "first")].into();
        assert_eq!(build_query_string(&query), "z=last&a=first");
    }

    #[test]
    fn omits_empty_text_and_none() {
        let query = Query::new()
            .with("crop", "")
            .with("state", Option::<&str>::None)
            .with("season", "rabi");
        assert_eq!(build_query_string(&query), "season=rabi");
    }

    #[test]
    fn encodes_reserved_characters() {
        let query = Query::new().with("q", "a&b c");
        assert_eq!(build_query_string(&query), "q=a%26b+c");
    }

    #[test]
    fn append_respects_existing_query() {
        let query = Query::new().with("page", 2);
        assert_eq!(append_query("/prices", &query), "/prices?page=2");
        assert_eq!(append_query("/prices?crop=rice", &query), "/prices?crop=rice&page=2");
        assert_eq!(append_query("/prices", &Query::new()), "/prices");
    }

    #[test]
    fn bools_and_floats() {
        let query = Query::new().with("live", true).with("ratio", 0.5);
        assert_eq!(build_query_string(&query), "live=true&ratio=0.5");
    }
}
