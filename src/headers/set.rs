//! Per-request header set.

use std::collections::BTreeMap;

/// Headers the simulated SP hands to the application, name -> value.
///
/// Built fresh for each request and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSet {
    headers: BTreeMap<String, String>,
}

impl HeaderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any earlier value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
impl HeaderSet {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|s| s.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.headers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.headers.keys().map(|k| k.as_str())
    }
}

impl Extend<(String, String)> for HeaderSet {
    fn extend<T: IntoIterator<Item = (String, String)>>(&mut self, iter: T) {
        self.headers.extend(iter);
    }
}

impl FromIterator<(String, String)> for HeaderSet {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            headers: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_replaces() {
        let mut headers = HeaderSet::new();
        headers.insert("mail", "a@example.org");
        headers.insert("mail", "b@example.org");
        assert_eq!(headers.iter().count(), 1);
        assert_eq!(headers.get("mail"), Some("b@example.org"));
        assert!(headers.contains("mail"));
        assert!(!headers.contains("cn"));
    }

    #[test]
    fn test_collect_and_iterate() {
        let headers: HeaderSet = vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
        ]
        .into_iter()
        .collect();

        let names: Vec<&str> = headers.names().collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(headers.get("a"), Some("1"));
    }
}
