//! Longest-prefix lookup of continuation window sizes.

use std::collections::BTreeMap;

/// Ordered mapping from candidate prefix to window size.
///
/// Lookups return the value of the longest configured prefix of the matched
/// text. The table is static configuration and read-only once built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrefixWindowTable {
    /// Sorted by descending prefix length, ties broken lexicographically.
    entries: Vec<(String, u32)>,
}

impl PrefixWindowTable {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut entries: Vec<(String, u32)> = entries
            .into_iter()
            .map(|(p, w)| (p.into(), w))
            .filter(|(p, _)| !p.is_empty())
            .collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        entries.dedup_by(|a, b| a.0 == b.0);
        Self { entries }
    }

    /// Longest configured prefix of `text` and its window size.
    pub fn longest_match(&self, text: &str) -> Option<(&str, u32)> {
        self.entries
            .iter()
            .find(|(prefix, _)| text.starts_with(prefix.as_str()))
            .map(|(prefix, window)| (prefix.as_str(), *window))
    }

    /// Window size for `text`, or `default` when nothing matches.
    pub fn window_for(&self, text: Option<&str>, default: u32) -> u32 {
        text.and_then(|t| self.longest_match(t))
            .map(|(_, window)| window)
            .unwrap_or(default)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<&BTreeMap<String, u32>> for PrefixWindowTable {
    fn from(map: &BTreeMap<String, u32>) -> Self {
        Self::new(map.iter().map(|(k, v)| (k.clone(), *v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_prefix_wins() {
        let table = PrefixWindowTable::new([("ab", 2), ("abc", 5)]);
        assert_eq!(table.window_for(Some("abcdef"), 1), 5);
        assert_eq!(table.longest_match("abcdef"), Some(("abc", 5)));
    }

    #[test]
    fn test_shorter_prefix_when_longer_fails() {
        let table = PrefixWindowTable::new([("abc", 5), ("ab", 2)]);
        assert_eq!(table.window_for(Some("abx"), 1), 2);
    }

    #[test]
    fn test_default_when_no_match() {
        let table = PrefixWindowTable::new([("abc", 5)]);
        assert_eq!(table.window_for(Some("zzz"), 7), 7);
        assert_eq!(table.window_for(None, 7), 7);
    }

    #[test]
    fn test_empty_prefix_ignored() {
        let table = PrefixWindowTable::new([("", 100), ("a", 3)]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.window_for(Some("b"), 1), 1);
    }

    #[test]
    fn test_from_map() {
        let mut map = BTreeMap::new();
        map.insert("1PWo3JeB9jr".to_string(), 100);
        map.insert("1PWo3JeB9j".to_string(), 10);
        map.insert("1PWo3JeB9".to_string(), 4);
        map.insert("1PWo3JeB".to_string(), 1);

        let table = PrefixWindowTable::from(&map);
        assert_eq!(table.window_for(Some("1PWo3JeB9jrXYZ"), 0), 100);
        assert_eq!(table.window_for(Some("1PWo3JeB9jQ"), 0), 10);
        assert_eq!(table.window_for(Some("1PWo3JeB9Q"), 0), 4);
        assert_eq!(table.window_for(Some("1PWo3JeBQ"), 0), 1);
    }
}
