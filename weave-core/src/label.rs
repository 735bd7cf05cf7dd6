//! Label maps and label queries.
//!
//! Mirrors the selector/expression split the teacher uses for Kubernetes
//! label selectors, but matches against our own `Labels` map instead of
//! `k8s_openapi`'s `LabelSelector`.

use std::collections::BTreeMap;

pub type Labels = BTreeMap<String, String>;

/// A single predicate in a [`LabelQuery`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LabelExpr {
    Equal(String, String),
    NotEqual(String, String),
    Exists(String),
    NotExists(String),
}

impl LabelExpr {
    fn matches(&self, labels: &Labels) -> bool {
        match self {
            LabelExpr::Equal(k, v) => labels.get(k).map(String::as_str) == Some(v.as_str()),
            LabelExpr::NotEqual(k, v) => labels.get(k).map(String::as_str) != Some(v.as_str()),
            LabelExpr::Exists(k) => labels.contains_key(k),
            LabelExpr::NotExists(k) => !labels.contains_key(k),
        }
    }
}

/// A conjunction of [`LabelExpr`] predicates used to filter
/// [`list`](crate::store::Store::list) and [`watch`](crate::store::Store::watch)
/// calls.
///
/// An empty query selects everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelQuery(Vec<LabelExpr>);

impl LabelQuery {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push(LabelExpr::Equal(key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn ne(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push(LabelExpr::NotEqual(key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.0.push(LabelExpr::Exists(key.into()));
        self
    }

    #[must_use]
    pub fn not_exists(mut self, key: impl Into<String>) -> Self {
        self.0.push(LabelExpr::NotExists(key.into()));
        self
    }

    #[must_use]
    pub fn selects_all(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn matches(&self, labels: &Labels) -> bool {
        self.0.iter().all(|expr| expr.matches(labels))
    }
}

impl FromIterator<(String, String)> for LabelQuery {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| LabelExpr::Equal(k, v))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn empty_query_selects_all() {
        assert!(LabelQuery::new().selects_all());
        assert!(LabelQuery::new().matches(&labels(&[])));
        assert!(LabelQuery::new().matches(&labels(&[("a", "b")])));
    }

    #[test]
    fn equality_and_existence() {
        let q = LabelQuery::new().eq("cluster", "c1").exists("managed");
        assert!(q.matches(&labels(&[("cluster", "c1"), ("managed", "true")])));
        assert!(!q.matches(&labels(&[("cluster", "c2"), ("managed", "true")])));
        assert!(!q.matches(&labels(&[("cluster", "c1")])));
    }

    #[test]
    fn negation() {
        let q = LabelQuery::new().ne("phase", "done").not_exists("archived");
        assert!(q.matches(&labels(&[("phase", "running")])));
        assert!(!q.matches(&labels(&[("phase", "done")])));
        assert!(!q.matches(&labels(&[("phase", "running"), ("archived", "yes")])));
    }
}
