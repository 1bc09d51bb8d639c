//! Scopes for barriers and transformations

use serde::{Deserialize, Serialize};
use std::fmt;

const ALL: &str = "all";
const AFTER_COLLECTORS: &str = "after_collectors";
const ALL_DISPATCHERS: &str = "all_dispatchers";

/// Where a barrier applies
///
/// Serialized as `"all"` or the dispatcher id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BarrierScope {
    All,
    Dispatcher(String),
}

impl BarrierScope {
    /// Whether this scope covers `dispatcher_id`
    pub fn matches(&self, dispatcher_id: &str) -> bool {
        match self {
            BarrierScope::All => true,
            BarrierScope::Dispatcher(id) => id == dispatcher_id,
        }
    }
}

impl From<String> for BarrierScope {
    fn from(value: String) -> Self {
        if value.eq_ignore_ascii_case(ALL) {
            BarrierScope::All
        } else {
            BarrierScope::Dispatcher(value)
        }
    }
}

impl From<BarrierScope> for String {
    fn from(scope: BarrierScope) -> Self {
        match scope {
            BarrierScope::All => ALL.to_string(),
            BarrierScope::Dispatcher(id) => id,
        }
    }
}

/// Admission state of a barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierState {
    Open,
    #[default]
    Closed,
}

impl BarrierState {
    pub fn is_open(&self) -> bool {
        matches!(self, BarrierState::Open)
    }

    pub fn from_open(open: bool) -> Self {
        if open {
            BarrierState::Open
        } else {
            BarrierState::Closed
        }
    }
}

impl fmt::Display for BarrierState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BarrierState::Open => write!(f, "open"),
            BarrierState::Closed => write!(f, "closed"),
        }
    }
}

/// Where a transformation is configured to run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TransformationScope {
    AfterCollectors,
    AllDispatchers,
    Dispatcher(String),
}

impl TransformationScope {
    /// Whether a transformation with this scope runs at `scope`
    pub fn matches(&self, scope: &DispatchScope) -> bool {
        match (self, scope) {
            (TransformationScope::AfterCollectors, DispatchScope::AfterCollectors) => true,
            (TransformationScope::AllDispatchers, DispatchScope::Dispatcher(_)) => true,
            (TransformationScope::Dispatcher(a), DispatchScope::Dispatcher(b)) => a == b,
            _ => false,
        }
    }
}

impl From<String> for TransformationScope {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            AFTER_COLLECTORS => TransformationScope::AfterCollectors,
            ALL_DISPATCHERS => TransformationScope::AllDispatchers,
            _ => TransformationScope::Dispatcher(value),
        }
    }
}

impl From<TransformationScope> for String {
    fn from(scope: TransformationScope) -> Self {
        match scope {
            TransformationScope::AfterCollectors => AFTER_COLLECTORS.to_string(),
            TransformationScope::AllDispatchers => ALL_DISPATCHERS.to_string(),
            TransformationScope::Dispatcher(id) => id,
        }
    }
}

/// Point in the pipeline a dispatch is currently at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DispatchScope {
    AfterCollectors,
    Dispatcher(String),
}

impl fmt::Display for DispatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchScope::AfterCollectors => write!(f, "{AFTER_COLLECTORS}"),
            DispatchScope::Dispatcher(id) => write!(f, "dispatcher:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrier_scope_matching() {
        assert!(BarrierScope::All.matches("x"));
        assert!(BarrierScope::Dispatcher("x".into()).matches("x"));
        assert!(!BarrierScope::Dispatcher("x".into()).matches("y"));
    }

    #[test]
    fn test_barrier_scope_serde() {
        let scopes: Vec<BarrierScope> = serde_json::from_str(r#"["all", "http"]"#).unwrap();
        assert_eq!(
            scopes,
            vec![BarrierScope::All, BarrierScope::Dispatcher("http".into())]
        );
        assert_eq!(serde_json::to_string(&scopes).unwrap(), r#"["all","http"]"#);
    }

    #[test]
    fn test_all_dispatchers_matches_any_dispatcher() {
        let scope = TransformationScope::AllDispatchers;
        assert!(scope.matches(&DispatchScope::Dispatcher("a".into())));
        assert!(scope.matches(&DispatchScope::Dispatcher("b".into())));
        assert!(!scope.matches(&DispatchScope::AfterCollectors));
    }

    #[test]
    fn test_dispatcher_scope_matches_same_id_only() {
        let scope = TransformationScope::from("http".to_string());
        assert!(scope.matches(&DispatchScope::Dispatcher("http".into())));
        assert!(!scope.matches(&DispatchScope::Dispatcher("file".into())));
        assert!(!scope.matches(&DispatchScope::AfterCollectors));
    }

    #[test]
    fn test_after_collectors_matches_only_itself() {
        let scope = TransformationScope::from("after_collectors".to_string());
        assert_eq!(scope, TransformationScope::AfterCollectors);
        assert!(scope.matches(&DispatchScope::AfterCollectors));
        assert!(!scope.matches(&DispatchScope::Dispatcher("x".into())));
    }
}
