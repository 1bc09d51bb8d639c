//! LoadRuleEngine trait - per-dispatcher filtering

use crate::Dispatch;

/// Splits dispatches into those a dispatcher may receive and those it may not
pub trait LoadRuleEngine: Send + Sync {
    /// Returns `(passed, rejected)`
    fn evaluate_load_rules(
        &self,
        dispatcher_id: &str,
        dispatches: Vec<Dispatch>,
    ) -> (Vec<Dispatch>, Vec<Dispatch>);
}

/// Passes everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllLoadRules;

impl LoadRuleEngine for AllowAllLoadRules {
    fn evaluate_load_rules(
        &self,
        _dispatcher_id: &str,
        dispatches: Vec<Dispatch>,
    ) -> (Vec<Dispatch>, Vec<Dispatch>) {
        (dispatches, Vec::new())
    }
}
