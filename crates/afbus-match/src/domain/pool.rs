//! Rule storage for one message type

use super::rule::MatchRule;
use std::collections::BTreeMap;

/// Rules of a single message type (or of "any type").
///
/// Rules constraining an interface are grouped under that interface so a
/// message only scans the rules that could possibly match it.
#[derive(Debug, Clone, Default)]
pub struct MatchPool {
    by_interface: BTreeMap<String, Vec<MatchRule>>,
    without_interface: Vec<MatchRule>,
}

impl MatchPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rule. Structurally equal rules are kept as separate entries.
    pub fn add(&mut self, rule: MatchRule) {
        match rule.interface() {
            Some(iface) => self
                .by_interface
                .entry(iface.to_string())
                .or_default()
                .push(rule),
            None => self.without_interface.push(rule),
        }
    }

    /// Remove one rule structurally equal to `rule`. Returns whether one was
    /// found.
    pub fn remove(&mut self, rule: &MatchRule) -> bool {
        let Some(iface) = rule.interface() else {
            return remove_first(&mut self.without_interface, rule);
        };

        let Some(list) = self.by_interface.get_mut(iface) else {
            return false;
        };
        let removed = remove_first(list, rule);
        if list.is_empty() {
            self.by_interface.remove(iface);
        }
        removed
    }

    /// Rules without an interface constraint.
    pub fn without_interface(&self) -> &[MatchRule] {
        &self.without_interface
    }

    /// Rules constraining `interface`.
    pub fn for_interface(&self, interface: &str) -> &[MatchRule] {
        self.by_interface
            .get(interface)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Interfaces with at least one rule, in order.
    pub fn interfaces(&self) -> impl Iterator<Item = &str> {
        self.by_interface.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.without_interface.len() + self.by_interface.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.without_interface.is_empty() && self.by_interface.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_interface.clear();
        self.without_interface.clear();
    }

    /// Every stored rule: interface-less rules first, then by interface.
    pub fn iter(&self) -> impl Iterator<Item = &MatchRule> {
        self.without_interface
            .iter()
            .chain(self.by_interface.values().flatten())
    }
}

fn remove_first(list: &mut Vec<MatchRule>, rule: &MatchRule) -> bool {
    match list.iter().position(|r| r == rule) {
        Some(pos) => {
            list.remove(pos);
            true
        }
        None => false,
    }
}
