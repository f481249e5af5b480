//! Per-subscriber match state

use super::parser::parse;
use super::pool::MatchPool;
use super::rule::MatchRule;
use crate::error::MatchError;
use afbus_types::{MessageHeader, MessageType};
use std::collections::BTreeSet;
use tracing::{debug, trace};

/// Pool slot for rules without a type constraint.
const ANY: usize = 0;

fn slot(ty: Option<MessageType>) -> usize {
    match ty {
        None => ANY,
        Some(MessageType::MethodCall) => 1,
        Some(MessageType::MethodReturn) => 2,
        Some(MessageType::Error) => 3,
        Some(MessageType::Signal) => 4,
    }
}

/// The rules one connection subscribed with, plus the names it owns.
#[derive(Debug, Clone)]
pub struct MatchMaker {
    unique_name: String,
    pools: [MatchPool; 5],
    names: BTreeSet<String>,
}

impl MatchMaker {
    /// Create a match maker for the connection known as `unique_name`.
    ///
    /// The unique name is always considered owned.
    pub fn new(unique_name: &str) -> Self {
        let mut names = BTreeSet::new();
        names.insert(unique_name.to_string());
        Self {
            unique_name: unique_name.to_string(),
            pools: Default::default(),
            names,
        }
    }

    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }

    pub fn add_rule(&mut self, rule: MatchRule) {
        debug!(owner = %self.unique_name, rule = %rule, "Adding match rule");
        self.pools[slot(rule.msg_type())].add(rule);
    }

    /// Parse `text` and add the resulting rule.
    pub fn add_rule_text(&mut self, text: &str) -> Result<MatchRule, MatchError> {
        let rule = parse(text)?;
        self.add_rule(rule.clone());
        Ok(rule)
    }

    /// Remove one rule structurally equal to `rule`.
    pub fn remove_rule(&mut self, rule: &MatchRule) -> Result<(), MatchError> {
        if self.pools[slot(rule.msg_type())].remove(rule) {
            debug!(owner = %self.unique_name, rule = %rule, "Removed match rule");
            Ok(())
        } else {
            Err(MatchError::RuleNotFound(rule.to_string()))
        }
    }

    /// Parse `text` and remove one equal rule.
    pub fn remove_rule_text(&mut self, text: &str) -> Result<(), MatchError> {
        let rule = parse(text)?;
        self.remove_rule(&rule)
    }

    pub fn remove_all(&mut self) {
        for pool in &mut self.pools {
            pool.clear();
        }
    }

    pub fn rule_count(&self) -> usize {
        self.pools.iter().map(MatchPool::len).sum()
    }

    /// Record that this connection is primary owner of `name`.
    pub fn add_name(&mut self, name: &str) {
        self.names.insert(name.to_string());
    }

    /// Give up ownership of `name`. The unique name cannot be released.
    pub fn remove_name(&mut self, name: &str) -> bool {
        if name == self.unique_name {
            return false;
        }
        self.names.remove(name)
    }

    pub fn is_primary_owner(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Decide whether `message` should be delivered to this subscriber.
    ///
    /// `sender` is the sending connection's match maker, `eavesdrop` whether
    /// this subscriber may eavesdrop. Messages addressed to a name this
    /// subscriber owns always pass.
    pub fn filter(
        &self,
        sender: Option<&MatchMaker>,
        eavesdrop: bool,
        message: &MessageHeader,
    ) -> bool {
        let typed = &self.pools[slot(Some(message.msg_type))];
        let any = &self.pools[ANY];

        for pool in [any, typed] {
            if pool_matches(pool, sender, eavesdrop, message) {
                trace!(owner = %self.unique_name, "Message matched subscription");
                return true;
            }
        }

        message
            .destination
            .as_deref()
            .is_some_and(|dest| self.is_primary_owner(dest))
    }
}

fn pool_matches(
    pool: &MatchPool,
    sender: Option<&MatchMaker>,
    eavesdrop: bool,
    message: &MessageHeader,
) -> bool {
    let hit = |rules: &[MatchRule]| rules.iter().any(|r| r.matches(sender, eavesdrop, message));

    if hit(pool.without_interface()) {
        return true;
    }
    message
        .interface
        .as_deref()
        .is_some_and(|iface| hit(pool.for_interface(iface)))
}
