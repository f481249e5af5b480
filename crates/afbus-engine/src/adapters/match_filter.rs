//! Match-rule delivery filter
//!
//! Keeps one [`MatchMaker`] per client address and drops multicast and
//! eavesdrop copies the recipient never subscribed to. Plain unicast copies
//! and copies to master-side connections are never filtered, and neither are
//! packets without a routing header.

use crate::ports::{DeliveryContext, DeliveryFilter, DeliveryKind, Endpoint, Verdict};
use afbus_match::{MatchError, MatchMaker, MatchRule};
use afbus_types::{BusAddr, SocketAddress};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, trace};

#[derive(Default)]
pub struct MatchRuleFilter {
    makers: RwLock<HashMap<SocketAddress, MatchMaker>>,
}

impl MatchRuleFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unique connection name for `addr`, in D-Bus `:prefix.client` form.
    pub fn unique_name(addr: BusAddr) -> String {
        format!(":{}.{}", addr.prefix(), addr.client())
    }

    fn with_maker<R>(&self, owner: &SocketAddress, f: impl FnOnce(&mut MatchMaker) -> R) -> R {
        let mut makers = self.makers.write();
        let maker = makers
            .entry(owner.clone())
            .or_insert_with(|| MatchMaker::new(&Self::unique_name(owner.addr)));
        f(maker)
    }

    /// Subscribe `owner` to messages matching `rule`.
    pub fn add_match(&self, owner: &SocketAddress, rule: &str) -> Result<MatchRule, MatchError> {
        let rule = self.with_maker(owner, |m| m.add_rule_text(rule))?;
        debug!(owner = %owner, rule = %rule, "Match rule added");
        Ok(rule)
    }

    pub fn remove_match(&self, owner: &SocketAddress, rule: &str) -> Result<(), MatchError> {
        self.with_maker(owner, |m| m.remove_rule_text(rule))
    }

    /// Record `owner` as primary owner of the well-known `name`.
    pub fn add_name(&self, owner: &SocketAddress, name: &str) {
        self.with_maker(owner, |m| m.add_name(name));
    }

    pub fn remove_name(&self, owner: &SocketAddress, name: &str) -> bool {
        self.with_maker(owner, |m| m.remove_name(name))
    }

    pub fn rule_count(&self, owner: &SocketAddress) -> usize {
        self.makers
            .read()
            .get(owner)
            .map_or(0, MatchMaker::rule_count)
    }

    /// Number of connections with match state.
    pub fn subscriber_count(&self) -> usize {
        self.makers.read().len()
    }
}

impl DeliveryFilter for MatchRuleFilter {
    fn verdict(&self, ctx: &DeliveryContext<'_>) -> Verdict {
        let Some(header) = ctx.header else {
            return Verdict::Accept;
        };
        if ctx.recipient.master_side || ctx.kind == DeliveryKind::Unicast {
            return Verdict::Accept;
        }
        let Some(recipient_addr) = &ctx.recipient.address else {
            return Verdict::Drop;
        };

        let makers = self.makers.read();
        let Some(recipient) = makers.get(recipient_addr) else {
            trace!(recipient = %recipient_addr, "No subscriptions");
            return Verdict::Drop;
        };
        let sender = ctx.sender.address.as_ref().and_then(|a| makers.get(a));

        if recipient.filter(sender, ctx.recipient.eavesdropper, header) {
            Verdict::Accept
        } else {
            Verdict::Drop
        }
    }

    fn connection_released(&self, endpoint: &Endpoint) {
        // Master-side ends share the master address; its state is not theirs.
        if endpoint.master_side {
            return;
        }
        if let Some(address) = &endpoint.address {
            if self.makers.write().remove(address).is_some() {
                debug!(owner = %address, "Dropped match state");
            }
        }
    }
}
