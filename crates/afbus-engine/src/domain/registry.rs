//! Address registry
//!
//! Maps `(bus name, numeric address)` to the connection that owns it. The
//! master of a bus is registered at [`BusAddr::MASTER`], so a lookup by
//! name alone is a lookup of the master slot.
//!
//! The registry indexes but never owns: both the address and its owner are
//! held weakly, and an entry whose owner has gone away counts as free.

use super::address::BoundAddress;
use afbus_types::{BusAddr, BusError, BusName, BusResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

struct Entry<T> {
    address: Weak<BoundAddress>,
    owner: Weak<T>,
}

impl<T> Entry<T> {
    fn is_live(&self) -> bool {
        self.owner.strong_count() > 0 && self.address.strong_count() > 0
    }
}

pub struct AddressRegistry<T> {
    entries: RwLock<HashMap<(BusName, BusAddr), Entry<T>>>,
}

impl<T> Default for AddressRegistry<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> AddressRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `address` as owned by `owner`.
    ///
    /// # Errors
    ///
    /// `AddressInUse` if a live entry already holds the same name and id.
    pub fn register(&self, address: &Arc<BoundAddress>, owner: &Arc<T>) -> BusResult<()> {
        let key = (address.name().clone(), address.addr());
        let mut entries = self.entries.write();

        if entries.get(&key).is_some_and(Entry::is_live) {
            return Err(BusError::AddressInUse);
        }

        debug!(address = %address, "Registered bus address");
        entries.insert(
            key,
            Entry {
                address: Arc::downgrade(address),
                owner: Arc::downgrade(owner),
            },
        );
        Ok(())
    }

    /// Remove `address` if it is registered to `owner`. Returns whether an
    /// entry was removed.
    pub fn unregister(&self, address: &BoundAddress, owner: &Arc<T>) -> bool {
        let key = (address.name().clone(), address.addr());
        let mut entries = self.entries.write();

        let owned = entries
            .get(&key)
            .is_some_and(|e| std::ptr::eq(e.owner.as_ptr(), Arc::as_ptr(owner)));
        if owned {
            entries.remove(&key);
            debug!(address = %address, "Unregistered bus address");
        }
        owned
    }

    /// Owner of the master address of bus `name`.
    pub fn lookup_by_name(&self, name: &BusName) -> Option<Arc<T>> {
        self.lookup_by_id(name, BusAddr::MASTER)
    }

    pub fn lookup_by_id(&self, name: &BusName, addr: BusAddr) -> Option<Arc<T>> {
        let entries = self.entries.read();
        let entry = entries.get(&(name.clone(), addr))?;
        if entry.address.strong_count() == 0 {
            return None;
        }
        entry.owner.upgrade()
    }

    pub fn contains(&self, name: &BusName, addr: BusAddr) -> bool {
        self.lookup_by_id(name, addr).is_some()
    }

    /// Live registered addresses of bus `name`, in ascending order.
    pub fn addresses(&self, name: &BusName) -> Vec<BusAddr> {
        let entries = self.entries.read();
        let mut addrs: Vec<BusAddr> = entries
            .iter()
            .filter(|((n, _), e)| n == name && e.is_live())
            .map(|((_, a), _)| *a)
            .collect();
        addrs.sort();
        addrs
    }

    pub fn len(&self) -> usize {
        self.entries.read().values().filter(|e| e.is_live()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries whose owner or address is gone.
    pub fn prune(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.is_live());
        before - entries.len()
    }
}
