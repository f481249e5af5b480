//! Shared bus object
//!
//! Created when a master binds. Every connection on the bus holds an `Arc`
//! to it; the bus only holds weak references back, so it is released with
//! the last connection.
//!
//! ## Locks
//!
//! | Lock        | Guards                                      |
//! |-------------|---------------------------------------------|
//! | `members`   | peer set, `authenticated`, `eavesdropper`   |
//! | `send_lock` | the enqueue phase of one delivery batch     |

use super::connection::Connection;
use afbus_types::{BusAddr, BusError, BusName, BusResult};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

pub struct Bus {
    name: BusName,
    master: Weak<Connection>,
    members: Mutex<Vec<Weak<Connection>>>,
    eavesdroppers: AtomicUsize,
    next_client: AtomicU32,
    send_lock: Mutex<()>,
}

impl Bus {
    pub(crate) fn new(name: BusName, master: Weak<Connection>) -> Self {
        Self {
            name,
            master,
            members: Mutex::new(Vec::new()),
            eavesdroppers: AtomicUsize::new(0),
            next_client: AtomicU32::new(0),
            send_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &BusName {
        &self.name
    }

    pub fn master(&self) -> Option<Arc<Connection>> {
        self.master.upgrade()
    }

    /// Client ids available on prefix 0: everything between the master and
    /// the multicast wildcard.
    pub(crate) const CLIENT_IDS: u32 = BusAddr::CLIENT_ALL - 1;

    /// Next candidate client id on prefix 0, cycling through
    /// `1..=CLIENT_IDS`. The caller skips ids that are still registered.
    pub(crate) fn allocate_client(&self) -> BusResult<BusAddr> {
        let ticket = self.next_client.fetch_add(1, Ordering::Relaxed);
        BusAddr::new(0, ticket % Self::CLIENT_IDS + 1)
    }

    /// Add an authenticated peer.
    pub(crate) fn join(&self, peer: &Arc<Connection>) -> BusResult<()> {
        let mut members = self.members.lock();
        if peer.is_authenticated() {
            return Err(BusError::InvalidArgument("peer already joined".into()));
        }
        peer.set_authenticated(true);
        members.retain(|m| m.strong_count() > 0);
        members.push(Arc::downgrade(peer));
        debug!(bus = %self.name, peer = peer.id(), members = members.len(), "Peer joined bus");
        Ok(())
    }

    /// Remove `conn` from the peer set, keeping the eavesdropper count exact.
    pub(crate) fn leave(&self, conn: &Connection) {
        let mut members = self.members.lock();
        let before = members.len();
        members.retain(|m| m.strong_count() > 0 && !std::ptr::eq(m.as_ptr(), conn));
        if members.len() == before && !conn.is_authenticated() {
            return;
        }
        if conn.set_eavesdropper(false) {
            self.eavesdroppers.fetch_sub(1, Ordering::AcqRel);
        }
        conn.set_authenticated(false);
        debug!(bus = %self.name, peer = conn.id(), "Peer left bus");
    }

    /// Toggle `peer`'s eavesdropper flag. Idempotent.
    pub(crate) fn set_eavesdrop(&self, peer: &Connection, on: bool) -> BusResult<()> {
        let _members = self.members.lock();
        if !peer.is_authenticated() {
            return Err(BusError::InvalidArgument("peer has not joined the bus".into()));
        }
        if peer.set_eavesdropper(on) != on {
            if on {
                self.eavesdroppers.fetch_add(1, Ordering::AcqRel);
            } else {
                self.eavesdroppers.fetch_sub(1, Ordering::AcqRel);
            }
        }
        Ok(())
    }

    pub fn eavesdropper_count(&self) -> usize {
        self.eavesdroppers.load(Ordering::Acquire)
    }

    pub fn members(&self) -> Vec<Arc<Connection>> {
        self.members.lock().iter().filter_map(Weak::upgrade).collect()
    }

    pub fn member_count(&self) -> usize {
        self.members.lock().iter().filter(|m| m.strong_count() > 0).count()
    }

    /// Whether the eavesdropper count equals the number of eavesdropping
    /// members, observed under the membership lock.
    pub fn eavesdropper_count_consistent(&self) -> bool {
        let members = self.members.lock();
        let flagged = members
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|m| m.is_eavesdropper())
            .count();
        flagged == self.eavesdropper_count()
    }

    /// Count members accepted by `select`.
    pub(crate) fn count<T>(&self, select: impl Fn(&Arc<Connection>) -> Option<T>) -> usize {
        self.members
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|m| select(m).is_some())
            .count()
    }

    /// Append every member accepted by `select` to `slots`.
    ///
    /// Returns `false`, leaving `slots` partially filled, if more members
    /// qualify than fit in `capacity`.
    pub(crate) fn fill<T>(
        &self,
        slots: &mut Vec<(Arc<Connection>, T)>,
        capacity: usize,
        select: impl Fn(&Arc<Connection>) -> Option<T>,
    ) -> bool {
        let members = self.members.lock();
        for member in members.iter().filter_map(Weak::upgrade) {
            if let Some(tag) = select(&member) {
                if slots.len() == capacity {
                    return false;
                }
                slots.push((member, tag));
            }
        }
        true
    }

    pub(crate) fn send_lock(&self) -> MutexGuard<'_, ()> {
        self.send_lock.lock()
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("name", &self.name)
            .field("members", &self.member_count())
            .field("eavesdroppers", &self.eavesdropper_count())
            .finish()
    }
}
