//! Delivery engine
//!
//! ## Send path
//!
//! ```text
//!  snapshot sender ──▶ route ──▶ build batch ──▶ filter ──▶ enqueue (send lock)
//!                                   ▲                           │
//!                                   └──── queue full: wait ─────┘
//! ```
//!
//! A batch is either one plain unicast copy, or a fan-out: every multicast
//! member of the destination prefix, or the unicast recipient plus every
//! eavesdropper. Fan-out slots are counted under the membership lock,
//! allocated without it, then filled under it again; if membership grew in
//! between, the batch is rebuilt.
//!
//! Enqueue is all-or-nothing: every recipient queue is checked for space
//! under the bus send lock before any copy is pushed.

use super::bus::Bus;
use super::connection::{ConnState, Connection};
use super::queue::{BusMessage, Packet, MAX_RECURSION_LEVEL};
use super::wait::Waiter;
use crate::ports::{DeliveryContext, DeliveryKind, SendFlags, Shutdown, Verdict};
use afbus_types::{BusAddr, BusError, BusName, BusResult, SocketAddress};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// The parts of the sender's state a send needs, copied out of its lock.
struct SenderView {
    bus: Arc<Bus>,
    peer: Option<Arc<Connection>>,
    name: BusName,
    source: SocketAddress,
    master_side: bool,
    send_buffer: usize,
    nonblocking: bool,
    timeout: Option<Duration>,
}

enum Route {
    Unicast(Arc<Connection>),
    Multicast(BusAddr),
}

enum Enqueued {
    Done(usize),
    /// This recipient's queue is full; nothing was queued.
    Full(Arc<Connection>),
}

impl Connection {
    pub(crate) fn send(
        self: &Arc<Self>,
        destination: Option<BusAddr>,
        packet: Packet,
        flags: SendFlags,
    ) -> BusResult<usize> {
        let view = self.sender_view(flags)?;

        if packet.len() > view.send_buffer {
            return Err(BusError::MessageTooLarge {
                size: packet.len(),
                max: view.send_buffer,
            });
        }

        let passed_level = packet.ancillary.passed_level();
        if let Some(level) = passed_level.filter(|l| *l > MAX_RECURSION_LEVEL) {
            return Err(BusError::TooManyReferences {
                level,
                max: MAX_RECURSION_LEVEL,
            });
        }

        let route = self.route(&view, destination)?;
        let primary = match &route {
            Route::Unicast(target) => Some(Arc::clone(target)),
            Route::Multicast(_) => None,
        };
        let eavesdrop = primary.is_some() && view.bus.eavesdropper_count() > 0;
        let plain_unicast = primary.is_some() && !eavesdrop;

        let sender = self.endpoint();
        let waiter = Waiter::new(&self.interrupted, view.timeout, self.shared.config.wait_slice());

        loop {
            let batch = self.build_batch(&view.bus, &route, eavesdrop)?;

            let mut accepted = Vec::new();
            accepted
                .try_reserve_exact(batch.len())
                .map_err(|_| BusError::OutOfMemory)?;

            for (recipient, kind) in batch {
                let endpoint = recipient.endpoint();
                let ctx = DeliveryContext {
                    kind,
                    sender: &sender,
                    recipient: &endpoint,
                    header: packet.header.as_ref(),
                    payload: &packet.payload,
                };
                match self.shared.filter.verdict(&ctx) {
                    Verdict::Accept => accepted.push(recipient),
                    Verdict::Drop => {
                        self.shared.metrics.record_filter_drop();
                        trace!(from = self.id(), to = recipient.id(), kind = ?kind, "Filter dropped copy");
                    }
                    Verdict::DropWithError => {
                        self.shared.metrics.record_filter_drop();
                        if plain_unicast {
                            debug!(from = self.id(), to = recipient.id(), "Filter vetoed unicast");
                            return Err(BusError::PermissionDenied);
                        }
                    }
                }
            }

            match self.enqueue_batch(&view, &accepted, primary.as_ref(), &packet, passed_level)? {
                Enqueued::Done(copies) => {
                    self.shared.metrics.record_send(packet.len(), copies);
                    trace!(from = self.id(), copies, bytes = packet.len(), "Delivered");
                    return Ok(packet.len());
                }
                Enqueued::Full(blocked) => {
                    self.shared.metrics.record_would_block();
                    if view.nonblocking {
                        return Err(BusError::WouldBlock);
                    }
                    self.wait_for_space(&blocked, &waiter)?;
                }
            }
        }
    }

    /// Park until `blocked` has room again. Our own state is re-checked on
    /// every slice: a local shutdown or close wakes our queue, not theirs.
    fn wait_for_space(&self, blocked: &Connection, waiter: &Waiter<'_>) -> BusResult<()> {
        loop {
            {
                let inner = self.inner.lock();
                if inner.closed || inner.shutdown & Shutdown::SEND != 0 {
                    debug!(conn = self.id(), "Sender shut down while blocked");
                    return Err(BusError::PeerShutdown);
                }
            }
            let mut queue = blocked.queue.lock();
            if !queue.is_full() || queue.shutdown {
                return Ok(());
            }
            waiter.wait(&blocked.queue.writable, &mut queue)?;
            if !queue.is_full() || queue.shutdown {
                return Ok(());
            }
        }
    }

    fn sender_view(&self, flags: SendFlags) -> BusResult<SenderView> {
        let inner = self.inner.lock();
        if inner.state != ConnState::Established {
            return Err(BusError::NotConnected);
        }
        if inner.shutdown & Shutdown::SEND != 0 {
            return Err(BusError::PeerShutdown);
        }
        let (Some(bus), Some(local)) = (&inner.bus, &inner.local) else {
            return Err(BusError::NotConnected);
        };
        Ok(SenderView {
            bus: Arc::clone(bus),
            peer: inner.peer.clone(),
            name: local.name().clone(),
            source: local.socket_address().clone(),
            master_side: inner.master_side,
            send_buffer: inner.send_buffer,
            nonblocking: inner.nonblocking || flags.nonblocking,
            timeout: inner.send_timeout,
        })
    }

    fn route(&self, view: &SenderView, destination: Option<BusAddr>) -> BusResult<Route> {
        let to_peer = || view.peer.clone().map(Route::Unicast).ok_or(BusError::NotConnected);

        let to_master = match destination {
            None => !view.master_side,
            Some(addr) => addr.is_master(),
        };
        if to_master {
            if view.master_side {
                return Err(BusError::InvalidArgument(
                    "master-side connection cannot address the master".into(),
                ));
            }
            return to_peer();
        }

        let Some(destination) = destination else {
            // Master-side end with no destination: its own client.
            return to_peer();
        };

        if !view.master_side && !self.is_authenticated() {
            return Err(BusError::HostUnreachable);
        }
        if destination.is_multicast() {
            return Ok(Route::Multicast(destination));
        }

        // A name can outlive its bus: clients of a closed master keep their
        // registrations after a new master rebinds the name.
        let target = self
            .shared
            .registry
            .lookup_by_id(&view.name, destination)
            .filter(|target| target.bus().is_some_and(|bus| Arc::ptr_eq(&bus, &view.bus)));
        match target {
            Some(target) => Ok(Route::Unicast(target)),
            None if !view.master_side => {
                trace!(conn = self.id(), dest = %destination, "Unknown destination, routing to master");
                view.peer
                    .clone()
                    .map(Route::Unicast)
                    .ok_or(BusError::HostUnreachable)
            }
            None => Err(BusError::HostUnreachable),
        }
    }

    fn build_batch(
        self: &Arc<Self>,
        bus: &Bus,
        route: &Route,
        eavesdrop: bool,
    ) -> BusResult<Vec<(Arc<Connection>, DeliveryKind)>> {
        let primary = match route {
            Route::Unicast(target) if !eavesdrop => {
                return Ok(vec![(Arc::clone(target), DeliveryKind::Unicast)]);
            }
            Route::Unicast(target) => Some(target),
            Route::Multicast(_) => None,
        };

        let select = |member: &Arc<Connection>| -> Option<DeliveryKind> {
            if Arc::ptr_eq(member, self) {
                return None;
            }
            match route {
                Route::Multicast(dest) => member
                    .owns_prefix(dest.prefix())
                    .then_some(DeliveryKind::Multicast),
                Route::Unicast(target) => (member.is_eavesdropper() && !Arc::ptr_eq(member, target))
                    .then_some(DeliveryKind::Eavesdrop),
            }
        };

        loop {
            let capacity =
                bus.count(select) + usize::from(primary.is_some()) + self.shared.config.multicast_slack;

            let mut slots = Vec::new();
            slots
                .try_reserve_exact(capacity)
                .map_err(|_| BusError::OutOfMemory)?;
            if let Some(target) = primary {
                slots.push((Arc::clone(target), DeliveryKind::Unicast));
            }

            if bus.fill(&mut slots, capacity, select) {
                return Ok(slots);
            }
            self.shared.metrics.record_fanout_retry();
            debug!(bus = %bus.name(), capacity, "Membership grew during fan-out, rebuilding batch");
        }
    }

    fn enqueue_batch(
        &self,
        view: &SenderView,
        recipients: &[Arc<Connection>],
        primary: Option<&Arc<Connection>>,
        packet: &Packet,
        passed_level: Option<u32>,
    ) -> BusResult<Enqueued> {
        let is_primary = |r: &Arc<Connection>| primary.is_some_and(|p| Arc::ptr_eq(p, r));

        let _send = view.bus.send_lock();

        for recipient in recipients {
            let queue = recipient.queue.lock();
            if queue.shutdown {
                if is_primary(recipient) {
                    return Err(BusError::PeerShutdown);
                }
                continue;
            }
            if queue.is_full() {
                return Ok(Enqueued::Full(Arc::clone(recipient)));
            }
        }

        let message = BusMessage {
            payload: Arc::clone(&packet.payload),
            header: packet.header.clone(),
            ancillary: packet.ancillary.clone(),
            source: view.source.clone(),
        };

        let mut copies = 0;
        for recipient in recipients {
            let mut queue = recipient.queue.lock();
            if queue.shutdown {
                continue;
            }
            queue.push(message.clone());
            drop(queue);

            if let Some(level) = passed_level {
                recipient.raise_recursion_level(level + 1);
            }
            recipient.queue.readable.notify_all();
            copies += 1;
        }
        Ok(Enqueued::Done(copies))
    }
}

