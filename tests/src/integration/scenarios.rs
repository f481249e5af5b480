//! End-to-end bus flows
//!
//! Each test drives a real broker through the socket API the way a bus
//! master and its clients would.

#[cfg(test)]
mod tests {
    use crate::fixtures::{addr, bus_name, try_recv, TestBus};
    use afbus_engine::{
        BusAddr, BusError, Credentials, DeliveryContext, DeliveryFilter, MatchRuleFilter,
        MessageHeader, OptionName, OptionValue, Packet, RecvFlags, SendFlags, Shutdown,
        SocketAddress, SocketApi, SocketOption, Verdict, MAX_RECURSION_LEVEL,
    };
    use afbus_match::{parse, MatchPool};
    use std::sync::Arc;

    // =========================================================================
    // Unicast, multicast and routing
    // =========================================================================

    #[test]
    fn test_master_unicast_to_joined_client() {
        let bus = TestBus::new("bus0");
        let c1 = bus.join();

        let sent = c1.side.send_bytes(Some(c1.addr()), b"hello").unwrap();
        assert_eq!(sent, 5);

        let mut buf = [0u8; 32];
        let (len, from) = c1.client.recv(&mut buf, RecvFlags::default()).unwrap();
        assert_eq!(len, 5);
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, SocketAddress::master(bus_name("bus0")));
    }

    #[test]
    fn test_multicast_reaches_prefix_members_only() {
        let bus = TestBus::new("bus0");
        let c1 = bus.join_with(addr(7, 1));
        let c2 = bus.join_with(addr(7, 2));
        let c3 = bus.join_with(addr(8, 1));

        let dest = BusAddr::multicast(7).unwrap();
        assert_eq!(c1.side.send_bytes(Some(dest), b"ping"), Ok(4));

        assert_eq!(try_recv(&c1.client).unwrap(), b"ping");
        assert_eq!(try_recv(&c2.client).unwrap(), b"ping");
        assert_eq!(try_recv(&c3.client), Err(BusError::WouldBlock));
        assert_eq!(bus.broker.metrics().deliveries, 2);
    }

    #[test]
    fn test_client_multicast_skips_sender() {
        let bus = TestBus::new("bus0");
        let c1 = bus.join_with(addr(7, 1));
        let c2 = bus.join_with(addr(7, 2));

        c1.client
            .send_bytes(Some(BusAddr::multicast(7).unwrap()), b"all")
            .unwrap();

        assert_eq!(try_recv(&c2.client).unwrap(), b"all");
        assert_eq!(try_recv(&c1.client), Err(BusError::WouldBlock));
    }

    #[test]
    fn test_connect_to_missing_bus() {
        let bus = TestBus::new("bus0");
        let client = bus.broker.socket(Credentials::default());
        assert_eq!(
            client.connect(&bus_name("nope")),
            Err(BusError::HostUnreachable)
        );
        assert!(bus.broker.bound_addresses(&bus_name("nope")).is_empty());
    }

    #[test]
    fn test_joined_clients_talk_directly() {
        let bus = TestBus::new("bus0");
        let c1 = bus.join();
        let c2 = bus.join();

        c1.client.send_bytes(Some(c2.addr()), b"direct").unwrap();

        let msg = c2.client.recv_message(RecvFlags::NONBLOCKING).unwrap();
        assert_eq!(&msg.payload[..], b"direct");
        assert_eq!(msg.source, c1.address());
        assert_eq!(try_recv(&c1.side), Err(BusError::WouldBlock));
    }

    #[test]
    fn test_unknown_peer_routes_to_master() {
        let bus = TestBus::new("bus0");
        let c1 = bus.join();

        c1.client.send_bytes(Some(addr(0, 999)), b"lost").unwrap();

        let msg = c1.side.recv_message(RecvFlags::NONBLOCKING).unwrap();
        assert_eq!(&msg.payload[..], b"lost");
        assert_eq!(msg.source, c1.address());
    }

    // =========================================================================
    // Eavesdropping
    // =========================================================================

    #[test]
    fn test_eavesdropper_gets_copy_of_unicast() {
        let bus = TestBus::new("bus0");
        let c1 = bus.join();
        let c2 = bus.join();
        let spy = bus.join();
        spy.side.set_option(SocketOption::SetEavesdrop).unwrap();

        c1.client.send_bytes(Some(c2.addr()), b"secret").unwrap();

        assert_eq!(try_recv(&c2.client).unwrap(), b"secret");
        let copy = spy.client.recv_message(RecvFlags::NONBLOCKING).unwrap();
        assert_eq!(&copy.payload[..], b"secret");
        assert_eq!(copy.source, c1.address());
        assert_eq!(try_recv(&c1.client), Err(BusError::WouldBlock));
    }

    #[test]
    fn test_eavesdropper_stops_after_unset() {
        let bus = TestBus::new("bus0");
        let c1 = bus.join();
        let spy = bus.join();
        spy.side.set_option(SocketOption::SetEavesdrop).unwrap();
        spy.side.set_option(SocketOption::UnsetEavesdrop).unwrap();
        assert_eq!(
            spy.client.get_option(OptionName::Eavesdropper),
            Ok(OptionValue::Flag(false))
        );

        c1.side.send_bytes(Some(c1.addr()), b"quiet").unwrap();
        assert_eq!(try_recv(&spy.client), Err(BusError::WouldBlock));
    }

    // =========================================================================
    // Match rules
    // =========================================================================

    #[test]
    fn test_signal_rule_in_pool() {
        let rule = parse("type='signal',interface='org.foo',member='Bar'").unwrap();
        let mut pool = MatchPool::new();
        pool.add(rule);

        let rule = &pool.for_interface("org.foo")[0];
        assert!(rule.matches(None, false, &MessageHeader::signal("org.foo", "Bar")));
        assert!(!rule.matches(None, false, &MessageHeader::signal("org.foo", "Baz")));
    }

    #[test]
    fn test_match_filter_limits_multicast() {
        let filter = Arc::new(MatchRuleFilter::new());
        let bus = TestBus::with_filter("bus0", Arc::clone(&filter) as _);
        let c1 = bus.join_with(addr(7, 1));
        let c2 = bus.join_with(addr(7, 2));
        filter
            .add_match(
                &c1.address(),
                "type='signal',interface='org.foo',member='Bar'",
            )
            .unwrap();

        let packet = Packet::new(b"sig").with_header(MessageHeader::signal("org.foo", "Bar"));
        c1.side
            .send(
                Some(BusAddr::multicast(7).unwrap()),
                packet,
                SendFlags::default(),
            )
            .unwrap();

        assert_eq!(try_recv(&c1.client).unwrap(), b"sig");
        assert_eq!(try_recv(&c2.client), Err(BusError::WouldBlock));
        assert_eq!(bus.broker.metrics().filter_drops, 1);
    }

    #[test]
    fn test_match_state_released_on_close() {
        let filter = Arc::new(MatchRuleFilter::new());
        let bus = TestBus::with_filter("bus0", Arc::clone(&filter) as _);
        let c1 = bus.join();
        filter.add_match(&c1.address(), "type='signal'").unwrap();
        assert_eq!(filter.subscriber_count(), 1);

        c1.client.close();
        assert_eq!(filter.subscriber_count(), 0);
    }

    // =========================================================================
    // Limits
    // =========================================================================

    #[test]
    fn test_send_buffer_ceiling() {
        let bus = TestBus::new("bus0");
        let c1 = bus.connect();
        c1.client.set_option(SocketOption::SendBuffer(64)).unwrap();

        assert_eq!(
            c1.client.send_bytes(None, &[0u8; 100]),
            Err(BusError::MessageTooLarge { size: 100, max: 64 })
        );
        assert_eq!(c1.client.send_bytes(None, &[0u8; 64]), Ok(64));
    }

    #[test]
    fn test_full_queue_nonblocking_send() {
        let bus = TestBus::new("bus0");
        let c1 = bus.join();
        c1.side.set_option(SocketOption::MaxBacklog(2)).unwrap();

        c1.side.send_bytes(None, b"1").unwrap();
        c1.side.send_bytes(None, b"2").unwrap();
        assert_eq!(
            c1.side
                .send(None, Packet::new(b"3"), SendFlags::NONBLOCKING),
            Err(BusError::WouldBlock)
        );
        assert_eq!(
            c1.client.get_option(OptionName::QueueFull),
            Ok(OptionValue::Flag(true))
        );

        assert_eq!(try_recv(&c1.client).unwrap(), b"1");
        assert_eq!(
            c1.side
                .send(None, Packet::new(b"3"), SendFlags::NONBLOCKING),
            Ok(1)
        );
    }

    // =========================================================================
    // Filter verdicts
    // =========================================================================

    /// Rejects every copy bound for one address.
    struct Veto {
        target: SocketAddress,
    }

    impl DeliveryFilter for Veto {
        fn verdict(&self, ctx: &DeliveryContext<'_>) -> Verdict {
            if ctx.recipient.address.as_ref() == Some(&self.target) {
                Verdict::DropWithError
            } else {
                Verdict::Accept
            }
        }
    }

    fn vetoing(target: SocketAddress) -> Arc<Veto> {
        Arc::new(Veto { target })
    }

    #[test]
    fn test_veto_excludes_one_multicast_member() {
        let target = SocketAddress::new(bus_name("bus0"), addr(0, 2));
        let bus = TestBus::with_filter("bus0", vetoing(target.clone()));
        let c1 = bus.join_with(addr(7, 1));
        let c2 = bus.join_with(addr(7, 2));
        let c3 = bus.join_with(addr(7, 3));
        assert_eq!(c2.address(), target);

        let dest = BusAddr::multicast(7).unwrap();
        assert_eq!(c1.side.send_bytes(Some(dest), b"fan"), Ok(3));

        assert_eq!(try_recv(&c1.client).unwrap(), b"fan");
        assert_eq!(try_recv(&c2.client), Err(BusError::WouldBlock));
        assert_eq!(try_recv(&c3.client).unwrap(), b"fan");
        assert_eq!(bus.broker.metrics().filter_drops, 1);
    }

    #[test]
    fn test_veto_fails_plain_unicast() {
        let target = SocketAddress::new(bus_name("bus0"), addr(0, 2));
        let bus = TestBus::with_filter("bus0", vetoing(target));
        let c1 = bus.join();
        let c2 = bus.join();

        assert_eq!(
            c1.client.send_bytes(Some(c2.addr()), b"no"),
            Err(BusError::PermissionDenied)
        );
        assert_eq!(try_recv(&c2.client), Err(BusError::WouldBlock));

        // Other recipients are unaffected.
        c2.client.send_bytes(Some(c1.addr()), b"yes").unwrap();
        assert_eq!(try_recv(&c1.client).unwrap(), b"yes");
    }

    #[test]
    fn test_veto_on_eavesdropper_spares_unicast() {
        let target = SocketAddress::new(bus_name("bus0"), addr(0, 3));
        let bus = TestBus::with_filter("bus0", vetoing(target));
        let c1 = bus.join();
        let c2 = bus.join();
        let spy = bus.join();
        spy.side.set_option(SocketOption::SetEavesdrop).unwrap();

        assert_eq!(c1.client.send_bytes(Some(c2.addr()), b"seen"), Ok(4));
        assert_eq!(try_recv(&c2.client).unwrap(), b"seen");
        assert_eq!(try_recv(&spy.client), Err(BusError::WouldBlock));
    }

    // =========================================================================
    // Shut-down recipients
    // =========================================================================

    #[test]
    fn test_send_to_read_shutdown_recipient() {
        let bus = TestBus::new("bus0");
        let c1 = bus.join();
        let c2 = bus.join();
        c2.client.shutdown(Shutdown::Read).unwrap();

        assert_eq!(
            c1.client.send_bytes(Some(c2.addr()), b"x"),
            Err(BusError::PeerShutdown)
        );
        assert_eq!(
            c2.side.send_bytes(None, b"x"),
            Err(BusError::PeerShutdown)
        );
    }

    #[test]
    fn test_send_to_closed_recipient() {
        let bus = TestBus::new("bus0");
        let c1 = bus.join();
        c1.client.close();

        assert_eq!(
            c1.side.send_bytes(Some(c1.addr()), b"x"),
            Err(BusError::PeerShutdown)
        );
        assert_eq!(bus.broker.metrics().deliveries, 0);
    }

    #[test]
    fn test_read_shutdown_member_skipped_by_multicast() {
        let bus = TestBus::new("bus0");
        let c1 = bus.join_with(addr(7, 1));
        let c2 = bus.join_with(addr(7, 2));
        c2.client.shutdown(Shutdown::Read).unwrap();

        let dest = BusAddr::multicast(7).unwrap();
        assert_eq!(c1.side.send_bytes(Some(dest), b"m"), Ok(1));
        assert_eq!(try_recv(&c1.client).unwrap(), b"m");
    }

    // =========================================================================
    // Passed-socket recursion
    // =========================================================================

    #[test]
    fn test_passed_socket_over_recursion_limit() {
        let bus = TestBus::new("bus0");
        let c1 = bus.join();
        let c2 = bus.join();

        // Each delivery of c2's own socket to c2 deepens its nesting by one.
        for round in 0..=MAX_RECURSION_LEVEL {
            let packet = Packet::new(b"fd").with_descriptor(c2.client.descriptor());
            assert_eq!(
                c1.client.send(Some(c2.addr()), packet, SendFlags::default()),
                Ok(2),
                "round {round}"
            );
        }
        assert_eq!(c2.client.connection().recursion_level(), MAX_RECURSION_LEVEL + 1);

        let packet = Packet::new(b"fd").with_descriptor(c2.client.descriptor());
        assert_eq!(
            c1.client.send(Some(c2.addr()), packet, SendFlags::default()),
            Err(BusError::TooManyReferences {
                level: MAX_RECURSION_LEVEL + 1,
                max: MAX_RECURSION_LEVEL,
            })
        );

        let mut queued = 0;
        while try_recv(&c2.client).is_ok() {
            queued += 1;
        }
        assert_eq!(queued, MAX_RECURSION_LEVEL + 1);
    }
}
