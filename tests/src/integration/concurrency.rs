//! Concurrency properties
//!
//! Races between binds, senders, joiners and eavesdrop toggles. Threads are
//! released together through a barrier so the interesting interleavings
//! actually happen.

#[cfg(test)]
mod tests {
    use crate::fixtures::{addr, bus_name, TestBus};
    use afbus_engine::{
        BrokerConfig, BusAddr, BusBroker, BusError, Credentials, RecvFlags, SocketAddress,
        SocketApi, SocketOption,
    };
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    const THREADS: usize = 8;

    // =========================================================================
    // Master address exclusivity
    // =========================================================================

    #[test]
    fn test_concurrent_binds_single_winner() {
        let broker = BusBroker::new(BrokerConfig::default()).unwrap();
        let name = bus_name("bus0");

        for _round in 0..10 {
            let barrier = Arc::new(Barrier::new(THREADS));
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    let broker = broker.clone();
                    let name = name.clone();
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        let socket = broker.socket(Credentials::default());
                        barrier.wait();
                        let result = socket.bind(&name);
                        (result, socket)
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let winners = results.iter().filter(|(r, _)| r.is_ok()).count();
            assert_eq!(winners, 1);
            assert!(results
                .iter()
                .filter(|(r, _)| r.is_err())
                .all(|(r, _)| *r == Err(BusError::AddressInUse)));
            assert_eq!(broker.bound_addresses(&name), vec![BusAddr::MASTER]);

            // Dropping every socket releases the master slot for the next round.
            drop(results);
            assert!(broker.lookup(&name, BusAddr::MASTER).is_none());
        }
    }

    // =========================================================================
    // Per-edge ordering
    // =========================================================================

    #[test]
    fn test_fifo_per_sender_with_interleaving() {
        const PER_SENDER: u16 = 200;

        let bus = TestBus::new("bus0");
        let receiver = bus.join();
        receiver
            .client
            .set_option(SocketOption::RecvTimeout(Some(Duration::from_secs(10))))
            .unwrap();
        let senders: Vec<_> = (0..3).map(|_| bus.join()).collect();
        let dest = receiver.addr();
        let barrier = Barrier::new(senders.len());

        let received = thread::scope(|s| {
            let reader = s.spawn(|| {
                let total = usize::from(PER_SENDER) * senders.len();
                let mut seen: HashMap<SocketAddress, Vec<u16>> = HashMap::new();
                for _ in 0..total {
                    let msg = receiver.client.recv_message(RecvFlags::default()).unwrap();
                    let seq = u16::from_be_bytes([msg.payload[0], msg.payload[1]]);
                    seen.entry(msg.source.clone()).or_default().push(seq);
                }
                seen
            });

            for peer in &senders {
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    for seq in 0..PER_SENDER {
                        peer.client
                            .send_bytes(Some(dest), &seq.to_be_bytes())
                            .unwrap();
                    }
                });
            }

            reader.join().unwrap()
        });

        assert_eq!(received.len(), senders.len());
        let expected: Vec<u16> = (0..PER_SENDER).collect();
        for peer in &senders {
            assert_eq!(received[&peer.address()], expected);
        }
    }

    // =========================================================================
    // Multicast atomicity under concurrent join
    // =========================================================================

    #[test]
    fn test_multicast_whole_or_nothing_for_joiners() {
        const ROUNDS: u8 = 60;
        const PAYLOAD: usize = 4096;

        let bus = TestBus::with_config("bus0", BrokerConfig::default().with_max_backlog(256));
        let first = bus.join_with(addr(7, 1));
        let group = BusAddr::multicast(7).unwrap();

        let joiners = thread::scope(|s| {
            let sender = s.spawn(|| {
                for round in 0..ROUNDS {
                    first
                        .side
                        .send_bytes(Some(group), &[round; PAYLOAD])
                        .unwrap();
                }
            });
            let joiner = s.spawn(|| {
                (2..=24)
                    .map(|client| bus.join_with(addr(7, client)))
                    .collect::<Vec<_>>()
            });
            sender.join().unwrap();
            joiner.join().unwrap()
        });

        let mut all = vec![&first];
        all.extend(joiners.iter());
        for peer in all {
            let mut last = None;
            while let Ok(msg) = peer.client.recv_message(RecvFlags::NONBLOCKING) {
                assert_eq!(msg.payload.len(), PAYLOAD);
                let round = msg.payload[0];
                assert!(msg.payload.iter().all(|b| *b == round));
                if let Some(prev) = last {
                    assert_eq!(round, prev + 1, "joiner saw a gap");
                }
                last = Some(round);
            }
            // Everyone who joined saw a contiguous suffix ending at the last round.
            if let Some(round) = last {
                assert_eq!(round, ROUNDS - 1);
            }
        }
        assert_eq!(
            first.client.connection().bus().unwrap().member_count(),
            24
        );
    }

    // =========================================================================
    // Eavesdropper count
    // =========================================================================

    #[test]
    fn test_eavesdropper_count_under_toggles() {
        let bus = TestBus::new("bus0");
        let peers: Vec<_> = (0..THREADS).map(|_| bus.join()).collect();
        let barrier = Barrier::new(THREADS);

        thread::scope(|s| {
            for (i, peer) in peers.iter().enumerate() {
                let barrier = &barrier;
                s.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(i as u64);
                    barrier.wait();
                    for _ in 0..200 {
                        let option = if rng.gen_bool(0.5) {
                            SocketOption::SetEavesdrop
                        } else {
                            SocketOption::UnsetEavesdrop
                        };
                        peer.side.set_option(option).unwrap();
                    }
                    // Half the peers leave while still possibly flagged.
                    if i % 2 == 0 {
                        peer.client.close();
                    }
                });
            }
        });

        let shared = bus.master.connection().bus().unwrap();
        assert!(shared.eavesdropper_count_consistent());
        let flagged = shared
            .members()
            .iter()
            .filter(|m| m.is_eavesdropper())
            .count();
        assert_eq!(shared.eavesdropper_count(), flagged);
        assert_eq!(shared.member_count(), THREADS / 2);
    }
}
