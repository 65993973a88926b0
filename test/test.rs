// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use maekawa_mutex::codec;
use maekawa_mutex::config::Config;
use maekawa_mutex::message::{Message, MessageType};
use maekawa_mutex::node::NodeState;
use maekawa_mutex::orchestrator::Orchestrator;
use maekawa_mutex::protocol;
use maekawa_mutex::quorum::build_quorum;
use maekawa_mutex::sender::Sender;

/// A connected loopback TCP pair: writes on `.0` show up for reading on `.1`.
fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).unwrap();
    let (server, _) = listener.accept().unwrap();
    (client, server)
}

fn read_message(stream: &mut TcpStream) -> Message {
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
    let mut buf = [0u8; 512];
    let n = stream.read(&mut buf).expect("peer did not reply in time");
    codec::decode(std::str::from_utf8(&buf[..n]).unwrap()).expect("peer sent an undecodable frame")
}

#[test]
fn s1_request_with_no_contention_grants_immediately() {
    let _ = env_logger::try_init();
    let node = NodeState::new(0, vec![1]);

    let (dummy_client, _dummy_server) = socket_pair();
    let (peer_client, mut peer_read_end) = socket_pair();
    let sender = Sender::new(vec![dummy_client, peer_client]);

    let request = Message::new(MessageType::Request, 1, 0, 5);
    protocol::dispatch(&node, &sender, request);

    let reply = read_message(&mut peer_read_end);
    assert_eq!(reply.msg_type, MessageType::Grant);
    assert_eq!(reply.src, 0);
    assert_eq!(reply.dest, 1);

    node.with_lock(|state| {
        assert_eq!(state.grants_sent, Some((5, 1)));
        ((), false)
    });
}

#[test]
fn s2_lower_priority_request_receives_failed_while_contended() {
    let _ = env_logger::try_init();
    let node = NodeState::new(0, vec![1, 2]);
    node.with_lock(|state| {
        state.grants_sent = Some((3, 2));
        ((), false)
    });

    let (dummy_client, _dummy_server) = socket_pair();
    let (peer_client, mut peer_read_end) = socket_pair();
    let (colleague_client, _colleague_server) = socket_pair();
    let sender = Sender::new(vec![dummy_client, peer_client, colleague_client]);

    let request = Message::new(MessageType::Request, 1, 0, 10);
    protocol::dispatch(&node, &sender, request);

    let reply = read_message(&mut peer_read_end);
    assert_eq!(reply.msg_type, MessageType::Failed);
    assert_eq!(reply.dest, 1);

    // The held grant (3, 2) outranks the contending request (10, 1), so it
    // stays in place and the loser is only enqueued, not granted.
    node.with_lock(|state| {
        assert_eq!(state.grants_sent, Some((3, 2)));
        assert_eq!(state.queue.pop_highest_priority(), Some((10, 1)));
        ((), false)
    });
}

#[test]
fn s3_inquire_yield_reassigns_the_grant_to_the_higher_priority_contender() {
    let _ = env_logger::try_init();

    // Node 0 already granted node 5 at (20, 5), a low-priority (large ts)
    // grant. Node 7 now requests with (1, 7), a strictly higher priority.
    let node0 = NodeState::new(0, vec![5, 7]);
    node0.with_lock(|state| {
        state.grants_sent = Some((20, 5));
        ((), false)
    });

    // `Sender` is indexed by destination id, so node 0's outbound slots 5
    // and 7 must be the real pipes; everything else is a throwaway.
    let (to_node5, mut from_node0_as_seen_by_5) = socket_pair();
    let (to_node7, mut from_node0_as_seen_by_7) = socket_pair();
    let sender0 = Sender::new(vec![
        dummy_unused(),
        dummy_unused(),
        dummy_unused(),
        dummy_unused(),
        dummy_unused(),
        to_node5,
        dummy_unused(),
        to_node7,
    ]);

    let request_from_7 = Message::new(MessageType::Request, 7, 0, 1);
    protocol::dispatch(&node0, &sender0, request_from_7);

    let inquire = read_message(&mut from_node0_as_seen_by_5);
    assert_eq!(inquire.msg_type, MessageType::Inquire);
    assert_eq!(inquire.dest, 5);
    assert_eq!(inquire.data.contender(), Some((1, 7)));

    // Node 5, not in its critical section, yields the grant back.
    let node5 = NodeState::new(5, vec![0]);
    let (dummy5, _d5) = socket_pair();
    let (to_node0, mut from_node5_as_seen_by_0) = socket_pair();
    let sender5 = Sender::new(vec![to_node0, dummy_unused(), dummy_unused(), dummy_unused(), dummy_unused(), dummy5]);

    protocol::dispatch(&node5, &sender5, inquire);

    // Node 5's own clock, not the original (20, 5) grant, stamps this
    // message, so the yield_handler's "clear grants_sent if it still matches"
    // step is therefore close to a no-op in practice (see DESIGN.md); the
    // pending (1, 7) request still outranks whatever ts node 5 re-queues at.
    let yield_msg = read_message(&mut from_node5_as_seen_by_0);
    assert_eq!(yield_msg.msg_type, MessageType::Yield);
    assert_eq!(yield_msg.src, 5);

    // Node 0 re-dispatches the grant: node 7's request outranks node 5's
    // re-queued one, so the grant moves to node 7.
    protocol::dispatch(&node0, &sender0, yield_msg);

    let grant = read_message(&mut from_node0_as_seen_by_7);
    assert_eq!(grant.msg_type, MessageType::Grant);
    assert_eq!(grant.dest, 7);

    node0.with_lock(|state| {
        assert_eq!(state.grants_sent, Some((1, 7)));
        ((), false)
    });
}

/// A throwaway stream for `Sender` slots this test never writes to.
fn dummy_unused() -> TcpStream {
    socket_pair().0
}

#[test]
fn grant_handler_notifies_once_the_quorum_is_complete() {
    let _ = env_logger::try_init();
    let node = NodeState::new(0, vec![1, 2]);
    node.with_lock(|state| {
        state.grants_received.insert(0);
        ((), false)
    });

    let (c0, _s0) = socket_pair();
    let (c1, _s1) = socket_pair();
    let (c2, _s2) = socket_pair();
    let sender = Sender::new(vec![c0, c1, c2]);

    protocol::dispatch(&node, &sender, Message::new(MessageType::Grant, 1, 0, 1));
    node.with_lock(|state| {
        assert_eq!(state.grants_received.len(), 2);
        ((), false)
    });

    // Handing dispatch off to a scoped thread lets us prove
    // `wait_for_quorum` actually unblocks once the last GRANT lands.
    std::thread::scope(|scope| {
        let waiting = scope.spawn(|| node.wait_for_quorum());
        std::thread::sleep(Duration::from_millis(50));
        protocol::dispatch(&node, &sender, Message::new(MessageType::Grant, 2, 0, 2));
        waiting.join().expect("wait_for_quorum panicked");
    });

    node.with_lock(|state| {
        assert!(state.in_cs);
        ((), false)
    });
}

#[test]
fn s7_small_run_reaches_termination_barrier() {
    let _ = env_logger::try_init();
    // N=2 is deliberately avoided: its quorum target size (3) exceeds the
    // 2 ids that exist, so `build_quorum` never terminates (see DESIGN.md).
    let config = Config { num_nodes: 3, port: 9700, iterations: 1 };

    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let result = Orchestrator::new(config).run();
        let _ = tx.send(result);
    });

    let result = rx
        .recv_timeout(Duration::from_secs(30))
        .expect("orchestrator did not reach the termination barrier in time");
    assert!(result.is_ok());
}

#[test]
fn quorum_grows_with_the_mesh_for_a_spread_of_sizes() {
    let mut rng = rand::thread_rng();
    for &n in &[1u32, 4, 9, 10, 25, 30] {
        let m = (n as f64).sqrt().ceil() as u32;
        for id in 0..n {
            let quorum = build_quorum(id, n, &mut rng);
            assert_eq!(quorum.len(), (2 * m - 1) as usize);
            assert!(!quorum.contains(&id));
        }
    }
}

mod properties {
    use maekawa_mutex::node::NodeState;
    use maekawa_mutex::quorum::build_quorum;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn tick_never_decreases_the_clock(ticks in 1usize..50) {
            let node = NodeState::new(0, vec![1]);
            let mut last = 0u64;
            for _ in 0..ticks {
                let next = node.with_lock(|state| (state.tick(), false));
                prop_assert!(next > last);
                last = next;
            }
        }

        #[test]
        fn merge_is_always_strictly_greater_than_both_inputs(local in 0u64..1000, incoming in 0u64..1000) {
            let node = NodeState::new(0, vec![1]);
            node.with_lock(|state| { state.lamport_ts = local; ((), false) });
            node.with_lock(|state| { state.merge(incoming); ((), false) });
            let after = node.with_lock(|state| (state.lamport_ts, false));
            prop_assert!(after > local);
            prop_assert!(after > incoming);
        }

        #[test]
        fn quorum_size_matches_2_sqrt_n_minus_1_formula(n in (1u32..64).prop_filter("N=2 never terminates padding", |&n| n != 2)) {
            let mut rng = rand::thread_rng();
            let m = (n as f64).sqrt().ceil() as u32;
            for id in 0..n {
                let quorum = build_quorum(id, n, &mut rng);
                prop_assert_eq!(quorum.len(), (2 * m - 1) as usize);
                prop_assert!(!quorum.contains(&id));
            }
        }
    }
}
