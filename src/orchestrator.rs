// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Wires a run together: binds every node's listener, opens the full mesh
//! of outbound streams (including each node's loopback stream to itself),
//! then spawns a receiver thread and a request-loop thread per node.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::info;

use crate::config::Config;
use crate::error::ProtocolError;
use crate::node::{Barrier, NodeState};
use crate::protocol;
use crate::quorum;
use crate::receiver;
use crate::sender::Sender;
use crate::transport;

/// A single node's spawned threads and the flag used to stop them early.
pub struct NodeHandle {
    pub shutdown: Arc<AtomicBool>,
    receiver_thread: JoinHandle<()>,
    request_thread: JoinHandle<()>,
}

impl NodeHandle {
    /// Waits for the request loop to finish (it has already registered at
    /// the termination barrier by the time callers reach this point), then
    /// signals the receiver thread to stop and waits for it too. The
    /// receiver only polls `shutdown` between `mio::Poll` cycles, so this
    /// can block up to `POLL_TIMEOUT`.
    pub fn join(self) {
        let _ = self.request_thread.join();
        self.shutdown.store(true, Ordering::Relaxed);
        let _ = self.receiver_thread.join();
    }
}

pub struct Orchestrator {
    config: Config,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        Orchestrator { config }
    }

    /// Runs every node to completion (`config.iterations` CS entries each),
    /// then returns once the termination barrier has released everyone.
    pub fn run(&self) -> Result<(), ProtocolError> {
        let n = self.config.num_nodes;
        let mut rng = rand::thread_rng();

        let listeners: Vec<_> = (0..n)
            .map(|id| transport::bind(self.config.port_for(id)))
            .collect::<Result<_, _>>()?;
        info!("all {n} listeners bound, opening full mesh");

        let states: Vec<Arc<NodeState>> = (0..n)
            .map(|id| Arc::new(NodeState::new(id, quorum::build_quorum(id, n, &mut rng))))
            .collect();

        let barrier = Arc::new(Barrier::new(n));

        let mut handles = Vec::with_capacity(n as usize);
        for (id, listener) in (0..n).zip(listeners) {
            let outbound = (0..n)
                .map(|dest| transport::connect(self.config.port_for(dest)))
                .collect::<Result<Vec<_>, _>>()?;
            let sender = Arc::new(Sender::new(outbound));
            let state = Arc::clone(&states[id as usize]);
            let shutdown = Arc::new(AtomicBool::new(false));

            let receiver_thread = {
                let state = Arc::clone(&state);
                let sender = Arc::clone(&sender);
                let shutdown = Arc::clone(&shutdown);
                thread::Builder::new()
                    .name(format!("node-{id}-recv"))
                    .spawn(move || {
                        if let Err(e) = receiver::run(listener, &state, &shutdown, |msg| {
                            protocol::dispatch(&state, &sender, msg)
                        }) {
                            log::error!("node {id} receiver terminated: {e}");
                        }
                    })
                    .expect("failed to spawn receiver thread")
            };

            let request_thread = {
                let state = Arc::clone(&state);
                let sender = Arc::clone(&sender);
                let shutdown = Arc::clone(&shutdown);
                let barrier = Arc::clone(&barrier);
                let iterations = self.config.iterations;
                thread::Builder::new()
                    .name(format!("node-{id}-req"))
                    .spawn(move || {
                        protocol::request_loop(&state, &sender, iterations, &barrier, &shutdown);
                    })
                    .expect("failed to spawn request-loop thread")
            };

            handles.push(NodeHandle { shutdown, receiver_thread, request_thread });
        }

        for handle in handles {
            handle.join();
        }
        info!("all {n} nodes reached the termination barrier");
        Ok(())
    }
}
