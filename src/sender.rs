// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Outbound side of a node: one TCP stream per destination, Lamport-stamped
//! at send time. `send` stamps and ticks once per call; `multicast` ticks
//! once total and stamps every copy with that same timestamp.

use std::io::Write;
use std::net::TcpStream;
use std::sync::Mutex;

use log::debug;

use crate::codec;
use crate::error::ProtocolError;
use crate::message::{Message, NodeId};
use crate::node::NodeState;

pub struct Sender {
    /// Indexed by destination node id; `outbound[d]` is this node's
    /// directed stream to node `d` (including a loopback stream to self).
    outbound: Vec<Mutex<TcpStream>>,
}

impl Sender {
    pub fn new(outbound: Vec<TcpStream>) -> Self {
        Sender {
            outbound: outbound.into_iter().map(Mutex::new).collect(),
        }
    }

    /// Stamps `msg.ts` with the next Lamport value and writes it to
    /// `dest`'s outbound stream. The node's mutex is released before the
    /// write happens, so a slow write never blocks the node's handlers.
    pub fn send(&self, node: &NodeState, mut msg: Message, dest: NodeId) -> Result<(), ProtocolError> {
        let ts = node.with_lock(|state| (state.tick(), false));
        msg.ts = ts;
        msg.dest = dest;

        debug!("node {} sending {:?} to {dest}", msg.src, msg.msg_type);
        self.write_to(dest, &msg)
    }

    /// Ticks the Lamport clock exactly once, then writes one stamped copy
    /// per destination in `group`. All recipients observe the same `ts`.
    pub fn multicast(&self, node: &NodeState, mut msg: Message, group: &[NodeId]) -> Result<(), ProtocolError> {
        let ts = node.with_lock(|state| (state.tick(), false));
        msg.ts = ts;

        for &dest in group {
            msg.dest = dest;
            debug!("node {} multicasting {:?} to {dest}", msg.src, msg.msg_type);
            self.write_to(dest, &msg)?;
        }
        Ok(())
    }

    fn write_to(&self, dest: NodeId, msg: &Message) -> Result<(), ProtocolError> {
        let encoded = codec::encode(msg);
        let mut stream = self.outbound[dest as usize]
            .lock()
            .expect("sender mutex poisoned");
        stream
            .write_all(encoded.as_bytes())
            .map_err(ProtocolError::SocketWrite)
    }
}
