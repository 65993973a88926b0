// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The six message-type transitions plus the request loop that drives a
//! node through repeated critical-section entries. Every handler runs with
//! `NodeState`'s mutex held for its state transition, then drops the guard
//! before `Sender` touches a socket.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, info};
use rand::Rng;

use crate::error::ProtocolError;
use crate::message::{Message, MessageType};
use crate::node::{Barrier, NodeState};
use crate::sender::Sender;

/// Dispatches one decoded message to its handler. Errors are logged rather
/// than propagated: a write failure against one peer must not stop this
/// node from servicing the rest of its mesh.
pub fn dispatch(node: &NodeState, sender: &Sender, msg: Message) {
    let result = match msg.msg_type {
        MessageType::Request => request_handler(node, sender, &msg),
        MessageType::Release => release_handler(node, sender, &msg),
        MessageType::Inquire => inquire_handler(node, sender, &msg),
        MessageType::Yield => yield_handler(node, sender, &msg),
        MessageType::Grant => {
            grant_handler(node, &msg);
            Ok(())
        }
        MessageType::Failed => {
            failed_handler(node);
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("node {} failed replying to {:?} from {}: {e}", node.id, msg.msg_type, msg.src);
    }
}

enum Reply {
    Grant(u32),
    Failed(u32),
    Inquire { holder: u32, contender: (u64, u32) },
    None,
}

/// REQUEST received with priority `p = (msg.ts, msg.src)`.
fn request_handler(node: &NodeState, sender: &Sender, msg: &Message) -> Result<(), ProtocolError> {
    let p = (msg.ts, msg.src);

    let reply = node.with_lock(|state| {
        let reply = match state.grants_sent {
            None => {
                state.grants_sent = Some(p);
                Reply::Grant(msg.src)
            }
            Some(hp) if hp < p => {
                state.queue.push(p);
                Reply::Failed(msg.src)
            }
            Some(hp) => {
                state.queue.push(p);
                Reply::Inquire { holder: hp.1, contender: p }
            }
        };
        (reply, false)
    });

    match reply {
        Reply::Grant(dest) => sender.send(node, Message::new(MessageType::Grant, node.id, dest, 0), dest),
        Reply::Failed(dest) => sender.send(node, Message::new(MessageType::Failed, node.id, dest, 0), dest),
        Reply::Inquire { holder, contender } => {
            sender.send(node, Message::inquire(node.id, holder, 0, contender), holder)
        }
        Reply::None => Ok(()),
    }
}

/// RELEASE received from `msg.src`.
fn release_handler(node: &NodeState, sender: &Sender, msg: &Message) -> Result<(), ProtocolError> {
    let p = (msg.ts, msg.src);

    let reply = node.with_lock(|state| {
        if state.grants_sent == Some(p) {
            state.grants_sent = None;
        }
        state.queue.remove_src(msg.src);

        let reply = match state.queue.pop_highest_priority() {
            Some(next) => {
                state.grants_sent = Some(next);
                Reply::Grant(next.1)
            }
            None => {
                state.grants_sent = None;
                Reply::None
            }
        };
        (reply, false)
    });

    match reply {
        Reply::Grant(dest) => sender.send(node, Message::new(MessageType::Grant, node.id, dest, 0), dest),
        _ => Ok(()),
    }
}

/// INQUIRE received from `msg.src` with contender `msg.data`.
fn inquire_handler(node: &NodeState, sender: &Sender, msg: &Message) -> Result<(), ProtocolError> {
    let should_yield = node.with_lock(|state| {
        let should_yield = !state.in_cs;
        if should_yield {
            state.yielded = true;
            state.grants_received.remove(&msg.src);
        }
        (should_yield, false)
    });

    if should_yield {
        sender.send(node, Message::new(MessageType::Yield, node.id, msg.src, 0), msg.src)?;
    }
    Ok(())
}

/// YIELD received from `msg.src` with priority `p = (msg.ts, msg.src)`.
fn yield_handler(node: &NodeState, sender: &Sender, msg: &Message) -> Result<(), ProtocolError> {
    let p = (msg.ts, msg.src);

    let reply = node.with_lock(|state| {
        state.queue.push(p);
        if state.grants_sent == Some(p) {
            state.grants_sent = None;
        }

        let reply = match state.queue.pop_highest_priority() {
            Some(next) => {
                state.grants_sent = Some(next);
                Reply::Grant(next.1)
            }
            None => Reply::None,
        };
        (reply, false)
    });

    match reply {
        Reply::Grant(dest) => sender.send(node, Message::new(MessageType::Grant, node.id, dest, 0), dest),
        _ => Ok(()),
    }
}

/// GRANT received from `msg.src`.
fn grant_handler(node: &NodeState, msg: &Message) {
    let quorum_size = node.quorum_size();
    node.with_lock(|state| {
        state.grants_received.insert(msg.src);
        state.yielded = false;
        state.failed = false;
        let should_notify = state.grants_received.len() >= quorum_size;
        ((), should_notify)
    });
}

/// FAILED received; carries no payload.
fn failed_handler(node: &NodeState) {
    node.with_lock(|state| {
        state.failed = true;
        state.yielded = true;
        ((), false)
    });
}

const MIN_REQUEST_DELAY_SECS: f64 = 2.0;
const MAX_REQUEST_DELAY_SECS: f64 = 8.0;
const MIN_CS_DELAY_SECS: f64 = 0.5;
const MAX_CS_DELAY_SECS: f64 = 1.5;

/// Drives a node through `iterations` critical-section entries, then
/// registers at the termination barrier. Runs on its own thread, alongside
/// the node's `Receiver`.
pub fn request_loop(
    node: &NodeState,
    sender: &Sender,
    iterations: u32,
    barrier: &Barrier,
    shutdown: &AtomicBool,
) {
    let mut rng = rand::thread_rng();

    for iteration in 0..iterations {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }

        let delay = rng.gen_range(MIN_REQUEST_DELAY_SECS..MAX_REQUEST_DELAY_SECS);
        thread::sleep(Duration::from_secs_f64(delay));

        node.with_lock(|state| {
            state.grants_received.insert(node.id);
            ((), false)
        });

        let req = Message::new(MessageType::Request, node.id, 0, 0);
        if let Err(e) = sender.multicast(node, req, &node.colleagues) {
            log::error!("node {} failed to multicast REQUEST: {e}", node.id);
            continue;
        }
        debug!("node {} sent REQUEST to {:?} (iteration {iteration})", node.id, node.colleagues);

        node.wait_for_quorum();

        info!("node {} entering critical section (iteration {iteration})", node.id);
        let cs_delay = rng.gen_range(MIN_CS_DELAY_SECS..MAX_CS_DELAY_SECS);
        thread::sleep(Duration::from_secs_f64(cs_delay));
        info!("node {} leaving critical section (iteration {iteration})", node.id);

        node.with_lock(|state| {
            state.grants_received.clear();
            state.in_cs = false;
            ((), false)
        });

        let rel = Message::new(MessageType::Release, node.id, 0, 0);
        if let Err(e) = sender.multicast(node, rel, &node.colleagues) {
            log::error!("node {} failed to multicast RELEASE: {e}", node.id);
        }
    }

    info!("node {} waiting for all nodes to finish", node.id);
    barrier.wait();
    info!("node {} done", node.id);
}
