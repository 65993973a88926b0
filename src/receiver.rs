// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Inbound side of a node: a readiness-driven accept/read loop standing in
//! for a `select()` call with a 20 second timeout. Each readable event reads
//! at most one 4KiB chunk per connection and decodes every complete frame
//! it contains; a chunk that fails to decode is logged and discarded rather
//! than buffered, matching the one-shot-per-read handling this protocol has
//! always used (there is no cross-read reassembly).

use std::collections::HashMap;
use std::io::Read;
use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, error, warn};
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};

use crate::codec;
use crate::error::ProtocolError;
use crate::message::Message;
use crate::node::NodeState;

const LISTENER: Token = Token(0);
const POLL_TIMEOUT: Duration = Duration::from_secs(20);
const READ_CHUNK: usize = 4096;

/// Drives a node's inbound socket traffic until `shutdown` is set. Every
/// decoded message is merged into `node`'s Lamport clock before `on_message`
/// runs, per the receive-side clock rule.
pub fn run(
    listener: StdTcpListener,
    node: &NodeState,
    shutdown: &AtomicBool,
    mut on_message: impl FnMut(Message),
) -> Result<(), ProtocolError> {
    listener.set_nonblocking(true).map_err(ProtocolError::Setup)?;
    let mut listener = TcpListener::from_std(listener);

    let mut poll = Poll::new().map_err(ProtocolError::Setup)?;
    poll.registry()
        .register(&mut listener, LISTENER, Interest::READABLE)
        .map_err(ProtocolError::Setup)?;

    let mut connections: HashMap<Token, TcpStream> = HashMap::new();
    let mut next_token = 1usize;
    let mut events = Events::with_capacity(128);

    while !shutdown.load(Ordering::Relaxed) {
        match poll.poll(&mut events, Some(POLL_TIMEOUT)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ProtocolError::Setup(e)),
        }

        if events.is_empty() {
            debug!("node {} - timed out waiting for traffic", node.id);
            continue;
        }

        for event in events.iter() {
            if event.token() == LISTENER {
                accept_all(&mut listener, &poll, &mut connections, &mut next_token);
            } else {
                handle_readable(event, &mut connections, &poll, node, &mut on_message);
            }
        }
    }

    Ok(())
}

fn accept_all(
    listener: &mut TcpListener,
    poll: &Poll,
    connections: &mut HashMap<Token, TcpStream>,
    next_token: &mut usize,
) {
    loop {
        match listener.accept() {
            Ok((mut stream, addr)) => {
                let token = Token(*next_token);
                *next_token += 1;
                if let Err(e) = poll.registry().register(&mut stream, token, Interest::READABLE) {
                    warn!("failed to register accepted connection from {addr}: {e}");
                    continue;
                }
                connections.insert(token, stream);
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
            Err(e) => {
                warn!("accept failed: {e}");
                break;
            }
        }
    }
}

fn handle_readable(
    event: &Event,
    connections: &mut HashMap<Token, TcpStream>,
    poll: &Poll,
    node: &NodeState,
    on_message: &mut impl FnMut(Message),
) {
    let token = event.token();
    let Some(stream) = connections.get_mut(&token) else {
        return;
    };

    let mut buf = [0u8; READ_CHUNK];
    match stream.read(&mut buf) {
        Ok(0) => close(token, connections, poll),
        Ok(n) => {
            let chunk = String::from_utf8_lossy(&buf[..n]);
            process_chunk(&chunk, node, on_message);
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
        Err(e) => {
            warn!("{}", ProtocolError::SocketRead(e));
            close(token, connections, poll);
        }
    }
}

fn process_chunk(chunk: &str, node: &NodeState, on_message: &mut impl FnMut(Message)) {
    let frames = match codec::split_frames(chunk) {
        Ok(frames) => frames,
        Err(e) => {
            error!("discarding unparsable read: {e}");
            return;
        }
    };

    for frame in frames {
        match codec::decode(frame) {
            Ok(msg) => {
                node.with_lock(|state| {
                    state.merge(msg.ts);
                    ((), false)
                });
                on_message(msg);
            }
            Err(e) => error!("discarding undecodable frame: {e}"),
        }
    }
}

fn close(token: Token, connections: &mut HashMap<Token, TcpStream>, poll: &Poll) {
    if let Some(mut stream) = connections.remove(&token) {
        let _ = poll.registry().deregister(&mut stream);
    }
}
