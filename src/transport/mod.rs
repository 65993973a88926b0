// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! TCP building blocks: one listener per node and one outbound stream per
//! ordered pair `(src, dest)`. Every message `src` sends `dest` always
//! travels on the same outbound socket; it never shares a socket with any
//! other source.

use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use crate::error::ProtocolError;

/// Outbound client sockets time out liveness-only; the protocol itself has
/// no retry semantics and trusts the stream for in-order delivery (spec §9
/// Open Question 4, a knob, not a behavior).
const CLIENT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Binds the listener for node `id` on `127.0.0.1:port`. Retries briefly on
/// `AddrInUse`, since peers racing to set up a full mesh may still be
/// tearing down a previous run's socket in test suites.
pub fn bind(port: u16) -> Result<TcpListener, ProtocolError> {
    let addr = ("127.0.0.1", port);
    let mut last_err = None;

    for attempt in 0..20 {
        match TcpListener::bind(addr) {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse && attempt < 19 => {
                last_err = Some(e);
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(ProtocolError::Setup(e)),
        }
    }

    Err(ProtocolError::Setup(last_err.expect("loop always sets last_err before exhausting retries")))
}

/// Opens the outbound stream this node uses to talk to `dest`'s listener.
/// Retries the connect while the peer hasn't started listening yet.
pub fn connect(port: u16) -> Result<TcpStream, ProtocolError> {
    let addr = ("127.0.0.1", port);
    let mut last_err = None;

    for attempt in 0..100 {
        match TcpStream::connect(addr) {
            Ok(stream) => {
                stream
                    .set_read_timeout(Some(CLIENT_TIMEOUT))
                    .map_err(ProtocolError::Setup)?;
                stream
                    .set_write_timeout(Some(CLIENT_TIMEOUT))
                    .map_err(ProtocolError::Setup)?;
                stream.set_nodelay(true).map_err(ProtocolError::Setup)?;
                return Ok(stream);
            }
            Err(e) if attempt < 99 => {
                last_err = Some(e);
                thread::sleep(Duration::from_millis(20));
            }
            Err(e) => return Err(ProtocolError::Setup(e)),
        }
    }

    Err(ProtocolError::Setup(last_err.expect("loop always sets last_err before exhausting retries")))
}
