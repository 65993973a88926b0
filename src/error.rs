// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Crate-wide error type. Every fallible surface in the protocol core
//! (codec, transport, sender, receiver) returns `ProtocolError` so callers
//! don't have to juggle a different error type per component.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A concatenated JSON stream did not end in `}`.
    #[error("malformed frame: trailing bytes do not end in '}}'")]
    MalformedFrame,

    /// A single frame failed to deserialize as a `Message`.
    #[error("malformed json: {0}")]
    MalformedJson(#[from] serde_json::Error),

    /// `msg_type` decoded to a string outside the six known variants.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// A socket read failed; the caller must close and drop the connection.
    #[error("socket read error: {0}")]
    SocketRead(#[source] io::Error),

    /// A socket write failed; the caller must close and drop the connection.
    #[error("socket write error: {0}")]
    SocketWrite(#[source] io::Error),

    /// Could not bind or connect during transport setup.
    #[error("transport setup error: {0}")]
    Setup(#[source] io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
