// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Wire framing and (de)serialization for `Message`. Messages are
//! concatenated directly on the wire with no length prefix and no
//! delimiter, so the only way to tell them apart is to split on every
//! `}{` boundary and require the tail to end in `}`.

use crate::error::ProtocolError;
use crate::message::Message;

/// Splits a buffer holding the unfragmented concatenation of k >= 1 JSON
/// objects into the k individual object strings, in order.
///
/// Assumes payload values never contain a literal `}{` substring, which
/// holds for this protocol's shallow tuple/scalar payloads.
pub fn split_frames(buf: &str) -> Result<Vec<&str>, ProtocolError> {
    if buf.is_empty() {
        return Ok(Vec::new());
    }

    let mut frames = Vec::new();
    let mut rest = buf;

    loop {
        match rest.find("}{") {
            Some(split) => {
                let (head, tail) = rest.split_at(split + 1);
                frames.push(head);
                rest = tail;
            }
            None => {
                if !rest.ends_with('}') {
                    return Err(ProtocolError::MalformedFrame);
                }
                frames.push(rest);
                break;
            }
        }
    }

    Ok(frames)
}

const KNOWN_TYPES: &[&str] = &["REQUEST", "GRANT", "RELEASE", "FAILED", "INQUIRE", "YIELD"];

/// Decodes a single framed JSON object into a `Message`.
///
/// `msg_type` is checked against the known enum members before the rest of
/// the object is decoded, so a stray type name surfaces as
/// `UnknownMessageType` rather than being folded into a generic JSON
/// decoding failure.
pub fn decode(frame: &str) -> Result<Message, ProtocolError> {
    let value: serde_json::Value = serde_json::from_str(frame).map_err(ProtocolError::MalformedJson)?;

    if let Some(msg_type) = value.get("msg_type").and_then(|v| v.as_str()) {
        if !KNOWN_TYPES.contains(&msg_type) {
            return Err(ProtocolError::UnknownMessageType(msg_type.to_owned()));
        }
    }

    serde_json::from_value(value).map_err(ProtocolError::MalformedJson)
}

/// Serializes a `Message` to its compact JSON wire form.
pub fn encode(msg: &Message) -> String {
    // `Message` always serializes: its fields are plain scalars/enums, so
    // this cannot fail in practice.
    serde_json::to_string(msg).expect("Message serialization is infallible")
}
