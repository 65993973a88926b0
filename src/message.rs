// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The wire data model: a `Message` carries one of the six protocol
//! message types between a pair of nodes, stamped with a Lamport timestamp.

use serde::{Deserialize, Serialize};

pub type NodeId = u32;

/// `(ts, src)`, compared lexicographically: smaller `ts` wins, ties broken
/// by smaller `src`. Total order used everywhere the protocol compares
/// requests against each other.
pub type Priority = (u64, NodeId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageType {
    Request,
    Grant,
    Release,
    Failed,
    Inquire,
    Yield,
}

/// Payload carried by a message. `None` for every type except `Inquire`,
/// which names the contending request that prompted the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Data {
    Contender((u64, NodeId)),
    None,
}

impl Data {
    pub fn contender(&self) -> Option<Priority> {
        match self {
            Data::Contender(p) => Some(*p),
            Data::None => None,
        }
    }
}

impl Default for Data {
    fn default() -> Self {
        Data::None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub msg_type: MessageType,
    pub src: NodeId,
    pub dest: NodeId,
    pub ts: u64,
    #[serde(default)]
    pub data: Data,
}

impl Message {
    pub fn new(msg_type: MessageType, src: NodeId, dest: NodeId, ts: u64) -> Self {
        Message {
            msg_type,
            src,
            dest,
            ts,
            data: Data::None,
        }
    }

    pub fn inquire(src: NodeId, dest: NodeId, ts: u64, contender: Priority) -> Self {
        Message {
            msg_type: MessageType::Inquire,
            src,
            dest,
            ts,
            data: Data::Contender(contender),
        }
    }

    pub fn priority(&self) -> Priority {
        (self.ts, self.src)
    }
}
