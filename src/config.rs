// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Run configuration. Log verbosity is not a flag here; it's controlled the
//! conventional way, through `RUST_LOG`.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "maekawa-mutex", about = "Maekawa's voting-based distributed mutual exclusion over TCP")]
pub struct Config {
    /// Number of nodes in the mesh.
    #[arg(long, default_value_t = 9)]
    pub num_nodes: u32,

    /// Base TCP port; node `i` listens on `port + i`.
    #[arg(long, default_value_t = 9000)]
    pub port: u16,

    /// Critical-section entries each node performs before registering at
    /// the termination barrier.
    #[arg(long, default_value_t = 3)]
    pub iterations: u32,
}

impl Config {
    pub fn port_for(&self, id: u32) -> u16 {
        self.port + id as u16
    }
}
