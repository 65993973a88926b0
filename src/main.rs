// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use clap::Parser;

use maekawa_mutex::config::Config;
use maekawa_mutex::orchestrator::Orchestrator;

fn main() {
    env_logger::init();

    let config = Config::parse();
    log::info!(
        "starting {} nodes on ports {}..{}, {} iterations each",
        config.num_nodes,
        config.port,
        config.port_for(config.num_nodes.saturating_sub(1)),
        config.iterations
    );

    if let Err(e) = Orchestrator::new(config).run() {
        log::error!("run failed: {e}");
        std::process::exit(1);
    }
}
