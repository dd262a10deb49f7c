// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Bridge Orchestrator Binary.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::time::Duration;

use tokio::signal::unix;

use webb_bridge_orchestrator::cli::{load_config, setup_logger, Opts};
use webb_bridge_orchestrator::context::OrchestratorContext;
use webb_bridge_orchestrator::{probe, service};

/// Exit code used when the shutdown came from an interrupt.
const EXIT_INTERRUPTED: i32 = 130;
/// Exit code used when a duty loop kept failing and gave up.
const EXIT_LOOP_EXHAUSTED: i32 = 2;
/// Grace period between signalling shutdown and exiting, so in-flight loops
/// reach their next suspension point and log their exit.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(300);

/// The main entry point for the orchestrator.
///
/// # Arguments
///
/// * `args` - The command line arguments.
#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose)?;
    match dotenv::dotenv() {
        Ok(_) => {
            tracing::trace!("Loaded .env file");
        }
        Err(e) => {
            tracing::warn!("Failed to load .env file: {}", e);
        }
    }

    // The configuration is validated and configured from the given directory;
    // a broken config exits non-zero before any duty starts.
    let config = load_config(args.config_dir)?;
    let ctx = OrchestratorContext::new(config);

    // start all duties as supervised background tasks. A failure here is the
    // initial parameter fetch failing, which is fatal.
    let mut fatal_rx = service::ignite(&ctx).await?;

    // watch for signals
    let mut ctrlc_signal = unix::signal(unix::SignalKind::interrupt())?;
    let mut termination_signal = unix::signal(unix::SignalKind::terminate())?;
    let shutdown = |ctx: &OrchestratorContext| {
        tracing::event!(
            target: probe::TARGET,
            tracing::Level::DEBUG,
            kind = %probe::Kind::Lifecycle,
            shutdown = true,
        );
        tracing::warn!("Shutting down...");
        // send shutdown signal to all of the duties.
        ctx.shutdown();
        std::thread::sleep(SHUTDOWN_GRACE);
        tracing::info!("Clean Exit ..");
    };
    tokio::select! {
        _ = ctrlc_signal.recv() => {
            tracing::warn!("Interrupted (Ctrl+C) ...");
            shutdown(&ctx);
            std::process::exit(EXIT_INTERRUPTED);
        },
        _ = termination_signal.recv() => {
            tracing::warn!("Got Terminate signal ...");
            shutdown(&ctx);
        },
        Some(e) = fatal_rx.recv() => {
            tracing::error!("A duty loop is persistently failing: {}", e);
            shutdown(&ctx);
            std::process::exit(EXIT_LOOP_EXHAUSTED);
        },
    }
    Ok(())
}
