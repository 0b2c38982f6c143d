// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::collections::BTreeSet;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chainmgr::{busy, engine, graph, mixer, router, state, ChainId, ChainManager, Settings};
use clap::{crate_version, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "Inspects processing chains offline."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the engine catalog.
    Engines {
        /// The settings file.
        #[arg[short, long]]
        config: Option<PathBuf>,
    },
    /// Restores a saved state and prints the routing table of every chain.
    Routes {
        /// The saved state.
        state: PathBuf,
        /// The settings file.
        #[arg[short, long]]
        config: Option<PathBuf>,
    },
    /// Restores a saved state and checks it for problems.
    Verify {
        /// The saved state.
        state: PathBuf,
        /// The settings file.
        #[arg[short, long]]
        config: Option<PathBuf>,
    },
    /// Checks whether routing one chain into another would create a loop.
    Howl {
        /// The saved state.
        state: PathBuf,
        /// The source chain.
        src: ChainId,
        /// The destination chain.
        dst: ChainId,
        /// Check MIDI routing instead of audio.
        #[arg[short, long]]
        midi: bool,
        /// The settings file.
        #[arg[short, long]]
        config: Option<PathBuf>,
    },
}

/// Builds a manager wired to the mock collaborators.
fn offline_manager(config: Option<&Path>) -> Result<ChainManager, Box<dyn Error>> {
    let settings = Settings::load_or_default(config)?;
    let mixer = Arc::new(mixer::mock::Mixer::new(settings.mixer_channels()));
    Ok(ChainManager::new(
        settings,
        Arc::new(graph::mock::Graph::new()),
        Arc::new(router::mock::Router::new()),
        mixer,
        Arc::new(busy::TracingReporter::new()),
        Arc::new(engine::mock::Launcher::new()),
    ))
}

fn restore(path: &Path, config: Option<&Path>) -> Result<ChainManager, Box<dyn Error>> {
    let mut manager = offline_manager(config)?;
    let saved = state::from_json(&fs::read_to_string(path)?)?;
    manager.set_state(&saved)?;
    Ok(manager)
}

/// Lists every broken invariant of the restored chains.
fn problems(manager: &ChainManager) -> Vec<String> {
    let mut problems = Vec::new();
    let mut mixer_chans = BTreeSet::new();
    let mut zmops = BTreeSet::new();
    for chain_id in manager.chain_ids() {
        let Some(chain) = manager.chain(*chain_id) else {
            continue;
        };
        if chain.fader_pos() > chain.audio_slots().len() {
            problems.push(format!(
                "{}: fader position {} is past {} audio slots",
                chain,
                chain.fader_pos(),
                chain.audio_slots().len()
            ));
        }
        if let Some(mixer_chan) = chain.mixer_chan() {
            if !mixer_chans.insert(mixer_chan) {
                problems.push(format!("{}: mixer strip {} is shared", chain, mixer_chan));
            }
        }
        if let Some(zmop) = chain.zmop() {
            if !zmops.insert(zmop) {
                problems.push(format!("{}: router input {} is shared", chain, zmop));
            }
        }
    }
    for (midi, kind) in [(false, "audio"), (true, "MIDI")] {
        for (src, dst) in manager.find_howls(midi) {
            problems.push(format!(
                "{} from chain {} to chain {} is part of a loop",
                kind, src, dst
            ));
        }
    }
    problems
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Engines { config } => {
            let manager = offline_manager(config.as_deref())?;
            let engines = manager.catalog().list();
            println!("Engines (count: {}):", engines.len());
            for info in engines {
                println!("- {} [{:?}]", info, info.instancing);
            }
        }
        Commands::Routes { state, config } => {
            let manager = restore(&state, config.as_deref())?;
            for chain_id in manager.chain_ids() {
                let Some(chain) = manager.chain(*chain_id) else {
                    continue;
                };
                println!("{}", chain);
                let tables = [("audio", chain.audio_routes()), ("midi", chain.midi_routes())];
                for (label, routes) in tables {
                    for (destination, sources) in routes {
                        println!("  {} {} <- {}", label, destination, sources.join(", "));
                    }
                }
            }
        }
        Commands::Verify { state, config } => {
            let manager = restore(&state, config.as_deref())?;
            let problems = problems(&manager);
            if !problems.is_empty() {
                for problem in &problems {
                    println!("- {}", problem);
                }
                return Err(format!("found {} problems", problems.len()).into());
            }
            info!(chains = manager.chain_count(), "State verified.");
            println!("No problems found.");
        }
        Commands::Howl {
            state,
            src,
            dst,
            midi,
            config,
        } => {
            let manager = restore(&state, config.as_deref())?;
            for chain_id in [src, dst] {
                if manager.chain(chain_id).is_none() {
                    return Err(format!("chain {} doesn't exist", chain_id).into());
                }
            }
            let howls = if midi {
                manager.will_midi_howl(src, dst)
            } else {
                manager.will_audio_howl(src, dst)
            };
            if howls {
                println!("Routing chain {} to chain {} would create a loop.", src, dst);
            } else {
                println!("Routing chain {} to chain {} is safe.", src, dst);
            }
        }
    }

    Ok(())
}
