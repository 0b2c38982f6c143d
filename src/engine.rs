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
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    config::EngineConfig,
    processor::{ProcId, ProcessorType},
};

pub mod mock;

/// How processors of an engine share runtime instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instancing {
    /// Every processor of the code shares one instance.
    #[default]
    Shared,
    /// One instance hosts every processor of the code, and its chains live and die
    /// together.
    SingleInstance,
    /// Every processor gets its own instance.
    PerProcessor,
}

/// Catalog metadata for an engine code.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineInfo {
    pub code: String,
    pub name: String,
    pub processor_type: ProcessorType,
    pub instancing: Instancing,
    pub reuse_on_reload: bool,
    pub controls: Vec<String>,
}

impl EngineInfo {
    fn new(
        code: &str,
        name: &str,
        processor_type: ProcessorType,
        instancing: Instancing,
        reuse_on_reload: bool,
        controls: &[&str],
    ) -> EngineInfo {
        EngineInfo {
            code: code.to_string(),
            name: name.to_string(),
            processor_type,
            instancing,
            reuse_on_reload,
            controls: controls.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl From<&EngineConfig> for EngineInfo {
    fn from(config: &EngineConfig) -> Self {
        EngineInfo {
            code: config.code.clone(),
            name: config.name.clone(),
            processor_type: config.processor_type,
            instancing: config.instancing,
            reuse_on_reload: config.reuse_on_reload,
            controls: config.controls.clone(),
        }
    }
}

impl fmt::Display for EngineInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.code, self.name, self.processor_type)
    }
}

fn builtin_engines() -> Vec<EngineInfo> {
    use Instancing::*;
    use ProcessorType::*;

    const SYNTH: &[&str] = &["volume", "sustain", "modulation"];
    const SAMPLER: &[&str] = &["volume", "sustain"];
    const PIANO: &[&str] = &["volume", "sustain", "sostenuto", "soft"];
    const ORGAN: &[&str] = &["volume", "leslie"];
    const PIPES: &[&str] = &["volume", "swell"];
    const FX: &[&str] = &["level", "wet"];
    const ARP: &[&str] = &["hold", "rate"];
    const PLAYER: &[&str] = &["gain", "hold"];

    vec![
        EngineInfo::new("ZY", "ZynAddSubFX", MidiSynth, Shared, true, SYNTH),
        EngineInfo::new("FS", "FluidSynth", MidiSynth, Shared, true, SYNTH),
        EngineInfo::new("LS", "LinuxSampler", MidiSynth, Shared, true, SAMPLER),
        EngineInfo::new("SF", "Sfizz", MidiSynth, PerProcessor, true, SAMPLER),
        EngineInfo::new("PT", "Pianoteq", MidiSynth, SingleInstance, true, PIANO),
        EngineInfo::new("BF", "setBfree", MidiSynth, SingleInstance, false, ORGAN),
        EngineInfo::new("AE", "Aeolus", MidiSynth, SingleInstance, false, PIPES),
        EngineInfo::new("LV", "LV2 Plugin", AudioEffect, PerProcessor, true, FX),
        EngineInfo::new("AR", "Arpeggiator", MidiTool, PerProcessor, true, ARP),
        EngineInfo::new("AP", "Audio Player", Special, PerProcessor, false, PLAYER),
        EngineInfo::new("PD", "PureData", Special, PerProcessor, false, &[]),
    ]
}

/// The engine catalog. Built once at startup and only changed by an explicit refresh.
pub struct EngineCatalog {
    engines: BTreeMap<String, EngineInfo>,
}

impl EngineCatalog {
    /// Creates a catalog from the built-in engines plus the given entries.
    pub fn new(extra: &[EngineConfig]) -> EngineCatalog {
        let mut catalog = EngineCatalog {
            engines: BTreeMap::new(),
        };
        catalog.refresh(extra);
        catalog
    }

    /// Rebuilds the catalog. Extra entries replace built-ins with the same code.
    pub fn refresh(&mut self, extra: &[EngineConfig]) {
        self.engines = builtin_engines()
            .into_iter()
            .map(|info| (info.code.clone(), info))
            .collect();
        for config in extra {
            debug!(code = config.code, "Adding engine from settings.");
            self.engines.insert(config.code.clone(), EngineInfo::from(config));
        }
        info!(engines = self.engines.len(), "Engine catalog refreshed.");
    }

    /// Returns the engine with the given code.
    pub fn get(&self, code: &str) -> Option<&EngineInfo> {
        self.engines.get(code)
    }

    /// Returns all engines ordered by code.
    pub fn list(&self) -> Vec<&EngineInfo> {
        self.engines.values().collect()
    }
}

/// Starts and stops the external engine programs.
pub trait EngineLauncher: Send + Sync {
    /// Starts the engine instance with the given key.
    fn start(&self, key: &str, info: &EngineInfo) -> Result<(), String>;

    /// Stops the engine instance with the given key.
    fn stop(&self, key: &str);
}

/// A running engine instance and the processors it hosts.
#[derive(Debug)]
pub struct Engine {
    key: String,
    code: String,
    processors: BTreeSet<ProcId>,
}

impl Engine {
    pub fn new(key: &str, code: &str) -> Engine {
        Engine {
            key: key.to_string(),
            code: code.to_string(),
            processors: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn attach(&mut self, id: ProcId) {
        self.processors.insert(id);
    }

    pub fn detach(&mut self, id: ProcId) {
        self.processors.remove(&id);
    }

    /// Returns the processors hosted by this instance.
    pub fn processors(&self) -> &BTreeSet<ProcId> {
        &self.processors
    }

    /// An instance hosting no processors may be torn down.
    pub fn is_unused(&self) -> bool {
        self.processors.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_catalog_refresh_overrides() {
        let mut catalog = EngineCatalog::new(&[]);
        assert_eq!(catalog.get("BF").map(|e| e.instancing), Some(Instancing::SingleInstance));
        assert!(catalog.get("XX").is_none());

        catalog.refresh(&[EngineConfig {
            code: "FS".to_string(),
            name: "Fluid".to_string(),
            processor_type: ProcessorType::MidiSynth,
            instancing: Instancing::PerProcessor,
            reuse_on_reload: false,
            controls: vec![],
        }]);
        let fs = catalog.get("FS").expect("FS should exist");
        assert_eq!(fs.name, "Fluid");
        assert_eq!(fs.instancing, Instancing::PerProcessor);
        assert!(!fs.reuse_on_reload);
    }

    #[test]
    fn test_engine_usage() {
        let mut engine = Engine::new("FS", "FS");
        assert!(engine.is_unused());
        engine.attach(1);
        engine.attach(2);
        engine.detach(1);
        assert!(!engine.is_unused());
        engine.detach(2);
        assert!(engine.is_unused());
    }
}
