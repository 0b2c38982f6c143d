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
use std::path::Path;

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::engine::Instancing;
use crate::processor::ProcessorType;

use self::error::ConfigError;

pub mod error;

const DEFAULT_MIXER_CHANNELS: usize = 17;
const DEFAULT_ROUTER_INPUTS: usize = 16;
const MAX_ROUTER_INPUTS: usize = 16;

/// A physical MIDI input device known to the router.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct MidiInput {
    /// The device name.
    pub name: String,
    /// The driver that exposes the device (e.g. "alsa", "bluetooth", "network").
    #[serde(default)]
    pub driver: String,
}

/// An engine catalog entry supplied through settings. Entries with a code that is
/// already in the catalog replace the built-in definition.
#[derive(Deserialize, Clone, Debug)]
pub struct EngineConfig {
    /// The engine code, e.g. "FS".
    pub code: String,
    /// The human readable engine name.
    pub name: String,
    /// The type of processor this engine hosts.
    #[serde(rename = "type")]
    pub processor_type: ProcessorType,
    /// How processors of this engine share runtime instances.
    #[serde(default)]
    pub instancing: Instancing,
    /// Whether a running instance may be reused across a state reload.
    #[serde(default = "default_true")]
    pub reuse_on_reload: bool,
    /// Control symbols exposed by each processor.
    #[serde(default)]
    pub controls: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// The chain manager settings.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Settings {
    /// Number of mixer strips. The last strip belongs to the Main chain.
    mixer_channels: usize,

    /// Number of router inputs ("zmops") available to chains.
    router_inputs: usize,

    /// A MIDI channel reserved for the master keyboard, never handed out to chains.
    master_midi_chan: Option<u8>,

    /// Whether CC 0/32 select banks on the chains listening to a channel.
    midi_bank_change_by_cc: bool,

    /// Input devices whose CCs address the active chain rather than a MIDI channel.
    active_chain_devices: Vec<u8>,

    /// The input device used for controller feedback.
    feedback_device: Option<u8>,

    /// The MIDI input devices, indexed by position.
    midi_inputs: Vec<MidiInput>,

    /// Drivers whose devices are not routed to new chains by default.
    excluded_drivers: Vec<String>,

    /// Extra engine catalog entries.
    engines: Vec<EngineConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            mixer_channels: DEFAULT_MIXER_CHANNELS,
            router_inputs: DEFAULT_ROUTER_INPUTS,
            master_midi_chan: None,
            midi_bank_change_by_cc: false,
            active_chain_devices: Vec::new(),
            feedback_device: None,
            midi_inputs: Vec::new(),
            excluded_drivers: Vec::new(),
            engines: Vec::new(),
        }
    }
}

impl Settings {
    /// Loads settings from the given file. Values may be overridden through
    /// CHAINMGR_* environment variables.
    pub fn load(path: &Path) -> Result<Settings, ConfigError> {
        let settings = Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("CHAINMGR").try_parsing(true))
            .build()?
            .try_deserialize::<Settings>()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from the given file, falling back to defaults if no path is given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Settings, ConfigError> {
        match path {
            Some(path) => Settings::load(path),
            None => Ok(Settings::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.mixer_channels < 2 {
            return Err(ConfigError::Invalid {
                field: "mixer_channels",
                reason: format!("need at least 2 strips, got {}", self.mixer_channels),
            });
        }
        if self.router_inputs == 0 || self.router_inputs > MAX_ROUTER_INPUTS {
            return Err(ConfigError::Invalid {
                field: "router_inputs",
                reason: format!(
                    "must be between 1 and {}, got {}",
                    MAX_ROUTER_INPUTS, self.router_inputs
                ),
            });
        }
        if let Some(chan) = self.master_midi_chan {
            if chan > 15 {
                return Err(ConfigError::Invalid {
                    field: "master_midi_chan",
                    reason: format!("{} is not a MIDI channel", chan),
                });
            }
        }
        Ok(())
    }

    /// Returns the number of mixer strips.
    pub fn mixer_channels(&self) -> usize {
        self.mixer_channels
    }

    /// Returns the number of router inputs.
    pub fn router_inputs(&self) -> usize {
        self.router_inputs
    }

    /// Returns the reserved master MIDI channel.
    pub fn master_midi_chan(&self) -> Option<u8> {
        self.master_midi_chan
    }

    /// Returns whether bank changes by CC are enabled.
    pub fn midi_bank_change_by_cc(&self) -> bool {
        self.midi_bank_change_by_cc
    }

    /// Returns the devices using active-chain CC addressing.
    pub fn active_chain_devices(&self) -> &[u8] {
        &self.active_chain_devices
    }

    /// Returns the controller feedback device.
    pub fn feedback_device(&self) -> Option<u8> {
        self.feedback_device
    }

    /// Returns the MIDI input devices.
    pub fn midi_inputs(&self) -> &[MidiInput] {
        &self.midi_inputs
    }

    /// Returns true if new chains should receive from the given input device.
    pub fn routes_input_by_default(&self, input: &MidiInput) -> bool {
        !self.excluded_drivers.iter().any(|d| *d == input.driver)
    }

    /// Returns the extra engine catalog entries.
    pub fn engines(&self) -> &[EngineConfig] {
        &self.engines
    }

    #[cfg(test)]
    pub fn with_midi_inputs(mut self, inputs: Vec<MidiInput>, excluded: Vec<String>) -> Self {
        self.midi_inputs = inputs;
        self.excluded_drivers = excluded;
        self
    }

    #[cfg(test)]
    pub fn with_master_midi_chan(mut self, chan: Option<u8>) -> Self {
        self.master_midi_chan = chan;
        self
    }

    #[cfg(test)]
    pub fn with_cc_addressing(
        mut self,
        bank_change_by_cc: bool,
        active_chain_devices: Vec<u8>,
        feedback_device: Option<u8>,
    ) -> Self {
        self.midi_bank_change_by_cc = bank_change_by_cc;
        self.active_chain_devices = active_chain_devices;
        self.feedback_device = feedback_device;
        self
    }

    #[cfg(test)]
    pub fn with_pools(mut self, mixer_channels: usize, router_inputs: usize) -> Self {
        self.mixer_channels = mixer_channels;
        self.router_inputs = router_inputs;
        self
    }
}

#[cfg(test)]
mod test {
    use std::{error::Error, fs};

    use config::{Config, File, FileFormat};

    use super::*;

    #[test]
    fn test_settings_defaults() {
        let settings: Settings = Config::builder()
            .add_source(File::from_str("{}", FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.mixer_channels(), 17);
        assert_eq!(settings.router_inputs(), 16);
        assert_eq!(settings.master_midi_chan(), None);
        assert!(!settings.midi_bank_change_by_cc());
        assert!(settings.engines().is_empty());
    }

    #[test]
    fn test_settings_load_file() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("chainmgr.yaml");
        fs::write(
            &path,
            r#"
            mixer_channels: 9
            master_midi_chan: 15
            midi_bank_change_by_cc: true
            active_chain_devices: [2]
            midi_inputs:
              - name: keys
                driver: alsa
              - name: phone
                driver: bluetooth
            excluded_drivers: [bluetooth]
            engines:
              - code: XX
                name: Test Synth
                type: midi_synth
                instancing: per_processor
                controls: [volume, cutoff]
            "#,
        )?;

        let settings = Settings::load(&path)?;
        assert_eq!(settings.mixer_channels(), 9);
        assert_eq!(settings.master_midi_chan(), Some(15));
        assert!(settings.midi_bank_change_by_cc());
        assert_eq!(settings.active_chain_devices(), &[2]);
        assert_eq!(settings.midi_inputs().len(), 2);
        assert!(settings.routes_input_by_default(&settings.midi_inputs()[0]));
        assert!(!settings.routes_input_by_default(&settings.midi_inputs()[1]));

        let engine = &settings.engines()[0];
        assert_eq!(engine.code, "XX");
        assert_eq!(engine.processor_type, ProcessorType::MidiSynth);
        assert_eq!(engine.instancing, Instancing::PerProcessor);
        assert!(engine.reuse_on_reload);
        assert_eq!(engine.controls, vec!["volume", "cutoff"]);
        Ok(())
    }

    #[test]
    fn test_settings_rejects_bad_master_channel() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("chainmgr.yaml");
        fs::write(&path, "master_midi_chan: 16\n")?;

        match Settings::load(&path) {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "master_midi_chan"),
            _ => panic!("expected an invalid setting error"),
        }
        Ok(())
    }
}
