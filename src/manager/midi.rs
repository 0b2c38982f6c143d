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

//! MIDI CC bindings and the real-time dispatch path.
//!
//! Bindings are written by the chain manager and read by [CcDispatcher], which is
//! cloned into the MIDI input context. Dispatch only takes short map locks and
//! never touches engines or the connection graph.

use std::{collections::BTreeMap, sync::Arc};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::{
    config::Settings,
    processor::{BankSelect, ChainId, Control, ProcId},
    router::MidiChannel,
    state::LearnedBinding,
};

/// CC numbers that behave like pedals: sustain, sostenuto, soft and hold 2.
pub const PEDAL_CCS: [u8; 4] = [64, 66, 67, 69];

/// Values at or above this are "down".
const PEDAL_THRESHOLD: u8 = 64;

const BANK_MSB_CC: u8 = 0;
const BANK_LSB_CC: u8 = 32;

type Bucket = Vec<Arc<dyn Control>>;

#[derive(Default)]
struct Bindings {
    /// (device, chan, cc)
    absolute: BTreeMap<(u8, u8, u8), Bucket>,
    /// (chain, cc)
    by_chain: BTreeMap<(ChainId, u8), Bucket>,
    /// (chan, cc)
    by_chan: BTreeMap<(u8, u8), Bucket>,
    /// Bank selectors of the chains listening on each channel.
    banks: Vec<(MidiChannel, Arc<BankSelect>)>,
    active_chain: Option<ChainId>,
}

fn same_control(control: &Arc<dyn Control>, processor: ProcId, symbol: &str) -> bool {
    control.processor_id() == processor && control.symbol() == symbol
}

fn scrub<K: Ord>(table: &mut BTreeMap<K, Bucket>, keep: &dyn Fn(&Arc<dyn Control>) -> bool) {
    table.retain(|_, bucket| {
        bucket.retain(|control| keep(control));
        !bucket.is_empty()
    });
}

fn count<K>(table: &BTreeMap<K, Bucket>) -> usize {
    table.values().map(Vec::len).sum()
}

#[derive(Default)]
struct Held {
    down: bool,
    controls: Bucket,
}

/// Routes incoming CC events to bound controls. Cheap to clone; every clone shares
/// the same binding tables.
#[derive(Clone)]
pub struct CcDispatcher {
    bindings: Arc<RwLock<Bindings>>,
    held: Arc<Mutex<BTreeMap<u8, Held>>>,
    bank_change_by_cc: bool,
    feedback_device: Option<u8>,
    active_chain_devices: Arc<Vec<u8>>,
}

impl CcDispatcher {
    pub fn new(settings: &Settings) -> CcDispatcher {
        CcDispatcher {
            bindings: Arc::new(RwLock::new(Bindings::default())),
            held: Arc::new(Mutex::new(BTreeMap::new())),
            bank_change_by_cc: settings.midi_bank_change_by_cc(),
            feedback_device: settings.feedback_device(),
            active_chain_devices: Arc::new(settings.active_chain_devices().to_vec()),
        }
    }

    /// Binds a control. With a device the binding is absolute. Without one it is
    /// addressed both by the owning chain (when active) and by the MIDI channel.
    /// Any earlier binding of the same control is dropped first.
    pub(crate) fn bind(
        &self,
        device: Option<u8>,
        chan: u8,
        cc: u8,
        control: Arc<dyn Control>,
        chain_id: Option<ChainId>,
    ) {
        let processor = control.processor_id();
        let symbol = control.symbol().to_string();
        let mut bindings = self.bindings.write();
        Self::scrub_bindings(&mut bindings, &|c: &Arc<dyn Control>| {
            !same_control(c, processor, &symbol)
        });

        match device {
            Some(device) => {
                bindings
                    .absolute
                    .entry((device, chan, cc))
                    .or_default()
                    .push(control);
            }
            None => {
                if let Some(chain_id) = chain_id {
                    bindings
                        .by_chain
                        .entry((chain_id, cc))
                        .or_default()
                        .push(control.clone());
                }
                bindings.by_chan.entry((chan, cc)).or_default().push(control);
            }
        }
        debug!(processor, symbol, chan, cc, device, "Bound control.");
    }

    fn scrub_bindings(bindings: &mut Bindings, keep: &dyn Fn(&Arc<dyn Control>) -> bool) {
        scrub(&mut bindings.absolute, keep);
        scrub(&mut bindings.by_chain, keep);
        scrub(&mut bindings.by_chan, keep);
    }

    fn scrub_held(&self, keep: &dyn Fn(&Arc<dyn Control>) -> bool) {
        for held in self.held.lock().values_mut() {
            held.controls.retain(|control| keep(control));
        }
    }

    /// Removes every binding of a control. Returns false if nothing was bound.
    pub(crate) fn unbind(&self, processor: ProcId, symbol: &str) -> bool {
        let keep = |c: &Arc<dyn Control>| !same_control(c, processor, symbol);
        let removed = {
            let mut bindings = self.bindings.write();
            let before = Self::binding_count(&bindings);
            Self::scrub_bindings(&mut bindings, &keep);
            before != Self::binding_count(&bindings)
        };
        self.scrub_held(&keep);
        removed
    }

    /// Removes every binding of every control of a processor.
    pub(crate) fn unbind_processor(&self, processor: ProcId) {
        let keep = |c: &Arc<dyn Control>| c.processor_id() != processor;
        Self::scrub_bindings(&mut self.bindings.write(), &keep);
        self.scrub_held(&keep);
    }

    /// Drops every binding.
    pub(crate) fn clear(&self) {
        let mut bindings = self.bindings.write();
        bindings.absolute.clear();
        bindings.by_chain.clear();
        bindings.by_chan.clear();
        self.held.lock().clear();
    }

    fn binding_count(bindings: &Bindings) -> usize {
        count(&bindings.absolute) + count(&bindings.by_chain) + count(&bindings.by_chan)
    }

    pub(crate) fn set_active_chain(&self, chain_id: Option<ChainId>) {
        self.bindings.write().active_chain = chain_id;
    }

    pub fn active_chain(&self) -> Option<ChainId> {
        self.bindings.read().active_chain
    }

    pub(crate) fn set_bank_targets(&self, banks: Vec<(MidiChannel, Arc<BankSelect>)>) {
        self.bindings.write().banks = banks;
    }

    /// The bindings as serializable references. Channel bindings are listed once even
    /// though they are also addressed by chain.
    pub fn learned(&self) -> Vec<LearnedBinding> {
        let bindings = self.bindings.read();
        let absolute = bindings
            .absolute
            .iter()
            .flat_map(|((device, chan, cc), bucket)| {
                bucket.iter().map(move |control| LearnedBinding {
                    device: Some(*device),
                    chan: *chan,
                    cc: *cc,
                    processor: control.processor_id(),
                    symbol: control.symbol().to_string(),
                })
            });
        let by_chan = bindings.by_chan.iter().flat_map(|((chan, cc), bucket)| {
            bucket.iter().map(move |control| LearnedBinding {
                device: None,
                chan: *chan,
                cc: *cc,
                processor: control.processor_id(),
                symbol: control.symbol().to_string(),
            })
        });
        absolute.chain(by_chan).collect()
    }

    /// Returns true while the pedal CC is down.
    pub fn is_held(&self, cc: u8) -> bool {
        self.held.lock().get(&cc).is_some_and(|held| held.down)
    }

    /// The number of controls held by a pedal CC.
    pub fn held_count(&self, cc: u8) -> usize {
        self.held.lock().get(&cc).map_or(0, |held| held.controls.len())
    }

    /// Dispatches one CC event. The first matching stage wins:
    ///
    /// 1. bank select (CC 0/32), when bank change by CC is enabled,
    /// 2. the controller feedback device, applied to channel bindings without echo,
    /// 3. absolute device bindings,
    /// 4. active-chain or channel bindings, depending on the device, plus the pedal
    ///    hold state for pedal CCs.
    pub fn control_change(&self, device: u8, chan: u8, cc: u8, value: u8) {
        let bindings = self.bindings.read();

        if self.bank_change_by_cc && (cc == BANK_MSB_CC || cc == BANK_LSB_CC) {
            for (_, bank) in bindings.banks.iter().filter(|(c, _)| c.matches(chan)) {
                if cc == BANK_MSB_CC {
                    bank.set_msb(value);
                } else {
                    bank.set_lsb(value);
                }
            }
            return;
        }

        if self.feedback_device == Some(device) {
            if let Some(bucket) = bindings.by_chan.get(&(chan, cc)) {
                for control in bucket {
                    control.midi_control_change(value, false);
                }
            }
            return;
        }

        if let Some(bucket) = bindings.absolute.get(&(device, chan, cc)) {
            for control in bucket {
                control.midi_control_change(value, true);
            }
            return;
        }

        let bucket = if self.active_chain_devices.contains(&device) {
            bindings
                .active_chain
                .and_then(|chain_id| bindings.by_chain.get(&(chain_id, cc)))
        } else {
            bindings.by_chan.get(&(chan, cc))
        };
        for control in bucket.into_iter().flatten() {
            control.midi_control_change(value, true);
        }
        if PEDAL_CCS.contains(&cc) {
            self.update_pedal(cc, value, bucket);
        }
    }

    /// Down pushes the bound controls onto the CC's stack. Up releases the whole
    /// stack, last held first, even when the event itself reaches no binding.
    fn update_pedal(&self, cc: u8, value: u8, bucket: Option<&Bucket>) {
        let released = {
            let mut held = self.held.lock();
            if value >= PEDAL_THRESHOLD {
                let Some(bucket) = bucket else {
                    return;
                };
                let held = held.entry(cc).or_default();
                held.down = true;
                for control in bucket {
                    if !held.controls.iter().any(|c| Arc::ptr_eq(c, control)) {
                        held.controls.push(control.clone());
                    }
                }
                return;
            }
            let Some(held) = held.get_mut(&cc) else {
                return;
            };
            held.down = false;
            std::mem::take(&mut held.controls)
        };
        for control in released.into_iter().rev() {
            control.release();
        }
    }
}

#[cfg(test)]
mod test {
    use crate::test::RecordingControl;

    use super::*;

    fn dispatcher(settings: Settings) -> CcDispatcher {
        CcDispatcher::new(&settings)
    }

    #[test]
    fn test_rebind_replaces_previous() {
        let dispatcher = dispatcher(Settings::default());
        let control = RecordingControl::new(1, "volume");
        dispatcher.bind(None, 0, 7, control.clone(), Some(1));
        dispatcher.bind(None, 0, 11, control.clone(), Some(1));

        dispatcher.control_change(0, 0, 7, 100);
        dispatcher.control_change(0, 0, 11, 90);
        assert_eq!(control.events(), vec!["cc 90"]);
        assert_eq!(dispatcher.learned().len(), 1);
    }

    #[test]
    fn test_unbind_prunes_buckets() {
        let dispatcher = dispatcher(Settings::default());
        let control = RecordingControl::new(1, "volume");
        dispatcher.bind(Some(2), 0, 7, control.clone(), Some(1));
        assert!(dispatcher.unbind(1, "volume"));
        assert!(!dispatcher.unbind(1, "volume"));
        assert!(dispatcher.learned().is_empty());
        assert!(dispatcher.bindings.read().absolute.is_empty());
    }

    #[test]
    fn test_absolute_binding_wins() {
        let dispatcher = dispatcher(Settings::default());
        let absolute = RecordingControl::new(1, "volume");
        let by_chan = RecordingControl::new(2, "volume");
        dispatcher.bind(Some(3), 0, 7, absolute.clone(), Some(1));
        dispatcher.bind(None, 0, 7, by_chan.clone(), Some(2));

        dispatcher.control_change(3, 0, 7, 10);
        assert_eq!(absolute.events(), vec!["cc 10"]);
        assert!(by_chan.events().is_empty());

        dispatcher.control_change(4, 0, 7, 20);
        assert_eq!(by_chan.events(), vec!["cc 20"]);
    }

    #[test]
    fn test_active_chain_addressing() {
        let settings = Settings::default().with_cc_addressing(false, vec![5], None);
        let dispatcher = dispatcher(settings);
        let first = RecordingControl::new(1, "volume");
        let second = RecordingControl::new(2, "volume");
        dispatcher.bind(None, 0, 7, first.clone(), Some(1));
        dispatcher.bind(None, 1, 7, second.clone(), Some(2));

        dispatcher.set_active_chain(Some(2));
        dispatcher.control_change(5, 9, 7, 33);
        assert!(first.events().is_empty());
        assert_eq!(second.events(), vec!["cc 33"]);
    }

    #[test]
    fn test_feedback_device_does_not_echo() {
        let settings = Settings::default().with_cc_addressing(false, vec![], Some(6));
        let dispatcher = dispatcher(settings);
        let control = RecordingControl::new(1, "sustain");
        dispatcher.bind(None, 0, 64, control.clone(), Some(1));

        dispatcher.control_change(6, 0, 64, 127);
        assert_eq!(control.events(), vec!["cc 127 no-echo"]);
        assert!(!dispatcher.is_held(64));
    }

    #[test]
    fn test_bank_change_by_cc() {
        let settings = Settings::default().with_cc_addressing(true, vec![], None);
        let dispatcher = dispatcher(settings);
        let bank = Arc::new(BankSelect::default());
        let other = Arc::new(BankSelect::default());
        dispatcher.set_bank_targets(vec![
            (MidiChannel::Chan(2), bank.clone()),
            (MidiChannel::Chan(3), other.clone()),
        ]);

        dispatcher.control_change(0, 2, 0, 1);
        dispatcher.control_change(0, 2, 32, 3);
        assert_eq!(bank.bank(), 131);
        assert_eq!(other.bank(), 0);
    }

    #[test]
    fn test_pedal_releases_lifo_once() {
        let dispatcher = dispatcher(Settings::default());
        let first = RecordingControl::new(1, "sustain");
        let second = RecordingControl::new(2, "sustain");
        dispatcher.bind(None, 0, 64, first.clone(), Some(1));
        dispatcher.bind(None, 0, 64, second.clone(), Some(2));

        dispatcher.control_change(0, 0, 64, 127);
        dispatcher.control_change(0, 0, 64, 100);
        assert!(dispatcher.is_held(64));
        assert_eq!(dispatcher.held_count(64), 2);

        dispatcher.control_change(0, 0, 64, 0);
        assert!(!dispatcher.is_held(64));
        assert_eq!(dispatcher.held_count(64), 0);
        assert_eq!(first.events(), vec!["cc 127", "cc 100", "cc 0", "release"]);
        assert_eq!(second.events(), vec!["cc 127", "cc 100", "cc 0", "release"]);
        assert!(second.released_before(&first));

        // A second release finds nothing held.
        dispatcher.control_change(0, 0, 64, 0);
        assert_eq!(first.events().iter().filter(|e| e.as_str() == "release").count(), 1);
    }

    #[test]
    fn test_pedal_release_after_active_chain_change() {
        let settings = Settings::default().with_cc_addressing(false, vec![5], None);
        let dispatcher = dispatcher(settings);
        let control = RecordingControl::new(1, "sustain");
        dispatcher.bind(None, 0, 64, control.clone(), Some(1));

        dispatcher.set_active_chain(Some(1));
        dispatcher.control_change(5, 0, 64, 127);
        assert!(dispatcher.is_held(64));
        assert_eq!(dispatcher.held_count(64), 1);

        // The new active chain has nothing bound to the pedal.
        dispatcher.set_active_chain(Some(2));
        dispatcher.control_change(5, 0, 64, 0);
        assert!(!dispatcher.is_held(64));
        assert_eq!(dispatcher.held_count(64), 0);
        assert_eq!(control.events(), vec!["cc 127", "release"]);
    }

    #[test]
    fn test_unbound_pedal_press_holds_nothing() {
        let dispatcher = dispatcher(Settings::default());
        dispatcher.control_change(0, 0, 66, 127);
        assert!(!dispatcher.is_held(66));
        assert_eq!(dispatcher.held_count(66), 0);
    }
}
