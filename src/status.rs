//! Derived receiver state.
//!
//! The model is plain data: feeding it an inbound line returns the changes it
//! caused, and the owning session publishes them.

use crate::protocol::{
    classify, decode_bias, decode_level, definition, normalize_sound_mode, only_digits,
    CommandDefinition, Handler, COMMANDS, EXTRAS,
};
use crate::subscription::StatusUpdate;
use crate::types::{ChannelLevels, Label, StatusValue, CHANNELS};
use std::collections::{BTreeMap, BTreeSet};

/// Volume ceiling assumed until the receiver reports `MVMAX`
pub const DEFAULT_MAX_VOLUME: f64 = 98.0;

/// Label → value map for one receiver session
#[derive(Debug, Clone)]
pub struct StatusModel {
    values: BTreeMap<Label, StatusValue>,
    max_volume: f64,
    /// Channel levels collected since the last `CVEND`, if a listing is in progress
    bias_burst: Option<ChannelLevels>,
    available_sources: BTreeSet<String>,
}

impl Default for StatusModel {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusModel {
    /// Every tracked label starts out as `Unknown`
    pub fn new() -> Self {
        let values = COMMANDS
            .iter()
            .chain(EXTRAS.iter())
            .filter(|d| d.tracked)
            .map(|d| (d.label, StatusValue::Unknown))
            .collect();
        Self {
            values,
            max_volume: DEFAULT_MAX_VOLUME,
            bias_burst: None,
            available_sources: BTreeSet::new(),
        }
    }

    pub fn get(&self, label: &str) -> Option<&StatusValue> {
        self.values.get(label)
    }

    /// Owned copy of every label and its value
    pub fn snapshot(&self) -> BTreeMap<String, StatusValue> {
        self.values
            .iter()
            .map(|(label, value)| (label.to_string(), value.clone()))
            .collect()
    }

    pub fn max_volume(&self) -> f64 {
        self.max_volume
    }

    /// Sources the unit reported as in use, sorted. Empty until the
    /// capability listing has been received.
    pub fn available_sources(&self) -> Vec<String> {
        self.available_sources.iter().cloned().collect()
    }

    /// Overwrite a label. Returns the change, or `None` if the value is unchanged.
    pub fn apply(&mut self, label: Label, value: StatusValue) -> Option<StatusUpdate> {
        let slot = self.values.entry(label).or_insert(StatusValue::Unknown);
        if *slot == value {
            return None;
        }
        *slot = value.clone();
        Some(StatusUpdate { label, value })
    }

    /// Route one inbound line (terminator stripped) into the model
    pub fn process_line(&mut self, line: &str) -> Vec<StatusUpdate> {
        let line = line.trim();
        let Some(def) = classify(line) else {
            tracing::debug!("Unrecognized response: {:?}", line);
            return Vec::new();
        };
        let payload = &line[def.code.len()..];

        let update = match def.handler {
            Handler::Enumerated => self.parse_enumerated(def, payload),
            Handler::Mute => self.apply(def.label, StatusValue::Bool(payload == "ON")),
            Handler::Volume => self.parse_volume(def, payload),
            Handler::Zone => self.parse_zone(def, payload),
            Handler::ChannelBias => self.parse_channel_bias(def, payload),
            Handler::AvailableSource => {
                self.parse_available_source(def, payload);
                None
            }
            Handler::SoundMode => {
                self.apply(def.label, StatusValue::Text(normalize_sound_mode(payload)))
            }
            Handler::AudioInfo => self.parse_audio_info(def, line),
        };
        update.into_iter().collect()
    }

    fn parse_enumerated(&mut self, def: &CommandDefinition, payload: &str) -> Option<StatusUpdate> {
        let Some(name) = def.values.and_then(|v| v.display_name(payload)) else {
            tracing::debug!("No {} value matches {:?}", def.code, payload);
            return None;
        };
        self.apply(def.label, StatusValue::Text(name.to_string()))
    }

    fn parse_volume(&mut self, def: &CommandDefinition, payload: &str) -> Option<StatusUpdate> {
        let level = decode_level(&only_digits(payload))?;
        if payload.starts_with("MAX") {
            self.max_volume = level;
            return None;
        }
        self.apply(def.label, StatusValue::Level(level))
    }

    /// Zone codes carry power, volume and source on the same prefix
    fn parse_zone(&mut self, def: &CommandDefinition, payload: &str) -> Option<StatusUpdate> {
        if payload == "ON" || payload == "OFF" {
            return self.parse_enumerated(def, payload);
        }
        if payload.starts_with("SMART") || payload.starts_with("FAVORITE") {
            return None;
        }

        if let Some(level) = decode_level(payload) {
            let volume = definition(&format!("{}MV", def.code))?;
            return self.apply(volume.label, StatusValue::Level(level));
        }

        let source = definition(&format!("{}SI", def.code))?;
        self.parse_enumerated(source, payload)
    }

    fn parse_channel_bias(&mut self, def: &CommandDefinition, payload: &str) -> Option<StatusUpdate> {
        if payload == "END" {
            let levels = self.bias_burst.take().unwrap_or_default();
            return self.apply(def.label, StatusValue::Channels(levels));
        }

        // The first line after END starts a fresh listing
        let burst = self.bias_burst.get_or_insert_with(ChannelLevels::new);
        let Some((speaker, level)) = payload.split_once(' ') else {
            tracing::debug!("Malformed channel level {:?}", payload);
            return None;
        };
        let (Some(name), Some(level)) = (CHANNELS.display_name(speaker), decode_bias(level)) else {
            tracing::debug!("Unknown speaker code {:?}", payload);
            return None;
        };
        burst.insert(name.to_string(), level);
        None
    }

    fn parse_available_source(&mut self, def: &CommandDefinition, payload: &str) {
        let payload = payload.trim();
        if payload == "END" {
            tracing::debug!("Available sources: {:?}", self.available_sources);
            return;
        }
        let Some((token, flag)) = payload.split_once(' ') else {
            return;
        };
        if flag != "USE" {
            return;
        }
        if let Some(name) = def.values.and_then(|v| v.display_name(token)) {
            self.available_sources.insert(name.to_string());
        }
    }

    fn parse_audio_info(&mut self, def: &CommandDefinition, line: &str) -> Option<StatusUpdate> {
        if !line.starts_with("SSINFAISFSV") {
            return None;
        }
        let last = line.split(' ').next_back().unwrap_or_default();
        if last == "NON" {
            return self.apply(def.label, StatusValue::Unknown);
        }
        let rate: u32 = match only_digits(last).parse() {
            Ok(rate) => rate,
            Err(e) => {
                tracing::debug!("Bad sampling rate {:?}: {}", last, e);
                return None;
            }
        };
        let rate = if rate > 200 {
            f64::from(rate) / 10.0
        } else {
            f64::from(rate)
        };
        self.apply(def.label, StatusValue::Level(rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SAMPLING_RATE_LABEL;

    fn feed(model: &mut StatusModel, lines: &[&str]) -> Vec<StatusUpdate> {
        lines.iter().flat_map(|l| model.process_line(l)).collect()
    }

    #[test]
    fn every_label_starts_unknown() {
        let model = StatusModel::new();
        for def in COMMANDS.iter().filter(|d| d.tracked) {
            assert_eq!(model.get(def.label), Some(&StatusValue::Unknown));
        }
        assert_eq!(model.get(SAMPLING_RATE_LABEL), Some(&StatusValue::Unknown));
        assert!(model.get("Available Source").is_none());
        assert_eq!(model.max_volume(), DEFAULT_MAX_VOLUME);
    }

    #[test]
    fn identical_values_notify_once() {
        let mut model = StatusModel::new();
        let updates = feed(&mut model, &["PWON", "PWON"]);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].label, "Power");
        assert_eq!(updates[0].value, StatusValue::Text("On".into()));

        assert!(model.apply("Power", StatusValue::Text("On".into())).is_none());
        assert!(model.apply("Power", StatusValue::Text("Standby".into())).is_some());
    }

    #[test]
    fn mute_and_volume() {
        let mut model = StatusModel::new();
        feed(&mut model, &["MUON", "MV475", "Z2MUOFF"]);
        assert_eq!(model.get("Muted"), Some(&StatusValue::Bool(true)));
        assert_eq!(model.get("Volume"), Some(&StatusValue::Level(47.5)));
        assert_eq!(model.get("Z2 Muted"), Some(&StatusValue::Bool(false)));
    }

    #[test]
    fn max_volume_does_not_touch_volume() {
        let mut model = StatusModel::new();
        let updates = feed(&mut model, &["MVMAX 805"]);
        assert!(updates.is_empty());
        assert_eq!(model.max_volume(), 80.5);
        assert_eq!(model.get("Volume"), Some(&StatusValue::Unknown));
    }

    #[test]
    fn zone_prefix_is_disambiguated() {
        let mut model = StatusModel::new();
        feed(&mut model, &["Z2ON", "Z245", "Z2TUNER", "Z2SMART1", "Z3OFF", "Z3AUX1"]);
        assert_eq!(model.get("Zone 2"), Some(&StatusValue::Text("On".into())));
        assert_eq!(model.get("Z2 Volume"), Some(&StatusValue::Level(45.0)));
        assert_eq!(model.get("Z2 Source"), Some(&StatusValue::Text("Tuner".into())));
        assert_eq!(model.get("Zone 3"), Some(&StatusValue::Text("Off".into())));
        assert_eq!(model.get("Z3 Source"), Some(&StatusValue::Text("Aux1".into())));
        assert_eq!(model.get("Z3 Volume"), Some(&StatusValue::Unknown));
    }

    #[test]
    fn channel_listing_notifies_once_at_end() {
        let mut model = StatusModel::new();
        let updates = feed(&mut model, &["CVFL 505", "CVFR 50", "CVC 45"]);
        assert!(updates.is_empty());

        let updates = feed(&mut model, &["CVEND"]);
        assert_eq!(updates.len(), 1);
        let levels = updates[0].value.as_channels().unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels["Front Left"], 0.5);
        assert_eq!(levels["Front Right"], 0.0);
        assert_eq!(levels["Centre"], -5.0);
    }

    #[test]
    fn repeated_channel_lines_collapse_into_one_entry() {
        let mut model = StatusModel::new();
        let updates = feed(&mut model, &["CVFL 55", "CVFL 55", "CVFL 55", "CVEND"]);
        assert_eq!(updates.len(), 1);
        let mut expected = ChannelLevels::new();
        expected.insert("Front Left".into(), 5.0);
        assert_eq!(updates[0].value, StatusValue::Channels(expected));
    }

    #[test]
    fn a_new_listing_replaces_the_old_map() {
        let mut model = StatusModel::new();
        feed(&mut model, &["CVFL 50", "CVSW 52", "CVEND"]);
        feed(&mut model, &["CVFL 51", "CVEND"]);
        let levels = model.get("Channel Bias").unwrap().as_channels().unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels["Front Left"], 1.0);

        // Same listing again: no change, no notification
        assert!(feed(&mut model, &["CVFL 51", "CVEND"]).is_empty());
    }

    #[test]
    fn available_sources_accumulate() {
        let mut model = StatusModel::new();
        feed(
            &mut model,
            &["SSSODTV USE", "SSSODCD DEL", "SSSODSAT/CBL USE", "SSSODTV USE", "SSSOD END"],
        );
        assert_eq!(model.available_sources(), vec!["Set Top Box", "TV"]);
    }

    #[test]
    fn sound_mode_and_enums() {
        let mut model = StatusModel::new();
        feed(&mut model, &["MSDOLBY DIGITAL", "PVVVD", "ECOAUTO", "SIBD", "SINOPE"]);
        assert_eq!(model.get("Surround Mode"), Some(&StatusValue::Text("Dolby Digital".into())));
        assert_eq!(model.get("Picture Mode"), Some(&StatusValue::Text("Vivid".into())));
        assert_eq!(model.get("Eco Mode"), Some(&StatusValue::Text("Auto".into())));
        assert_eq!(model.get("Source"), Some(&StatusValue::Text("Bluray".into())));
    }

    #[test]
    fn audio_input_mode() {
        let mut model = StatusModel::new();
        assert_eq!(model.get("Audio Input"), Some(&StatusValue::Unknown));
        feed(&mut model, &["SD7.1IN"]);
        assert_eq!(model.get("Audio Input"), Some(&StatusValue::Text("Multi Channel".into())));
        feed(&mut model, &["SDARC"]);
        assert_eq!(model.get("Audio Input"), Some(&StatusValue::Text("Multi Channel".into())));
    }

    #[test]
    fn sampling_rate() {
        let mut model = StatusModel::new();
        feed(&mut model, &["SSINFAISFSV 441"]);
        assert_eq!(model.get(SAMPLING_RATE_LABEL), Some(&StatusValue::Level(44.1)));
        feed(&mut model, &["SSINFAISFSV 48"]);
        assert_eq!(model.get(SAMPLING_RATE_LABEL), Some(&StatusValue::Level(48.0)));
        feed(&mut model, &["SSINFAISFSV NON"]);
        assert_eq!(model.get(SAMPLING_RATE_LABEL), Some(&StatusValue::Unknown));
        assert!(feed(&mut model, &["SSINFAIFMT PCM"]).is_empty());
    }

    #[test]
    fn unrecognized_lines_are_dropped() {
        let mut model = StatusModel::new();
        assert!(feed(&mut model, &["NSE0Now Playing", "", "OPINFASP"]).is_empty());
    }
}
