use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Status label, as listed in the command table (e.g. "Volume", "Z2 Source")
pub type Label = &'static str;

/// Channel bias levels in dB, keyed by channel display name
pub type ChannelLevels = BTreeMap<String, f64>;

/// A closed set of values a command accepts, as (wire token, display name) pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueSpace {
    entries: &'static [(&'static str, &'static str)],
}

impl ValueSpace {
    pub(crate) const fn new(entries: &'static [(&'static str, &'static str)]) -> Self {
        Self { entries }
    }

    /// All (wire token, display name) pairs in protocol order
    pub fn entries(&self) -> &'static [(&'static str, &'static str)] {
        self.entries
    }

    /// Display name for a wire token (exact match)
    pub fn display_name(&self, wire: &str) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(token, _)| *token == wire)
            .map(|(_, name)| *name)
    }

    /// Wire token for a display name or a wire token.
    ///
    /// Spaces and case are ignored, so "set top box", "SetTopBox" and
    /// "SAT/CBL" all resolve to the same token.
    pub fn wire_token(&self, name: &str) -> Option<&'static str> {
        let wanted = squash(name);
        self.entries
            .iter()
            .find(|(token, display)| squash(display) == wanted || squash(token) == wanted)
            .map(|(token, _)| *token)
    }

    /// Display names in protocol order
    pub fn display_names(&self) -> Vec<String> {
        self.entries.iter().map(|(_, name)| name.to_string()).collect()
    }
}

fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

pub const POWER: ValueSpace = ValueSpace::new(&[
    ("OFF", "Off"),
    ("ON", "On"),
    ("STANDBY", "Standby"),
]);

/// Speaker channels reported by channel-level listing
pub const CHANNELS: ValueSpace = ValueSpace::new(&[
    ("FL", "Front Left"),
    ("FR", "Front Right"),
    ("C", "Centre"),
    ("SW", "Subwoofer"),
    ("SW2", "Subwoofer2"),
    ("SL", "Surround Left"),
    ("SR", "Surround Right"),
    ("SBL", "Surround Back Left"),
    ("SBR", "Surround Back Right"),
    ("FHL", "Front Height Left"),
    ("FHR", "Front Height Right"),
    ("FWL", "Front Wide Left"),
    ("FWR", "Front Wide Right"),
    ("TFL", "Front Top Left"),
    ("TFR", "Front Top Right"),
    ("TML", "Middle Top Left"),
    ("TMR", "Middle Top Right"),
    ("TRL", "Rear Top Left"),
    ("TRR", "Rear Top Right"),
    ("RHL", "Rear Height Left"),
    ("RHR", "Rear Height Right"),
    ("FDL", "Front Dolby Left"),
    ("FDR", "Front Dolby Right"),
    ("SDL", "Surround Dolby Left"),
    ("SDR", "Surround Dolby Right"),
    ("BDL", "Back Dolby Left"),
    ("BDR", "Back Dolby Right"),
    ("SHL", "Surround Height Left"),
    ("SHR", "Surround Height Right"),
    ("TS", "Top Surround"),
    ("CH", "Centre Height"),
]);

pub const INPUT_SOURCES: ValueSpace = ValueSpace::new(&[
    ("PHONO", "Phono"),
    ("CD", "CD"),
    ("DVD", "DVD"),
    ("BD", "Bluray"),
    ("TV", "TV"),
    ("SAT/CBL", "Set Top Box"),
    ("MPLAY", "Media Player"),
    ("GAME", "Game"),
    ("TUNER", "Tuner"),
    ("HDRADIO", "HD Radio"),
    ("SIRIUSXM", "Sirius XM"),
    ("PANDORA", "Pandora"),
    ("IRADIO", "Internet Radio"),
    ("SERVER", "Server"),
    ("FAVORITES", "Favourites"),
    ("AUX1", "Aux1"),
    ("AUX2", "Aux2"),
    ("AUX3", "Aux3"),
    ("AUX4", "Aux4"),
    ("AUX5", "Aux5"),
    ("AUX6", "Aux6"),
    ("AUX7", "Aux7"),
    ("NET", "Online Music"),
    ("BT", "Bluetooth"),
]);

pub const AUDIO_INPUTS: ValueSpace = ValueSpace::new(&[
    ("AUTO", "Auto"),
    ("HDMI", "HDMI"),
    ("DIGITAL", "Digital"),
    ("ANALOG", "Analog"),
    ("7.1IN", "Multi Channel"),
    ("NO", "No Sound"),
]);

pub const ECO_MODES: ValueSpace = ValueSpace::new(&[
    ("OFF", "Off"),
    ("ON", "On"),
    ("AUTO", "Auto"),
]);

/// Settable surround modes. LEFT and RIGHT rotate through the modes.
pub const SURROUND_MODES: ValueSpace = ValueSpace::new(&[
    ("MOVIE", "Movie"),
    ("MUSIC", "Music"),
    ("GAME", "Game"),
    ("DIRECT", "Direct"),
    ("PURE DIRECT", "Pure Direct"),
    ("STEREO", "Stereo"),
    ("AUTO", "Auto"),
    ("DOLBY DIGITAL", "Dolby Digital"),
    ("DTS SURROUND", "Dts Surround"),
    ("AURO3D", "Auro3D"),
    ("AURO2DSURR", "Auro2D Surround"),
    ("MCH STEREO", "Multi Channel Stereo"),
    ("VIRTUAL", "Virtual"),
    ("LEFT", "Left"),
    ("RIGHT", "Right"),
]);

pub const PICTURE_MODES: ValueSpace = ValueSpace::new(&[
    ("OFF", "Off"),
    ("STD", "Standard"),
    ("MOV", "Movie"),
    ("VVD", "Vivid"),
    ("STM", "Stream"),
    ("CTM", "Custom"),
    ("DAY", "ISF Day"),
    ("NGT", "ISF Night"),
]);

/// An independently controlled output group of the receiver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Zone {
    Main,
    Zone2,
    Zone3,
}

impl Zone {
    /// Code whose ON/OFF payload switches the zone
    pub(crate) fn power_code(self) -> &'static str {
        match self {
            Zone::Main => "ZM",
            Zone::Zone2 => "Z2",
            Zone::Zone3 => "Z3",
        }
    }

    pub(crate) fn mute_code(self) -> &'static str {
        match self {
            Zone::Main => "MU",
            Zone::Zone2 => "Z2MU",
            Zone::Zone3 => "Z3MU",
        }
    }

    /// Code carrying the volume label of the zone
    pub(crate) fn volume_code(self) -> &'static str {
        match self {
            Zone::Main => "MV",
            Zone::Zone2 => "Z2MV",
            Zone::Zone3 => "Z3MV",
        }
    }

    /// Code carrying the source label of the zone
    pub(crate) fn source_code(self) -> &'static str {
        match self {
            Zone::Main => "SI",
            Zone::Zone2 => "Z2SI",
            Zone::Zone3 => "Z3SI",
        }
    }

    /// Prefix used when sending volume steps and levels.
    /// Secondary zones overload their power code for this.
    pub(crate) fn volume_command(self) -> &'static str {
        match self {
            Zone::Main => "MV",
            Zone::Zone2 => "Z2",
            Zone::Zone3 => "Z3",
        }
    }

    /// Prefix used when selecting a source
    pub(crate) fn source_command(self) -> &'static str {
        match self {
            Zone::Main => "SI",
            Zone::Zone2 => "Z2",
            Zone::Zone3 => "Z3",
        }
    }
}

/// Current value of a status label
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatusValue {
    /// No response seen yet for this label
    Unknown,
    Bool(bool),
    Level(f64),
    Text(String),
    Channels(ChannelLevels),
}

impl StatusValue {
    pub fn is_unknown(&self) -> bool {
        matches!(self, StatusValue::Unknown)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StatusValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StatusValue::Level(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StatusValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_channels(&self) -> Option<&ChannelLevels> {
        match self {
            StatusValue::Channels(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusValue::Unknown => write!(f, "-"),
            StatusValue::Bool(b) => write!(f, "{}", b),
            StatusValue::Level(v) => write!(f, "{}", v),
            StatusValue::Text(s) => write!(f, "{}", s),
            StatusValue::Channels(levels) => {
                let parts: Vec<String> = levels
                    .iter()
                    .map(|(name, level)| format!("{}: {}", name, level))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

/// A receiver that answered a discovery scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub ip: String,
    pub serial: String,
    pub model: String,
    pub brand: String,
    pub name: String,
}

impl DiscoveredDevice {
    /// Registry key: the serial number, lowercased
    pub fn key(&self) -> String {
        self.serial.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_token_ignores_case_and_spaces() {
        assert_eq!(INPUT_SOURCES.wire_token("Set Top Box"), Some("SAT/CBL"));
        assert_eq!(INPUT_SOURCES.wire_token("settopbox"), Some("SAT/CBL"));
        assert_eq!(INPUT_SOURCES.wire_token("SAT/CBL"), Some("SAT/CBL"));
        assert_eq!(ECO_MODES.wire_token("auto"), Some("AUTO"));
        assert_eq!(INPUT_SOURCES.wire_token("Cassette"), None);
    }

    #[test]
    fn display_names_map_back_to_their_tokens() {
        for space in [
            POWER,
            CHANNELS,
            INPUT_SOURCES,
            AUDIO_INPUTS,
            ECO_MODES,
            SURROUND_MODES,
            PICTURE_MODES,
        ] {
            for (token, name) in space.entries() {
                assert_eq!(space.display_name(token), Some(*name));
                assert_eq!(space.wire_token(name), Some(*token), "{}", name);
            }
        }
    }

    #[test]
    fn unknown_renders_as_dash() {
        assert_eq!(StatusValue::Unknown.to_string(), "-");
        assert_eq!(StatusValue::Level(47.5).to_string(), "47.5");
    }

    #[test]
    fn device_key_is_case_insensitive() {
        let dev = DiscoveredDevice {
            ip: "10.0.0.2".into(),
            serial: "AbC123".into(),
            model: "SR6013".into(),
            brand: "Marantz".into(),
            name: "Living Room".into(),
        };
        assert_eq!(dev.key(), "abc123");
    }
}
