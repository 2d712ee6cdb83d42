//! Wire format of the receiver control protocol.
//!
//! Every line is `<code><payload>` terminated by a carriage return. Queries
//! use `?` as payload. There are no transaction identifiers, so replies are
//! matched to state purely by their code.

use crate::types::{
    Label, ValueSpace, AUDIO_INPUTS, CHANNELS, ECO_MODES, INPUT_SOURCES, PICTURE_MODES, POWER,
    SURROUND_MODES,
};

/// Line terminator used in both directions
pub const TERMINATOR: u8 = b'\r';

/// Payload that asks the receiver to report the current value
pub const QUERY: &str = "?";

/// Wire offset of a 0 dB channel bias
pub const BIAS_OFFSET: f64 = 50.0;

/// Lowest channel bias the receiver accepts, in dB
pub const BIAS_MIN: f64 = -12.0;

/// Highest channel bias the receiver accepts, in dB
pub const BIAS_MAX: f64 = 12.0;

/// A command waiting to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub code: String,
    pub parameter: String,
}

impl Command {
    pub fn new(code: impl Into<String>, parameter: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            parameter: parameter.into(),
        }
    }

    /// Query for the current value of `code`
    pub fn query(code: impl Into<String>) -> Self {
        Self::new(code, QUERY)
    }

    /// Serialize to wire bytes, terminator included
    pub fn encode(&self) -> Vec<u8> {
        encode(&self.code, &self.parameter)
    }
}

/// Concatenate code and parameter and append the terminator
pub fn encode(code: &str, parameter: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(code.len() + parameter.len() + 1);
    bytes.extend_from_slice(code.as_bytes());
    bytes.extend_from_slice(parameter.as_bytes());
    bytes.push(TERMINATOR);
    bytes
}

/// How an inbound line for a code is turned into status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// Look the payload up in the value space
    Enumerated,
    /// ON / OFF flag
    Mute,
    /// Volume level, or `MAX nn` for the volume ceiling
    Volume,
    /// Zone code overloaded for power, volume and source
    Zone,
    /// One line of a channel-level listing, or its END marker
    ChannelBias,
    /// One line of the available-source listing, or its END marker
    AvailableSource,
    /// Surround mode text, which differs from what is sent
    SoundMode,
    /// Informational audio lines (sampling rate)
    AudioInfo,
}

/// Static description of a command code
#[derive(Debug, Clone, Copy)]
pub struct CommandDefinition {
    pub code: &'static str,
    pub label: Label,
    pub values: Option<ValueSpace>,
    pub handler: Handler,
    /// Whether the code owns a status entry
    pub tracked: bool,
}

const fn def(
    code: &'static str,
    label: Label,
    values: Option<ValueSpace>,
    handler: Handler,
) -> CommandDefinition {
    CommandDefinition {
        code,
        label,
        values,
        handler,
        tracked: true,
    }
}

/// Capability listing of the sources actually wired on the unit
pub const AVAILABLE_SOURCE_CODE: &str = "SSSOD";

/// Label written by the sampling-rate information line
pub const SAMPLING_RATE_LABEL: Label = "Sampling Rate";

/// Every settable or queryable code, in refresh order
pub static COMMANDS: &[CommandDefinition] = &[
    def("PW", "Power", Some(POWER), Handler::Enumerated),
    def("ZM", "Main Zone", Some(POWER), Handler::Enumerated),
    def("Z2", "Zone 2", Some(POWER), Handler::Zone),
    def("Z3", "Zone 3", Some(POWER), Handler::Zone),
    def("MU", "Muted", None, Handler::Mute),
    def("Z2MU", "Z2 Muted", None, Handler::Mute),
    def("Z3MU", "Z3 Muted", None, Handler::Mute),
    def("MV", "Volume", None, Handler::Volume),
    def("Z2MV", "Z2 Volume", None, Handler::Volume),
    def("Z3MV", "Z3 Volume", None, Handler::Volume),
    def("SI", "Source", Some(INPUT_SOURCES), Handler::Enumerated),
    def("Z2SI", "Z2 Source", Some(INPUT_SOURCES), Handler::Enumerated),
    def("Z3SI", "Z3 Source", Some(INPUT_SOURCES), Handler::Enumerated),
    def("MS", "Surround Mode", Some(SURROUND_MODES), Handler::SoundMode),
    def("CV", "Channel Bias", Some(CHANNELS), Handler::ChannelBias),
    def("PV", "Picture Mode", Some(PICTURE_MODES), Handler::Enumerated),
    def("ECO", "Eco Mode", Some(ECO_MODES), Handler::Enumerated),
    def("SD", "Audio Input", Some(AUDIO_INPUTS), Handler::Enumerated),
    CommandDefinition {
        code: AVAILABLE_SOURCE_CODE,
        label: "Available Source",
        values: Some(INPUT_SOURCES),
        handler: Handler::AvailableSource,
        tracked: false,
    },
];

/// Informational lines with no settable counterpart
pub static EXTRAS: &[CommandDefinition] = &[CommandDefinition {
    code: "SSINFAI",
    label: SAMPLING_RATE_LABEL,
    values: None,
    handler: Handler::AudioInfo,
    tracked: true,
}];

/// Definition for an exact code
pub fn definition(code: &str) -> Option<&'static CommandDefinition> {
    COMMANDS.iter().chain(EXTRAS.iter()).find(|d| d.code == code)
}

/// Find the code an inbound line belongs to.
///
/// Some codes are prefixes of others (`Z2` of `Z2MU`), so the longest
/// matching prefix wins. `None` means the line is not recognized.
pub fn classify(line: &str) -> Option<&'static CommandDefinition> {
    COMMANDS
        .iter()
        .chain(EXTRAS.iter())
        .filter(|d| line.starts_with(d.code))
        .max_by_key(|d| d.code.len())
}

/// Keep only ASCII digits
pub fn only_digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Decode a digit payload. More than two digits means tenths.
pub fn decode_level(digits: &str) -> Option<f64> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let raw: u32 = digits.parse().ok()?;
    if digits.len() > 2 {
        Some(f64::from(raw) / 10.0)
    } else {
        Some(f64::from(raw))
    }
}

/// Encode a level the way the receiver expects it.
///
/// Whole values are sent as two digits. Fractional values are rounded to the
/// nearest half step and sent as at least three digits of tenths ("475" for
/// 47.5, "095" for 9.5), since two digits always read back as whole units.
pub fn encode_level(level: f64) -> String {
    let tenths = (10.0 * level).trunc() as i64;
    if tenths % 10 != 0 {
        format!("{:03}", (5.0 * (10.0 * level / 5.0).round_ties_even()) as i64)
    } else {
        format!("{:02}", level.trunc() as i64)
    }
}

pub fn encode_volume(level: f64) -> String {
    encode_level(level)
}

pub fn decode_volume(payload: &str) -> Option<f64> {
    decode_level(payload)
}

/// Encode a channel bias in dB, clamped to the accepted band
pub fn encode_bias(db: f64) -> String {
    let wire = (db + BIAS_OFFSET).clamp(BIAS_OFFSET + BIAS_MIN, BIAS_OFFSET + BIAS_MAX);
    encode_level(wire)
}

/// Decode a channel bias payload back to dB
pub fn decode_bias(payload: &str) -> Option<f64> {
    decode_level(payload).map(|level| level - BIAS_OFFSET)
}

/// Text replacements applied to surround mode replies, in order
const SOUND_MODE_REWRITES: &[(&str, &str)] = &[
    ("Audio-", " "),
    ("Dd", "Dolby Digital "),
    ("DD", "Dolby Digital "),
    ("Dts", "DTS"),
    ("Mstr", "Master "),
    ("Dsur", "Digital Surround "),
    ("Mtrx", "Matrix"),
    ("Dscrt", "Discrete "),
    ("Mch", "Multi-Channel "),
    (" Es ", " ES "),
];

/// Turn a raw surround mode reply into display text.
///
/// The receiver reports e.g. `DOLBY AUDIO-DD+DSUR`, which is not what is
/// sent to select a mode.
pub fn normalize_sound_mode(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    let mut text = spaced
        .split(' ')
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ");
    for (from, to) in SOUND_MODE_REWRITES {
        text = text.replace(from, to);
    }

    let mut out = String::with_capacity(text.len());
    let mut in_gap = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            out.push(c);
            in_gap = false;
        } else if !in_gap {
            out.push(' ');
            in_gap = true;
        }
    }
    out.trim().to_string()
}

/// Uppercase the first letter of each alphabetic run, lowercase the rest
fn title_case(word: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut prev_alpha = false;
    for c in word.chars() {
        if prev_alpha {
            out.extend(c.to_lowercase());
        } else {
            out.extend(c.to_uppercase());
        }
        prev_alpha = c.is_alphabetic();
    }
    out
}
