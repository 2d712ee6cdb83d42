use crate::connection::Connection;
use crate::error::{AvrError, Result};
use crate::protocol::{
    definition, encode_bias, encode_volume, Command, AVAILABLE_SOURCE_CODE, BIAS_MAX, BIAS_MIN,
    COMMANDS, SAMPLING_RATE_LABEL,
};
use crate::status::StatusModel;
use crate::subscription::{Notifier, StatusReceiver};
use crate::types::{
    ChannelLevels, StatusValue, Zone, AUDIO_INPUTS, CHANNELS, ECO_MODES, INPUT_SOURCES,
    PICTURE_MODES, SURROUND_MODES,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Telnet port the receivers listen on
pub const DEFAULT_PORT: u16 = 23;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Options for opening a receiver session
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    pub port: u16,
    pub connect_timeout: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

/// A live session with one receiver
///
/// Commands are fire-and-forget: every mutator queues at most one command
/// and returns immediately. The outcome shows up as a status change once the
/// receiver reports it. Invalid parameters are logged and ignored, and so is
/// anything sent after the session has closed.
pub struct Avr {
    name: String,
    host: String,
    port: u16,
    connection: Connection,
    status: Arc<Mutex<StatusModel>>,
    notifier: Arc<Notifier>,
}

fn lock(status: &Mutex<StatusModel>) -> MutexGuard<'_, StatusModel> {
    status.lock().unwrap_or_else(|e| e.into_inner())
}

fn on_off(value: bool) -> &'static str {
    if value {
        "ON"
    } else {
        "OFF"
    }
}

impl Avr {
    /// Connect to a receiver and start populating its status
    ///
    /// # Example
    ///
    /// ```no_run
    /// use madeavr::Avr;
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let avr = Avr::connect("Living Room", "192.168.1.50", 23).await?;
    ///     avr.set_volume(42.5);
    ///     avr.select_source("Bluray");
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect(name: impl Into<String>, host: impl Into<String>, port: u16) -> Result<Self> {
        let config = ConnectConfig {
            port,
            ..ConnectConfig::default()
        };
        Self::connect_with_config(name, host, &config).await
    }

    /// Connect using explicit port and timeout options
    pub async fn connect_with_config(
        name: impl Into<String>,
        host: impl Into<String>,
        config: &ConnectConfig,
    ) -> Result<Self> {
        let name = name.into();
        let host = host.into();
        let status = Arc::new(Mutex::new(StatusModel::new()));
        let notifier = Arc::new(Notifier::new());

        let on_line = {
            let status = status.clone();
            let notifier = notifier.clone();
            move |line: &str| {
                // Release the model before callbacks run so they can read status
                let updates = lock(&status).process_line(line);
                for update in updates {
                    notifier.emit(update);
                }
            }
        };

        let on_close = {
            let notifier = notifier.clone();
            move || notifier.close()
        };

        let connection = Connection::connect(
            &host,
            config.port,
            config.connect_timeout,
            on_line,
            on_close,
        )
        .await?;

        let avr = Self {
            name,
            host,
            port: config.port,
            connection,
            status,
            notifier,
        };
        tracing::info!("Connected to {} at {}:{}", avr.name, avr.host, avr.port);

        avr.query_capabilities();
        avr.refresh();
        Ok(avr)
    }

    /// Get the receiver name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the host the session is connected to
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the telnet port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the stream is still open
    pub fn is_alive(&self) -> bool {
        self.connection.is_alive()
    }

    // ========== Status ==========

    /// Snapshot of every status label
    pub fn status(&self) -> BTreeMap<String, StatusValue> {
        lock(&self.status).snapshot()
    }

    /// Status snapshot rendered as JSON (unknown values are `null`)
    pub fn status_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.status())?)
    }

    /// Current value of a label, `None` if no such label exists
    pub fn get(&self, label: &str) -> Option<StatusValue> {
        lock(&self.status).get(label).cloned()
    }

    fn value_of(&self, code: &str) -> StatusValue {
        definition(code)
            .and_then(|d| self.get(d.label))
            .unwrap_or(StatusValue::Unknown)
    }

    fn text_of(&self, code: &str) -> Option<String> {
        self.value_of(code).as_str().map(str::to_string)
    }

    /// Power state of the receiver ("On", "Standby", ...)
    pub fn power(&self) -> Option<String> {
        self.text_of("PW")
    }

    /// Get the power state of a zone
    pub fn zone_power(&self, zone: Zone) -> Option<String> {
        self.text_of(zone.power_code())
    }

    /// Get the main zone mute state
    pub fn muted(&self) -> Option<bool> {
        self.zone_muted(Zone::Main)
    }

    /// Get the mute state of a zone
    pub fn zone_muted(&self, zone: Zone) -> Option<bool> {
        self.value_of(zone.mute_code()).as_bool()
    }

    /// Main zone volume level (0..=max_volume)
    pub fn volume(&self) -> Option<f64> {
        self.zone_volume(Zone::Main)
    }

    /// Get the volume level of a zone
    pub fn zone_volume(&self, zone: Zone) -> Option<f64> {
        self.value_of(zone.volume_code()).as_f64()
    }

    /// Maximum volume level reported by the receiver
    pub fn max_volume(&self) -> f64 {
        lock(&self.status).max_volume()
    }

    /// Get the main zone source
    pub fn source(&self) -> Option<String> {
        self.zone_source(Zone::Main)
    }

    /// Get the source selected in a zone
    pub fn zone_source(&self, zone: Zone) -> Option<String> {
        self.text_of(zone.source_code())
    }

    /// Sources the unit has in use, or every known source until it has said
    pub fn source_list(&self) -> Vec<String> {
        let available = lock(&self.status).available_sources();
        if available.is_empty() {
            INPUT_SOURCES.display_names()
        } else {
            available
        }
    }

    /// Get the current surround mode, as normalized display text
    pub fn sound_mode(&self) -> Option<String> {
        self.text_of("MS")
    }

    /// Get the selectable surround modes
    pub fn sound_mode_list(&self) -> Vec<String> {
        SURROUND_MODES.display_names()
    }

    /// Get the current picture mode
    pub fn picture_mode(&self) -> Option<String> {
        self.text_of("PV")
    }

    /// Get the selectable picture modes
    pub fn picture_mode_list(&self) -> Vec<String> {
        PICTURE_MODES.display_names()
    }

    /// Get the current eco mode
    pub fn eco_mode(&self) -> Option<String> {
        self.text_of("ECO")
    }

    /// Get the selectable eco modes
    pub fn eco_mode_list(&self) -> Vec<String> {
        ECO_MODES.display_names()
    }

    /// Get the audio input mode (Auto, HDMI, Digital, ...)
    pub fn audio_input(&self) -> Option<String> {
        self.text_of("SD")
    }

    /// Get the selectable audio input modes
    pub fn audio_input_list(&self) -> Vec<String> {
        AUDIO_INPUTS.display_names()
    }

    /// Channel levels in dB from the last complete listing
    pub fn channels_bias(&self) -> ChannelLevels {
        self.value_of("CV").as_channels().cloned().unwrap_or_default()
    }

    /// Channels present in the last complete listing
    pub fn channels_bias_list(&self) -> Vec<String> {
        self.channels_bias().into_keys().collect()
    }

    /// Sampling rate of the current input in kHz
    pub fn sampling_rate(&self) -> Option<f64> {
        self.get(SAMPLING_RATE_LABEL).and_then(|v| v.as_f64())
    }

    // ========== Notifications ==========

    /// Subscribe to status changes
    ///
    /// Every receiver sees every change made after it subscribed. `recv`
    /// fails with `ConnectionClosed` once the session ends.
    pub fn subscribe(&self) -> StatusReceiver {
        self.notifier.subscribe()
    }

    /// Register the change callback, replacing any previous one
    ///
    /// The callback runs on the reader task, once per change, with the label
    /// and its new value.
    pub fn notify_with<F>(&self, callback: F)
    where
        F: Fn(&str, &StatusValue) + Send + Sync + 'static,
    {
        self.notifier.set_listener(Arc::new(callback));
    }

    // ========== Queries ==========

    /// Query every tracked code
    pub fn refresh(&self) {
        for def in COMMANDS.iter().filter(|d| d.tracked) {
            self.send(def.code, "?");
        }
    }

    /// Ask which sources are actually in use on the unit
    pub fn query_capabilities(&self) {
        self.send(AVAILABLE_SOURCE_CODE, " ?");
    }

    // ========== Power ==========

    /// Power the receiver on
    pub fn turn_on(&self) {
        self.send("PW", "ON");
    }

    /// Put the receiver in standby
    pub fn turn_off(&self) {
        self.send("PW", "STANDBY");
    }

    /// Turn a zone on or off
    pub fn set_zone_power(&self, zone: Zone, on: bool) {
        self.send(zone.power_code(), on_off(on));
    }

    // ========== Volume ==========

    /// Mute or unmute the main zone
    pub fn mute_volume(&self, mute: bool) {
        self.set_zone_mute(Zone::Main, mute);
    }

    /// Mute or unmute a zone
    pub fn set_zone_mute(&self, zone: Zone, mute: bool) {
        self.send(zone.mute_code(), on_off(mute));
    }

    /// Raise the main zone volume by one step
    pub fn volume_up(&self) {
        self.zone_volume_up(Zone::Main);
    }

    /// Lower the main zone volume by one step
    pub fn volume_down(&self) {
        self.zone_volume_down(Zone::Main);
    }

    /// Raise a zone volume by one step
    pub fn zone_volume_up(&self, zone: Zone) {
        self.send(zone.volume_command(), "UP");
    }

    /// Lower a zone volume by one step
    pub fn zone_volume_down(&self, zone: Zone) {
        self.send(zone.volume_command(), "DOWN");
    }

    /// Set the main zone volume, in half steps, between 0 and `max_volume`
    pub fn set_volume(&self, level: f64) {
        match self.check_volume(level) {
            Ok(()) => self.send("MV", &encode_volume(level)),
            Err(e) => self.reject(e),
        }
    }

    /// Set a zone volume. Secondary zones only take whole steps.
    pub fn set_zone_volume(&self, zone: Zone, level: f64) {
        if zone == Zone::Main {
            return self.set_volume(level);
        }
        match self.check_volume(level) {
            Ok(()) => self.send(zone.volume_command(), &format!("{:02}", level.trunc() as i64)),
            Err(e) => self.reject(e),
        }
    }

    fn check_volume(&self, level: f64) -> Result<()> {
        let max = self.max_volume();
        if (0.0..=max).contains(&level) {
            Ok(())
        } else {
            Err(AvrError::InvalidParameter(format!(
                "volume {} is outside 0..={}",
                level, max
            )))
        }
    }

    // ========== Sources and modes ==========

    /// Select the main zone source by display name or wire token
    pub fn select_source(&self, source: &str) {
        self.select_zone_source(Zone::Main, source);
    }

    /// Select a zone source. Only sources in `source_list()` are accepted.
    pub fn select_zone_source(&self, zone: Zone, source: &str) {
        match self.resolve_source(source) {
            Ok(token) => self.send(zone.source_command(), token),
            Err(e) => self.reject(e),
        }
    }

    fn resolve_source(&self, source: &str) -> Result<&'static str> {
        let invalid = || AvrError::InvalidParameter(format!("{} is not a valid source", source));
        let token = INPUT_SOURCES.wire_token(source).ok_or_else(invalid)?;
        let name = INPUT_SOURCES.display_name(token).ok_or_else(invalid)?;
        if self.source_list().iter().any(|s| s == name) {
            Ok(token)
        } else {
            Err(invalid())
        }
    }

    /// Select a surround mode
    pub fn select_sound_mode(&self, mode: &str) {
        match SURROUND_MODES.wire_token(mode) {
            Some(token) => self.send("MS", token),
            None => self.reject(AvrError::InvalidParameter(format!(
                "{} is not a valid sound mode",
                mode
            ))),
        }
    }

    /// Select a picture mode
    pub fn select_picture_mode(&self, mode: &str) {
        match PICTURE_MODES.wire_token(mode) {
            Some(token) => self.send("PV", token),
            None => self.reject(AvrError::InvalidParameter(format!(
                "{} is not a valid picture mode",
                mode
            ))),
        }
    }

    /// Select an eco mode
    pub fn select_eco_mode(&self, mode: &str) {
        match ECO_MODES.wire_token(mode) {
            Some(token) => self.send("ECO", token),
            None => self.reject(AvrError::InvalidParameter(format!(
                "{} is not a valid eco mode",
                mode
            ))),
        }
    }

    /// Select the audio input mode
    pub fn select_audio_input(&self, mode: &str) {
        match AUDIO_INPUTS.wire_token(mode) {
            Some(token) => self.send("SD", token),
            None => self.reject(AvrError::InvalidParameter(format!(
                "{} is not a valid audio input",
                mode
            ))),
        }
    }

    // ========== Channel bias ==========

    /// Set a channel level in dB. Levels outside -12..=12 are clamped.
    pub fn set_channel_bias(&self, channel: &str, level: f64) {
        if !level.is_finite() {
            return self.reject(AvrError::InvalidParameter(format!(
                "channel level {} is not a number of dB",
                level
            )));
        }
        let (token, current) = match self.resolve_channel(channel) {
            Ok(found) => found,
            Err(e) => return self.reject(e),
        };
        if current == level {
            return;
        }
        self.send("CV", &format!("{} {}", token, encode_bias(level)));
    }

    /// Raise a channel level by half a dB
    pub fn channel_bias_up(&self, channel: &str) {
        self.step_channel_bias(channel, "UP");
    }

    /// Lower a channel level by half a dB
    pub fn channel_bias_down(&self, channel: &str) {
        self.step_channel_bias(channel, "DOWN");
    }

    fn step_channel_bias(&self, channel: &str, direction: &str) {
        let (token, current) = match self.resolve_channel(channel) {
            Ok(found) => found,
            Err(e) => return self.reject(e),
        };
        // The receiver does not answer steps past the limits
        let at_limit = match direction {
            "UP" => current >= BIAS_MAX,
            _ => current <= BIAS_MIN,
        };
        if at_limit {
            tracing::debug!("Channel {} is at its limit", channel);
            return;
        }
        self.send("CV", &format!("{} {}", token, direction));
    }

    /// Reset every channel level to 0 dB
    pub fn channels_bias_reset(&self) {
        self.send("CV", "ZRL");
    }

    /// Wire token and current level of a channel in the last listing
    fn resolve_channel(&self, channel: &str) -> Result<(&'static str, f64)> {
        let unavailable =
            || AvrError::InvalidParameter(format!("channel {} is not available right now", channel));
        let token = CHANNELS.wire_token(channel).ok_or_else(unavailable)?;
        let name = CHANNELS.display_name(token).ok_or_else(unavailable)?;
        let current = *self.channels_bias().get(name).ok_or_else(unavailable)?;
        Ok((token, current))
    }

    // ========== Lifecycle ==========

    /// Close the session. Queued commands are discarded.
    pub fn close(&self) {
        self.connection.close();
        self.notifier.close();
        tracing::debug!("Closed device {}", self.name);
    }

    fn send(&self, code: &str, parameter: &str) {
        self.connection.send(Command::new(code, parameter));
    }

    fn reject(&self, error: AvrError) {
        tracing::warn!("{}: {}", self.name, error);
    }
}
