use crate::avr::{Avr, ConnectConfig};
use crate::discovery::{scan, ScanConfig};
use crate::error::Result;
use crate::types::DiscoveredDevice;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Maps discovered receivers to live sessions, keyed by serial number
///
/// # Example
///
/// ```no_run
/// use madeavr::{Registry, ScanConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let registry = Registry::default();
///     registry.discover(&ScanConfig::default()).await?;
///
///     for avr in registry.devices() {
///         println!("{}: {:?}", avr.name(), avr.power());
///     }
///
///     registry.close_all();
///     Ok(())
/// }
/// ```
pub struct Registry {
    config: ConnectConfig,
    devices: Mutex<BTreeMap<String, Arc<Avr>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(ConnectConfig::default())
    }
}

impl Registry {
    pub fn new(config: ConnectConfig) -> Self {
        Self {
            config,
            devices: Mutex::new(BTreeMap::new()),
        }
    }

    fn devices_lock(&self) -> MutexGuard<'_, BTreeMap<String, Arc<Avr>>> {
        self.devices.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Connect to a discovered receiver unless a live session already exists
    pub async fn register(&self, device: &DiscoveredDevice) -> Result<Arc<Avr>> {
        let key = device.key();
        if let Some(existing) = self.get(&key) {
            if existing.is_alive() {
                tracing::debug!("{} is already registered", device.name);
                return Ok(existing);
            }
        }

        tracing::debug!("Adding {:?}", device);
        let avr = match Avr::connect_with_config(&device.name, &device.ip, &self.config).await {
            Ok(avr) => Arc::new(avr),
            Err(e) => {
                tracing::warn!("Could not connect to {}: {}", device.ip, e);
                return Err(e);
            }
        };

        // A concurrent register may have won while we were connecting
        let mut devices = self.devices_lock();
        if let Some(existing) = devices.get(&key) {
            if existing.is_alive() {
                avr.close();
                return Ok(existing.clone());
            }
        }
        devices.insert(key, avr.clone());
        Ok(avr)
    }

    /// Close and forget a receiver
    pub fn unregister(&self, serial: &str) -> bool {
        match self.devices_lock().remove(&serial.to_lowercase()) {
            Some(avr) => {
                tracing::debug!("{} is gone", avr.name());
                avr.close();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, serial: &str) -> Option<Arc<Avr>> {
        self.devices_lock().get(&serial.to_lowercase()).cloned()
    }

    /// All registered sessions, ordered by serial
    pub fn devices(&self) -> Vec<Arc<Avr>> {
        self.devices_lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.devices_lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices_lock().is_empty()
    }

    /// Scan once and register every receiver found
    ///
    /// Returns the number of receivers with a live session afterwards.
    pub async fn discover(&self, config: &ScanConfig) -> Result<usize> {
        let mut found = Vec::new();
        scan(config, |device| found.push(device)).await?;

        for device in &found {
            // Already logged; the remaining receivers are still worth trying
            let _ = self.register(device).await;
        }

        Ok(self.devices().iter().filter(|avr| avr.is_alive()).count())
    }

    /// Close every session
    pub fn close_all(&self) {
        for avr in self.devices_lock().values() {
            avr.close();
        }
    }
}
