//! GPU device lists.
//!
//! A [`DeviceList`] is the ordered sequence of GPU ids the scheduler assigns
//! workers to. Duplicates are allowed and mean the same physical GPU hosts
//! more than one worker, e.g. `0,1,1,2`.

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::error::FixFramesError;

/// Ordered, non-empty list of GPU device ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceList {
    devices: Vec<u32>,
}

impl DeviceList {
    /// Build a device list from ids.
    ///
    /// # Errors
    ///
    /// Returns [`FixFramesError::InvalidDeviceList`] if `devices` is empty.
    pub fn new(devices: Vec<u32>) -> Result<Self, FixFramesError> {
        if devices.is_empty() {
            return Err(FixFramesError::InvalidDeviceList {
                list: String::new(),
                reason: "at least one GPU is required".to_string(),
            });
        }
        Ok(Self { devices })
    }

    /// Parse a comma-separated list such as `0,1,1,2`.
    ///
    /// # Errors
    ///
    /// Returns [`FixFramesError::InvalidDeviceList`] if any entry is not a
    /// non-negative integer or the list is empty.
    pub fn parse(list: &str) -> Result<Self, FixFramesError> {
        let devices = list
            .split(',')
            .map(|entry| {
                let entry = entry.trim();
                entry
                    .parse::<u32>()
                    .map_err(|_| FixFramesError::InvalidDeviceList {
                        list: list.to_string(),
                        reason: format!("{entry:?} is not a GPU id"),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { devices })
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Always `false`; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.devices
    }

    /// The device for a worker slot.
    pub fn get(&self, slot: usize) -> Option<u32> {
        self.devices.get(slot).copied()
    }

    /// Distinct physical devices in first-seen order.
    ///
    /// Used for stages that run a single worker per GPU regardless of how many
    /// worker slots the GPU was given.
    pub fn distinct(&self) -> DeviceList {
        let mut devices = Vec::with_capacity(self.devices.len());
        for &device in &self.devices {
            if !devices.contains(&device) {
                devices.push(device);
            }
        }
        DeviceList { devices }
    }
}

impl Default for DeviceList {
    fn default() -> Self {
        Self { devices: vec![0] }
    }
}

impl FromStr for DeviceList {
    type Err = FixFramesError;

    fn from_str(list: &str) -> Result<Self, Self::Err> {
        Self::parse(list)
    }
}

impl Display for DeviceList {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let rendered: Vec<String> = self.devices.iter().map(u32::to_string).collect();
        write!(f, "{}", rendered.join(","))
    }
}
