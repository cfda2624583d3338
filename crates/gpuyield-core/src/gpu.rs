//! GPU device identifiers, device sets and claims

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

use crate::GpuYieldError;

/// Identifies one GPU by its index, as reported by the driver and
/// accepted by `CUDA_VISIBLE_DEVICES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl From<u32> for DeviceId {
    fn from(index: u32) -> Self {
        DeviceId(index)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = GpuYieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(GpuYieldError::Validation(format!(
                "invalid GPU id '{}': expected a non-negative integer",
                s
            )));
        }
        trimmed
            .parse::<u32>()
            .map(DeviceId)
            .map_err(|e| GpuYieldError::Validation(format!("invalid GPU id '{}': {}", s, e)))
    }
}

/// Device ids arrive either as JSON integers or as decimal strings
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDeviceId {
    Index(u32),
    Text(String),
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match RawDeviceId::deserialize(deserializer) {
            Ok(RawDeviceId::Index(index)) => Ok(DeviceId(index)),
            Ok(RawDeviceId::Text(text)) => text.parse().map_err(serde::de::Error::custom),
            Err(_) => Err(serde::de::Error::custom(
                "GPU id must be a non-negative integer or a string of digits",
            )),
        }
    }
}

/// An ordered set of devices. Iteration is always ascending.
pub type DeviceSet = BTreeSet<DeviceId>;

/// Build a device set from raw indices
pub fn device_set<I>(indices: I) -> DeviceSet
where
    I: IntoIterator<Item = u32>,
{
    indices.into_iter().map(DeviceId).collect()
}

/// Format devices for a visible-devices environment variable (`0,1,3`)
pub fn visible_devices_value(devices: &DeviceSet) -> String {
    devices
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Format devices for human-readable messages (`[0, 1, 3]`)
pub fn display_devices(devices: &DeviceSet) -> String {
    let inner = devices
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("[{}]", inner)
}

/// Parse a comma-separated device list such as `0,1,3`
pub fn parse_device_list(s: &str) -> Result<DeviceSet, GpuYieldError> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(DeviceId::from_str)
        .collect()
}

/// Devices that another actor intends to use
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claim {
    devices: DeviceSet,
}

impl Claim {
    /// Create a claim over the given devices
    pub fn new(devices: DeviceSet) -> Self {
        Self { devices }
    }

    /// Devices named by the claim
    pub fn devices(&self) -> &DeviceSet {
        &self.devices
    }

    /// Whether the claim names no devices
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Whether any claimed device is in `devices`
    pub fn overlaps(&self, devices: &DeviceSet) -> bool {
        !self.devices.is_disjoint(devices)
    }

    /// Remove the claimed devices from `devices`
    pub fn exclude_from(&self, devices: &DeviceSet) -> DeviceSet {
        devices.difference(&self.devices).copied().collect()
    }
}

impl FromIterator<DeviceId> for Claim {
    fn from_iter<T: IntoIterator<Item = DeviceId>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
