//! Execution devices and data-parallel placement plans.

use std::fmt;
use std::str::FromStr;

use crate::error::{NetError, Result};

/// An execution device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Device {
    /// Local CPU execution.
    Cpu,
    /// An accelerator identified by index.
    Accel(usize),
}

impl Device {
    /// Returns true if the device can actually execute work.
    ///
    /// No accelerator runtime is linked into this crate, so only the CPU
    /// reports available. Accelerator identifiers still parse and plan so
    /// that configurations are portable.
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self, Self::Cpu)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Accel(id) => write!(f, "accel:{id}"),
        }
    }
}

impl FromStr for Device {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("cpu") {
            return Ok(Self::Cpu);
        }
        if let Some(id) = s.strip_prefix("accel:") {
            let id = id
                .parse::<usize>()
                .map_err(|_| NetError::invalid_dimension(format!("bad device '{s}'")))?;
            return Ok(Self::Accel(id));
        }
        Err(NetError::invalid_dimension(format!("bad device '{s}'")))
    }
}

/// A device placement plan for one trainable unit.
///
/// An empty plan means plain local execution. A plan with more than one
/// device selects the data-parallel strategy: the batch is split into one
/// contiguous chunk per device, the forward pass runs per chunk, and the
/// outputs are gathered back in order. Gradients are always applied against
/// the single canonical parameter set.
///
/// # Example
///
/// ```
/// use gantry_net::DevicePlan;
///
/// let plan = DevicePlan::parse(&["cpu".into(), "cpu".into()]).unwrap();
/// assert_eq!(plan.replicas(), 2);
/// assert!(plan.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevicePlan {
    devices: Vec<Device>,
}

impl DevicePlan {
    /// Creates a plan from an explicit device list.
    #[must_use]
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    /// Creates the default single-CPU plan.
    #[must_use]
    pub fn local() -> Self {
        Self::new(vec![Device::Cpu])
    }

    /// Parses a plan from device strings such as `"cpu"` or `"accel:0"`.
    ///
    /// # Errors
    ///
    /// Returns `NetError::InvalidDimension` on an unrecognized device string.
    pub fn parse(devices: &[String]) -> Result<Self> {
        let devices = devices
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(devices))
    }

    /// Returns the devices in the plan.
    #[must_use]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Returns the number of forward replicas the plan implies.
    #[must_use]
    pub fn replicas(&self) -> usize {
        self.devices.len().max(1)
    }

    /// Checks that every planned device is available.
    ///
    /// # Errors
    ///
    /// Returns `NetError::DeviceUnavailable` naming the first unavailable
    /// device. A non-empty plan over missing accelerators is a fatal
    /// configuration error, never a silent CPU fallback.
    pub fn validate(&self) -> Result<()> {
        for device in &self.devices {
            if !device.is_available() {
                return Err(NetError::device_unavailable(device.to_string()));
            }
        }
        Ok(())
    }

    /// Splits a batch of `batch` rows into one contiguous `(start, end)`
    /// range per replica. Empty ranges are dropped, so a batch smaller than
    /// the replica count yields fewer chunks.
    #[must_use]
    pub fn chunk_ranges(&self, batch: usize) -> Vec<(usize, usize)> {
        let replicas = self.replicas();
        let base = batch / replicas;
        let extra = batch % replicas;

        let mut ranges = Vec::with_capacity(replicas);
        let mut start = 0;
        for i in 0..replicas {
            let size = base + usize::from(i < extra);
            if size == 0 {
                continue;
            }
            ranges.push((start, start + size));
            start += size;
        }
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_parse() {
        assert_eq!("cpu".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("CPU".parse::<Device>().unwrap(), Device::Cpu);
        assert_eq!("accel:3".parse::<Device>().unwrap(), Device::Accel(3));
        assert!("gpu".parse::<Device>().is_err());
        assert!("accel:x".parse::<Device>().is_err());
    }

    #[test]
    fn device_display_roundtrip() {
        for device in [Device::Cpu, Device::Accel(7)] {
            let back: Device = device.to_string().parse().unwrap();
            assert_eq!(back, device);
        }
    }

    #[test]
    fn plan_validate_rejects_accelerators() {
        let plan = DevicePlan::parse(&["accel:0".into()]).unwrap();
        assert!(matches!(
            plan.validate(),
            Err(NetError::DeviceUnavailable(_))
        ));

        let plan = DevicePlan::parse(&["cpu".into(), "accel:1".into()]).unwrap();
        assert!(plan.validate().is_err());
    }

    #[test]
    fn plan_empty_means_single_local_replica() {
        let plan = DevicePlan::default();
        assert_eq!(plan.replicas(), 1);
        assert!(plan.validate().is_ok());
        assert_eq!(plan.chunk_ranges(5), vec![(0, 5)]);
    }

    #[test]
    fn chunk_ranges_cover_batch_in_order() {
        let plan = DevicePlan::new(vec![Device::Cpu, Device::Cpu, Device::Cpu]);

        let ranges = plan.chunk_ranges(8);
        assert_eq!(ranges, vec![(0, 3), (3, 6), (6, 8)]);

        // Batch smaller than replica count drops empty chunks.
        let ranges = plan.chunk_ranges(2);
        assert_eq!(ranges, vec![(0, 1), (1, 2)]);

        assert!(plan.chunk_ranges(0).is_empty());
    }
}
