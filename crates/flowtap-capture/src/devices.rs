//! Interface enumeration.

use crate::error::{CaptureError, CaptureResult};
use flowtap_types::InterfaceDescriptor;
use pcap::Device;
use std::collections::BTreeMap;

/// Lists every interface libpcap can see, regardless of whether it is a
/// sensible capture target (loopback and down interfaces are included so
/// callers can decide).
pub fn list_devices() -> CaptureResult<Vec<InterfaceDescriptor>> {
    let devices = Device::list().map_err(|e| CaptureError::PcapError(e.to_string()))?;
    Ok(devices.into_iter().map(to_descriptor).collect())
}

/// The platform's default capture device, as reported by libpcap.
pub fn default_device() -> CaptureResult<InterfaceDescriptor> {
    let device = Device::lookup()
        .map_err(|e| CaptureError::PcapError(e.to_string()))?
        .ok_or(CaptureError::NoDeviceFound)?;
    Ok(to_descriptor(device))
}

/// Expands a user-supplied interface list into concrete capture targets.
///
/// An empty `requested` list means "all eligible interfaces": every
/// interface libpcap reports as up and non-loopback. A non-empty list is
/// resolved against the platform's device list verbatim, in the order
/// requested, so a typo surfaces as [`CaptureError::DeviceNotFound`] rather
/// than being silently dropped.
///
/// # Errors
///
/// Returns [`CaptureError::NoInterfaces`] if the resolved set is empty, or
/// [`CaptureError::DeviceNotFound`] if a named interface does not exist.
pub fn enumerate(requested: &[String]) -> CaptureResult<BTreeMap<String, InterfaceDescriptor>> {
    let all = list_devices()?;

    let resolved: BTreeMap<String, InterfaceDescriptor> = if requested.is_empty() {
        all.into_iter()
            .filter(InterfaceDescriptor::is_capture_candidate)
            .map(|d| (d.name.clone(), d))
            .collect()
    } else {
        let mut out = BTreeMap::new();
        for name in requested {
            let descriptor = all
                .iter()
                .find(|d| &d.name == name)
                .cloned()
                .ok_or_else(|| CaptureError::DeviceNotFound(name.clone()))?;
            out.insert(name.clone(), descriptor);
        }
        out
    };

    if resolved.is_empty() {
        return Err(CaptureError::NoInterfaces);
    }

    Ok(resolved)
}

fn to_descriptor(device: Device) -> InterfaceDescriptor {
    InterfaceDescriptor {
        name: device.name,
        description: device.desc,
        is_up: device.flags.is_up(),
        is_loopback: device.flags.is_loopback(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str, up: bool, loopback: bool) -> InterfaceDescriptor {
        InterfaceDescriptor {
            name: name.to_string(),
            description: None,
            is_up: up,
            is_loopback: loopback,
        }
    }

    fn resolve_from(
        all: Vec<InterfaceDescriptor>,
        requested: &[String],
    ) -> CaptureResult<BTreeMap<String, InterfaceDescriptor>> {
        let resolved: BTreeMap<String, InterfaceDescriptor> = if requested.is_empty() {
            all.into_iter()
                .filter(InterfaceDescriptor::is_capture_candidate)
                .map(|d| (d.name.clone(), d))
                .collect()
        } else {
            let mut out = BTreeMap::new();
            for name in requested {
                let descriptor = all
                    .iter()
                    .find(|d| &d.name == name)
                    .cloned()
                    .ok_or_else(|| CaptureError::DeviceNotFound(name.clone()))?;
                out.insert(name.clone(), descriptor);
            }
            out
        };
        if resolved.is_empty() {
            return Err(CaptureError::NoInterfaces);
        }
        Ok(resolved)
    }

    #[test]
    fn empty_request_excludes_loopback_and_down() {
        let all = vec![
            sample("lo0", true, true),
            sample("eth0", true, false),
            sample("eth1", false, false),
        ];
        let resolved = resolve_from(all, &[]).unwrap();
        assert_eq!(resolved.keys().collect::<Vec<_>>(), vec!["eth0"]);
    }

    #[test]
    fn named_request_resolves_regardless_of_up_state() {
        let all = vec![sample("eth1", false, false)];
        let resolved = resolve_from(all, &["eth1".to_string()]).unwrap();
        assert!(resolved.contains_key("eth1"));
    }

    #[test]
    fn unknown_name_is_an_error() {
        let all = vec![sample("eth0", true, false)];
        assert!(matches!(
            resolve_from(all, &["eth9".to_string()]),
            Err(CaptureError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn no_eligible_interfaces_is_an_error() {
        let all = vec![sample("lo0", true, true)];
        assert!(matches!(resolve_from(all, &[]), Err(CaptureError::NoInterfaces)));
    }
}
