//! Serial port to USB identity resolution

use super::error::UsbError;
use crate::domain::shared::value_objects::{normalize_usb_id, ModemTarget, UsbIdentity};
use std::sync::Arc;

/// Descriptor details used to score audio devices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsbDeviceInfo {
    pub product: String,
    /// Device exposes a USB audio class interface
    pub has_audio: bool,
}

/// Maps a modem's serial port to its USB identity and audio hints
pub trait UsbResolver: Send + Sync {
    fn resolve_usb_identity(&self, target: &ModemTarget) -> Result<UsbIdentity, UsbError>;

    /// Lower-cased sound card names tied to the modem's USB device
    fn resolve_audio_hints(&self, target: &ModemTarget) -> Vec<String>;

    fn describe_device(&self, _target: &ModemTarget) -> Option<UsbDeviceInfo> {
        None
    }
}

/// Uses the VID/PID already carried by the target, as reported by the modem
#[derive(Debug, Default, Clone, Copy)]
pub struct TargetHintResolver;

impl UsbResolver for TargetHintResolver {
    fn resolve_usb_identity(&self, target: &ModemTarget) -> Result<UsbIdentity, UsbError> {
        if target.port_name.trim().is_empty() {
            return Err(UsbError::EmptyPort);
        }
        if target.vid.trim().is_empty() || target.pid.trim().is_empty() {
            return Err(UsbError::Unsupported(target.port_name.clone()));
        }
        let vid = normalize_usb_id(&target.vid).ok_or_else(|| UsbError::InvalidId(target.vid.clone()))?;
        let pid = normalize_usb_id(&target.pid).ok_or_else(|| UsbError::InvalidId(target.pid.clone()))?;
        Ok(UsbIdentity {
            vid,
            pid,
            serial: target.serial.clone(),
            bus: None,
            address: None,
        })
    }

    fn resolve_audio_hints(&self, _target: &ModemTarget) -> Vec<String> {
        Vec::new()
    }
}

/// Resolver for the running platform
pub fn platform_resolver() -> Arc<dyn UsbResolver> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(super::sysfs::SysfsUsbResolver::default())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(TargetHintResolver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_hint_resolver_normalizes() {
        let target = ModemTarget::new("COM7").with_usb_ids("0x2c7c", "125");
        let identity = TargetHintResolver.resolve_usb_identity(&target).unwrap();
        assert_eq!(identity.vid, "2C7C");
        assert_eq!(identity.pid, "0125");
        assert!(TargetHintResolver.resolve_audio_hints(&target).is_empty());
    }

    #[test]
    fn test_target_hint_resolver_unsupported_without_ids() {
        let target = ModemTarget::new("COM7");
        assert!(matches!(
            TargetHintResolver.resolve_usb_identity(&target),
            Err(UsbError::Unsupported(_))
        ));
        assert!(matches!(
            TargetHintResolver.resolve_usb_identity(&ModemTarget::new(" ")),
            Err(UsbError::EmptyPort)
        ));
        let bad = ModemTarget::new("COM7").with_usb_ids("xyz", "0125");
        assert!(matches!(
            TargetHintResolver.resolve_usb_identity(&bad),
            Err(UsbError::InvalidId(_))
        ));
    }
}
