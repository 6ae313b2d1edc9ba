//! Linux sysfs resolution
//!
//! `/sys/class/tty/<tty>/device` links into the USB topology; the first
//! ancestor carrying `idVendor` is the USB device the port belongs to.

use super::error::UsbError;
use super::resolver::{UsbDeviceInfo, UsbResolver};
use crate::domain::shared::value_objects::{ModemTarget, UsbIdentity};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const MAX_WALK_DEPTH: usize = 10;
const AUDIO_INTERFACE_CLASS: &str = "01";

#[derive(Debug, Clone)]
pub struct SysfsUsbResolver {
    root: PathBuf,
}

impl Default for SysfsUsbResolver {
    fn default() -> Self {
        Self::new("/sys")
    }
}

impl SysfsUsbResolver {
    /// Resolver reading below `root` instead of `/sys`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn tty_name(port: &str) -> Result<String, UsbError> {
        let port = port.trim();
        if port.is_empty() {
            return Err(UsbError::EmptyPort);
        }
        let base = Path::new(port)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or(UsbError::EmptyPort)?;
        if base.starts_with("tty") {
            Ok(base)
        } else {
            Ok(format!("tty{}", base))
        }
    }

    fn usb_device_path(&self, target: &ModemTarget) -> Result<PathBuf, UsbError> {
        let tty = Self::tty_name(&target.port_name)?;
        let link = self.root.join("class").join("tty").join(&tty).join("device");
        let resolved = fs::canonicalize(&link).map_err(|source| UsbError::Io {
            path: link.display().to_string(),
            source,
        })?;

        let mut current = resolved.as_path();
        for _ in 0..MAX_WALK_DEPTH {
            if current.join("idVendor").exists() {
                return Ok(current.to_path_buf());
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Err(UsbError::NotFound(resolved.display().to_string()))
    }
}

fn read_value(path: &Path) -> Result<String, UsbError> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|source| UsbError::Io {
            path: path.display().to_string(),
            source,
        })
}

impl UsbResolver for SysfsUsbResolver {
    fn resolve_usb_identity(&self, target: &ModemTarget) -> Result<UsbIdentity, UsbError> {
        let device = self.usb_device_path(target)?;
        let vid = read_value(&device.join("idVendor"))?.to_ascii_uppercase();
        let pid = read_value(&device.join("idProduct"))?.to_ascii_uppercase();
        let serial = read_value(&device.join("serial")).unwrap_or_default();
        let bus = read_value(&device.join("busnum")).ok().and_then(|v| v.parse().ok());
        let address = read_value(&device.join("devnum")).ok().and_then(|v| v.parse().ok());

        debug!("[{}] USB device {}:{} at {}", target.port_name, vid, pid, device.display());
        Ok(UsbIdentity {
            vid,
            pid,
            serial,
            bus,
            address,
        })
    }

    fn resolve_audio_hints(&self, target: &ModemTarget) -> Vec<String> {
        let Ok(device) = self.usb_device_path(target) else {
            return Vec::new();
        };
        let Ok(entries) = fs::read_dir(device.join("sound")) else {
            return Vec::new();
        };

        let mut hints = BTreeSet::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().trim().to_string();
            if !name.starts_with("card") {
                continue;
            }
            let id_path = self.root.join("class").join("sound").join(&name).join("id");
            if let Ok(id) = read_value(&id_path) {
                if !id.is_empty() {
                    hints.insert(id.to_lowercase());
                }
            }
            hints.insert(name.to_lowercase());
        }
        hints.into_iter().collect()
    }

    fn describe_device(&self, target: &ModemTarget) -> Option<UsbDeviceInfo> {
        let device = self.usb_device_path(target).ok()?;
        let product = read_value(&device.join("product")).unwrap_or_default();

        let has_audio = fs::read_dir(&device)
            .map(|entries| {
                entries.flatten().any(|entry| {
                    entry.file_name().to_string_lossy().contains(':')
                        && read_value(&entry.path().join("bInterfaceClass"))
                            .map(|class| class == AUDIO_INTERFACE_CLASS)
                            .unwrap_or(false)
                })
            })
            .unwrap_or(false);

        Some(UsbDeviceInfo { product, has_audio })
    }
}
