//! Audio device selection for a modem's USB audio class interface
//!
//! Every device gets a score from its name; filters are tried from the most
//! to the least specific until both an input and an output are found.

use super::device::{AudioDeviceInfo, AudioHost};
use super::error::AudioError;
use crate::domain::shared::value_objects::ModemTarget;
use crate::infrastructure::usb::UsbResolver;
use tracing::{debug, info};

const GENERIC_USB_HINTS: [&str; 3] = ["usb", "ac interface", "android"];

/// Devices chosen for one call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSelection {
    pub input: AudioDeviceInfo,
    pub output: AudioDeviceInfo,
}

/// Name fragments that identify the modem's devices
#[derive(Debug, Clone, Default)]
pub struct DeviceHints {
    pub keyword: String,
    pub target: Vec<String>,
    /// Hint filters apply only when the USB device looks like it has audio
    pub usable: bool,
}

impl DeviceHints {
    /// Gather hints for `target` from the resolver
    ///
    /// Fails when the modem's USB identity cannot be resolved; without it the
    /// cascade would settle on an unrelated host device.
    pub fn resolve(
        keyword: &str,
        target: &ModemTarget,
        resolver: &dyn UsbResolver,
    ) -> Result<Self, AudioError> {
        let mut hints: Vec<String> = Vec::new();
        let mut push = |value: &str| {
            let value = value.trim().to_lowercase();
            if !value.is_empty() && !hints.contains(&value) {
                hints.push(value);
            }
        };

        let identity = resolver.resolve_usb_identity(target)?;
        push(&identity.vid);
        push(&identity.pid);
        for hint in resolver.resolve_audio_hints(target) {
            push(&hint);
        }

        let description = resolver.describe_device(target);
        if let Some(info) = &description {
            push(&info.product);
        }

        let usable = match &description {
            Some(info) => info.has_audio,
            None => !hints.is_empty(),
        };

        Ok(Self {
            keyword: keyword.trim().to_lowercase(),
            target: hints,
            usable,
        })
    }

    fn has_keyword(&self, name: &str) -> bool {
        !self.keyword.is_empty() && name.contains(&self.keyword)
    }

    fn has_target(&self, name: &str) -> bool {
        self.target.iter().any(|hint| name.contains(hint.as_str()))
    }
}

fn has_generic_usb(name: &str) -> bool {
    GENERIC_USB_HINTS.iter().any(|hint| name.contains(hint))
}

/// Rank a device name; higher is better
pub fn score_device(name: &str, hints: &DeviceHints) -> i32 {
    let name = name.to_lowercase();
    let mut score = 0;

    if hints.has_target(&name) {
        score += 220;
    }
    if has_generic_usb(&name) {
        score += 120;
    }
    if hints.has_keyword(&name) {
        score += 80;
    }
    if name.contains("plughw") {
        score += 50;
    }
    if name.contains("hw:") {
        score += 40;
    }
    if name.contains("front") {
        score += 25;
    }
    if name.contains("sysdefault") {
        score -= 40;
    } else if name.contains("default") {
        score -= 20;
    }
    if ["surround", "rear", "center_lfe", "side"]
        .iter()
        .any(|s| name.contains(s))
    {
        score -= 120;
    }
    if name.contains("dmix") {
        score -= 70;
    }
    if name.contains("iec958") || name.contains("hdmi") {
        score -= 60;
    }
    if name.contains("jack") || name.contains("pulse") {
        score -= 60;
    }
    if name.contains("null") {
        score -= 200;
    }
    score
}

type Filter = fn(&DeviceHints, &str) -> bool;

fn keyword_and_hint(h: &DeviceHints, name: &str) -> bool {
    h.has_keyword(name) && h.has_target(name)
}

fn hint_only(h: &DeviceHints, name: &str) -> bool {
    h.has_target(name)
}

fn keyword_and_usb(h: &DeviceHints, name: &str) -> bool {
    h.has_keyword(name) && has_generic_usb(name)
}

fn usb_only(_: &DeviceHints, name: &str) -> bool {
    has_generic_usb(name)
}

fn keyword_only(h: &DeviceHints, name: &str) -> bool {
    h.has_keyword(name)
}

fn any(_: &DeviceHints, _: &str) -> bool {
    true
}

fn filters(hints: &DeviceHints) -> Vec<(&'static str, Filter)> {
    let mut cascade: Vec<(&'static str, Filter)> = Vec::new();
    if hints.usable {
        cascade.push(("keyword+hint", keyword_and_hint));
        cascade.push(("hint", hint_only));
    }
    cascade.push(("keyword+usb", keyword_and_usb));
    cascade.push(("usb", usb_only));
    cascade.push(("keyword", keyword_only));
    cascade.push(("any", any));
    cascade
}

fn best<'a>(
    devices: &'a [AudioDeviceInfo],
    hints: &DeviceHints,
    filter: Filter,
    capable: fn(&AudioDeviceInfo) -> bool,
) -> Option<&'a AudioDeviceInfo> {
    let mut best: Option<(&AudioDeviceInfo, i32)> = None;
    for device in devices.iter().filter(|d| capable(d)) {
        let lower = device.name.to_lowercase();
        if !filter(hints, &lower) {
            continue;
        }
        let score = score_device(&device.name, hints);
        // First device wins ties
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((device, score));
        }
    }
    best.map(|(device, _)| device)
}

/// Choose capture and playback devices from `devices`
pub fn pick_devices(
    devices: &[AudioDeviceInfo],
    hints: &DeviceHints,
) -> Result<DeviceSelection, AudioError> {
    if devices.is_empty() {
        return Err(AudioError::NoDevices);
    }

    let mut input = None;
    let mut output = None;
    for (label, filter) in filters(hints) {
        if input.is_none() {
            input = best(devices, hints, filter, AudioDeviceInfo::can_capture);
        }
        if output.is_none() {
            output = best(devices, hints, filter, AudioDeviceInfo::can_play);
        }
        if input.is_some() && output.is_some() {
            debug!("Audio devices matched at filter '{}'", label);
            break;
        }
    }

    match (input, output) {
        (Some(input), Some(output)) => Ok(DeviceSelection {
            input: input.clone(),
            output: output.clone(),
        }),
        (input, output) => Err(AudioError::NoMatchingDevice {
            input: input.is_some(),
            output: output.is_some(),
        }),
    }
}

/// Enumerate `host` and pick devices for `target`
pub fn select_devices(
    host: &dyn AudioHost,
    resolver: &dyn UsbResolver,
    target: &ModemTarget,
    keyword: &str,
) -> Result<DeviceSelection, AudioError> {
    let devices = host.devices()?;
    let hints = DeviceHints::resolve(keyword, target, resolver)?;
    let selection = pick_devices(&devices, &hints)?;
    info!(
        "[{}] Audio input '{}', output '{}'",
        target.port_name, selection.input.name, selection.output.name
    );
    Ok(selection)
}
