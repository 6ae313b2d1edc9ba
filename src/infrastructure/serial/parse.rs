//! Parsers for modem status responses

use super::engine::UacStatus;
use crate::domain::modem::OperatorDirectory;
use crate::domain::shared::value_objects::normalize_usb_id;

/// Text after `prefix` on the first line starting with it
pub fn field_after<'a>(response: &'a str, prefix: &str) -> Option<&'a str> {
    response
        .lines()
        .map(str::trim)
        .find_map(|l| l.strip_prefix(prefix))
        .map(str::trim)
}

/// `+CSQ: <rssi>,<ber>` to percent; 99 means unknown
pub fn signal_percent(response: &str) -> Option<u8> {
    let rssi: u32 = field_after(response, "+CSQ:")?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()?;
    if rssi == 99 {
        return Some(0);
    }
    Some(((rssi.min(31) as f64 / 31.0) * 100.0) as u8)
}

/// Operator from `+COPS: 0,0,"name",7`, numeric codes resolved through `operators`
pub fn operator_name(response: &str, operators: &OperatorDirectory) -> Option<String> {
    let quoted = response.split('"').nth(1)?;
    Some(operators.resolve(quoted))
}

/// `+CREG: <n>,<stat>` to a display string
pub fn registration_text(response: &str) -> Option<&'static str> {
    let stat = field_after(response, "+CREG:")?.split(',').nth(1)?.trim();
    Some(match stat {
        "1" => "Home Network",
        "5" => "Roaming",
        "2" => "Searching...",
        "3" => "Denied",
        "4" => "Unknown",
        _ => "Not Registered",
    })
}

/// First response line that looks like an IMEI
pub fn imei(response: &str) -> Option<String> {
    response
        .lines()
        .map(str::trim)
        .find(|l| l.len() > 10 && !l.contains("OK"))
        .map(str::to_string)
}

/// `+QCFG: "usbcfg",<vid>,<pid>,...,<uac>`; ready when the last field is 1
pub fn uac_status(response: &str) -> Option<UacStatus> {
    let body = response
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("+QCFG:") && l.to_ascii_lowercase().contains("usbcfg"))?;
    let fields: Vec<&str> = body["+QCFG:".len()..].split(',').map(str::trim).collect();
    if fields.len() < 4 {
        return None;
    }
    Some(UacStatus {
        ready: fields.last().map(|f| *f == "1").unwrap_or(false),
        vid: normalize_usb_id(fields[1]).unwrap_or_default(),
        pid: normalize_usb_id(fields[2]).unwrap_or_default(),
    })
}

/// ICCID query and response prefix for the manufacturer named in `ATI`
pub fn iccid_query(ati_response: &str) -> (&'static str, &'static str) {
    if ati_response.to_ascii_lowercase().contains("quectel") {
        ("AT+QCCID", "+QCCID:")
    } else {
        ("AT+ICCID", "+ICCID:")
    }
}

/// Stored message PDUs from an `AT+CMGL=4` listing
pub fn stored_pdus(response: &str) -> Vec<String> {
    response
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("+CMGL:") && *l != "OK")
        .filter(|l| l.len() % 2 == 0 && l.chars().all(|c| c.is_ascii_hexdigit()))
        .map(str::to_string)
        .collect()
}

/// Networks from `AT+COPS=?` as `Name (MCCMNC) [Status]`
pub fn network_list(response: &str, operators: &OperatorDirectory) -> Vec<String> {
    let raw = field_after(response, "+COPS:").unwrap_or("");
    let mut networks = Vec::new();
    let mut rest = raw;

    while let Some(open) = rest.find('(') {
        let Some(close) = rest[open..].find(')') else {
            break;
        };
        let inner = &rest[open + 1..open + close];
        rest = &rest[open + close + 1..];

        let parts: Vec<&str> = inner.split(',').collect();
        if parts.len() < 4 {
            continue;
        }
        let numeric = parts[3].trim().trim_matches('"');
        let mut long = parts[1].trim().trim_matches('"').to_string();
        if long.is_empty() && numeric.len() >= 5 {
            if let Some(name) = operators.lookup(&numeric[..3], &numeric[3..]) {
                long = name.to_string();
            }
        }
        if long.is_empty() {
            long = "Unknown".to_string();
        }
        let status = match parts[0].trim() {
            "1" => "Available",
            "2" => "Current",
            "3" => "Forbidden",
            _ => "Unknown",
        };
        networks.push(format!("{} ({}) [{}]", long, numeric, status));
    }

    networks
}
