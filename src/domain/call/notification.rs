//! Call-related unsolicited result codes

/// A call notification reported by the modem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallNotification {
    /// `RING`
    Ring,
    /// One `+CLCC:` call list entry, carrying its `stat` field
    CallListEntry(u8),
    /// `NO CARRIER`, `BUSY`, `NO ANSWER` or `NO DIALTONE`
    Terminated(&'static str),
}

const TERMINAL_CODES: [(&str, &str); 4] = [
    ("NO CARRIER", "no_carrier"),
    ("BUSY", "busy"),
    ("NO ANSWER", "no_answer"),
    ("NO DIALTONE", "no_dialtone"),
];

impl CallNotification {
    /// Classify a trimmed response line
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line == "RING" {
            return Some(CallNotification::Ring);
        }
        if let Some(rest) = line.strip_prefix("+CLCC:") {
            // +CLCC: <idx>,<dir>,<stat>,<mode>,<mpty>[,<number>,<type>]
            let stat = rest.split(',').nth(2)?.trim().parse::<u8>().ok()?;
            return Some(CallNotification::CallListEntry(stat));
        }
        TERMINAL_CODES
            .iter()
            .find(|(code, _)| line == *code)
            .map(|(_, reason)| CallNotification::Terminated(reason))
    }
}
