//! Configuration management
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed with `MODEMHUB__` (sections separated by
//! `__`, e.g. `MODEMHUB__SERIAL__BAUD_RATE=9600`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "MODEMHUB";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub serial: SerialConfig,
    pub calling: CallingConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port discovery interval in seconds
    pub scan_interval_secs: u64,
    /// Status polling interval in seconds
    pub poll_interval_secs: u64,
    /// Delay before the first command is sent to a freshly opened port
    pub startup_delay_ms: u64,
    pub baud_rate: u32,
    /// Ports never opened (exact name match)
    pub exclude_ports: Vec<String>,
    /// Commands sent once after the modem answers the first `AT`
    pub init_commands: Vec<String>,
    /// JSON operator list (`[{"mcc": .., "mnc": .., "name": ..}]`)
    pub operator_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallingConfig {
    pub stun_servers: Vec<String>,
    /// Ephemeral UDP range for ICE; both zero leaves the choice to the OS
    pub udp_port_min: u16,
    pub udp_port_max: u16,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Case-insensitive substring preferred in device names
    pub device_keyword: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub capture_chunk_ms: u32,
    pub playback_chunk_ms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 3,
            poll_interval_secs: 5,
            startup_delay_ms: 2000,
            baud_rate: 115_200,
            exclude_ports: Vec::new(),
            init_commands: vec!["ATE0".to_string(), "AT+CMGF=0".to_string()],
            operator_file: Some("mcc_mnc.json".to_string()),
        }
    }
}

impl Default for CallingConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            udp_port_min: 0,
            udp_port_max: 0,
            audio: AudioConfig::default(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device_keyword: "AC Interface".to_string(),
            sample_rate: 8000,
            channels: 1,
            bits_per_sample: 16,
            capture_chunk_ms: 40,
            playback_chunk_ms: 100,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an optional file plus the environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let cfg: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("serial.exclude_ports")
                    .with_list_parse_key("serial.init_commands")
                    .with_list_parse_key("calling.stun_servers")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(cfg.normalized())
    }

    /// Clamp values that would stall the pollers or the audio loops
    pub fn normalized(mut self) -> Self {
        if self.serial.scan_interval_secs == 0 {
            self.serial.scan_interval_secs = 3;
        }
        if self.serial.poll_interval_secs == 0 {
            self.serial.poll_interval_secs = 1;
        }
        if self.serial.baud_rate == 0 {
            self.serial.baud_rate = 115_200;
        }
        let audio = &mut self.calling.audio;
        if audio.device_keyword.trim().is_empty() {
            audio.device_keyword = AudioConfig::default().device_keyword;
        }
        if audio.capture_chunk_ms == 0 {
            audio.capture_chunk_ms = 40;
        }
        if audio.playback_chunk_ms == 0 {
            audio.playback_chunk_ms = 100;
        }
        self
    }
}

impl SerialConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs.max(1))
    }

    /// Per-engine settings derived from this section
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            init_commands: self.init_commands.clone(),
            startup_delay: Duration::from_millis(self.startup_delay_ms),
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
        }
    }
}

/// Immutable settings handed to every protocol engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub init_commands: Vec<String>,
    pub startup_delay: Duration,
    pub poll_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        SerialConfig::default().engine_config()
    }
}

impl AudioConfig {
    /// Samples per capture frame
    pub fn capture_frame_samples(&self) -> usize {
        (self.sample_rate as usize * self.capture_chunk_ms as usize) / 1000
    }

    /// Samples per playback frame
    pub fn playback_frame_samples(&self) -> usize {
        (self.sample_rate as usize * self.playback_chunk_ms as usize) / 1000
    }

    /// Ring buffer capacity: three seconds of audio
    pub fn ring_capacity(&self) -> usize {
        self.sample_rate as usize * 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_audio_defaults() {
        let audio = AudioConfig::default();
        assert_eq!(audio.device_keyword, "AC Interface");
        assert_eq!(audio.capture_frame_samples(), 320);
        assert_eq!(audio.playback_frame_samples(), 800);
        assert_eq!(audio.ring_capacity(), 24_000);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[serial]\nbaud_rate = 9600\nexclude_ports = [\"/dev/ttyS0\"]\n\n[calling.audio]\ndevice_keyword = \"EC25\""
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.exclude_ports, vec!["/dev/ttyS0".to_string()]);
        assert_eq!(config.calling.audio.device_keyword, "EC25");
        assert_eq!(config.calling.audio.sample_rate, 8000);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_normalized_clamps_zero_values() {
        let mut config = Config::default();
        config.serial.poll_interval_secs = 0;
        config.calling.audio.device_keyword = "  ".to_string();
        config.calling.audio.capture_chunk_ms = 0;

        let config = config.normalized();
        assert_eq!(config.serial.poll_interval_secs, 1);
        assert_eq!(config.calling.audio.device_keyword, "AC Interface");
        assert_eq!(config.calling.audio.capture_chunk_ms, 40);
    }
}
