use config::{Config, ConfigError, Environment, File};
use serde_derive::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::cli::Opt;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("no packet source, use --interface <name>, --listen <address> or --file <capture>")]
    NoSource,

    #[error("more than one packet source is configured, pick one")]
    ConflictingSources,

    #[error("snapshot window must be at least 1 second")]
    EmptyWindow,
}

/// Where export packets come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureSource {
    Interface(String),
    Listen(SocketAddr),
    File(PathBuf),
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Log {
    pub level: String,
}

impl Default for Log {
    fn default() -> Self {
        Log { level: "info".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Capture {
    pub interface: Option<String>,
    pub listen: Option<IpAddr>,
    pub file: Option<PathBuf>,
    pub port: u16,
    pub host: Option<IpAddr>,
    pub ipfix_as_v9: bool,
}

impl Default for Capture {
    fn default() -> Self {
        Capture { interface: None, listen: None, file: None, port: 2055, host: None, ipfix_as_v9: false }
    }
}

impl Capture {
    pub fn source(&self) -> Result<CaptureSource, SettingsError> {
        match (&self.interface, &self.listen, &self.file) {
            (Some(name), None, None) => Ok(CaptureSource::Interface(name.clone())),
            (None, Some(ip), None) => Ok(CaptureSource::Listen(SocketAddr::new(*ip, self.port))),
            (None, None, Some(path)) => Ok(CaptureSource::File(path.clone())),
            (None, None, None) => Err(SettingsError::NoSource),
            _ => Err(SettingsError::ConflictingSources),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Report {
    pub window: u64,
    pub color: bool,
    pub idle_windows: Option<u32>,
}

impl Default for Report {
    fn default() -> Self {
        Report { window: 60, color: true, idle_windows: None }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub log: Log,
    pub capture: Capture,
    pub report: Report,
}

impl Settings {
    /// Defaults, then the optional config file, then `FLOWLOSS_<SECTION>__<KEY>` environment variables.
    pub fn init(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut s = Config::new();

        if let Some(path) = config_file {
            s.merge(File::from(path.to_path_buf()))?;
        }
        s.merge(Environment::with_prefix("FLOWLOSS").separator("__"))?;

        s.try_into()
    }

    /// Command line flags take precedence over everything else.
    pub fn apply(&mut self, opt: &Opt) {
        if let Some(level) = &opt.log_level {
            self.log.level = level.clone();
        }
        if opt.interface.is_some() || opt.listen.is_some() || opt.file.is_some() {
            self.capture.interface = opt.interface.clone();
            self.capture.listen = opt.listen;
            self.capture.file = opt.file.clone();
        }
        if let Some(port) = opt.port {
            self.capture.port = port;
        }
        if opt.host.is_some() {
            self.capture.host = opt.host;
        }
        if let Some(window) = opt.window {
            self.report.window = window;
        }
        if opt.idle_windows.is_some() {
            self.report.idle_windows = opt.idle_windows;
        }
        self.capture.ipfix_as_v9 |= opt.ipfix_as_v9;
        self.report.color &= !opt.no_color;
    }

    pub fn validate(&self) -> Result<CaptureSource, SettingsError> {
        if self.report.window == 0 {
            return Err(SettingsError::EmptyWindow);
        }
        self.capture.source()
    }
}
