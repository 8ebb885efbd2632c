// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Service management — systemd control over D-Bus with a systemctl fallback
//!
//! Every lifecycle and enablement call goes to systemd's manager interface
//! first. If the system bus cannot be reached at all, the D-Bus path is
//! switched off for the life of the process; if a single call fails, only
//! that call is retried through `systemctl`. Status text and journal logs
//! always come from the command-line tools.

pub mod dbus;
pub mod parse;
pub mod systemctl;

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use dbus::DbusBackend;
use systemctl::{SystemRunner, SystemctlBackend};

/// Upper bound on journal lines a caller may request
pub const MAX_LOG_LINES: u32 = 10_000;

/// A systemd service as shown in the dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceRecord {
    pub name: String,
    pub description: String,
    pub load_state: String,
    pub active_state: String,
    pub sub_state: String,
    pub enabled: bool,
}

/// Result of a status query
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub status_output: String,
    pub is_active: bool,
    pub enabled: bool,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid service name {0:?}")]
    InvalidName(String),

    #[error("Unit {0} not found")]
    UnitNotFound(String),

    #[error("Service manager unreachable: {0}")]
    Unreachable(String),

    #[error("Command timed out: {command}")]
    Timeout { command: String },

    #[error("{}", command_failure(.code, .stderr))]
    CommandFailed { code: Option<i32>, stderr: String },

    #[error("D-Bus call failed: {0}")]
    Dbus(String),
}

fn command_failure(code: &Option<i32>, stderr: &str) -> String {
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    match code {
        Some(code) => format!("Command failed with code {}", code),
        None => "Command killed by signal".to_string(),
    }
}

/// One way of talking to systemd
///
/// Unit arguments are full unit names (`nginx.service`); list results carry
/// the public name with the suffix stripped.
pub trait ServiceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether calls can be attempted right now. May lazily connect.
    fn is_available(&self) -> bool {
        true
    }

    fn list_units(&self) -> Result<Vec<ServiceRecord>, ServiceError>;
    fn start_unit(&self, unit: &str) -> Result<(), ServiceError>;
    fn stop_unit(&self, unit: &str) -> Result<(), ServiceError>;
    fn restart_unit(&self, unit: &str) -> Result<(), ServiceError>;
    fn enable_unit(&self, unit: &str) -> Result<(), ServiceError>;
    fn disable_unit(&self, unit: &str) -> Result<(), ServiceError>;
    fn unit_enabled(&self, unit: &str) -> Result<bool, ServiceError>;
}

/// Validate a public service name and turn it into a unit name
///
/// Names that could be read as a command-line option or a path are refused.
pub fn unit_name(name: &str) -> Result<String, ServiceError> {
    let invalid = name.is_empty()
        || name.starts_with('-')
        || name.contains('/')
        || name.contains('\0')
        || name.chars().any(char::is_whitespace);
    if invalid {
        return Err(ServiceError::InvalidName(name.to_string()));
    }
    if name.ends_with(parse::SERVICE_SUFFIX) {
        Ok(name.to_string())
    } else {
        Ok(format!("{}{}", name, parse::SERVICE_SUFFIX))
    }
}

/// Dispatches service operations to D-Bus first, systemctl second
pub struct ServiceManager {
    dbus: Option<Box<dyn ServiceBackend>>,
    systemctl: SystemctlBackend,
}

impl ServiceManager {
    /// Fails only if the process runner cannot start its runtime
    pub fn new(config: &Config) -> Result<Self, ServiceError> {
        let runner = SystemRunner::new()
            .map_err(|e| ServiceError::Unreachable(format!("Cannot start command runner: {}", e)))?;
        let command_timeout = Duration::from_secs(config.command_timeout_secs);
        let systemctl = SystemctlBackend::new(
            Box::new(runner),
            command_timeout,
            Duration::from_secs(config.enablement_timeout_secs),
            config.journal_dir.clone(),
        );
        let dbus: Option<Box<dyn ServiceBackend>> = if config.use_dbus {
            Some(Box::new(DbusBackend::new(command_timeout)))
        } else {
            info!("D-Bus disabled in config, services will be managed through systemctl");
            None
        };
        Ok(Self::with_backends(dbus, systemctl))
    }

    pub fn with_backends(dbus: Option<Box<dyn ServiceBackend>>, systemctl: SystemctlBackend) -> Self {
        Self { dbus, systemctl }
    }

    /// Human-readable description of the configured path, for the startup banner
    pub fn describe(&self) -> String {
        match &self.dbus {
            Some(backend) => format!("{} (fallback: {})", backend.name(), self.systemctl.name()),
            None => self.systemctl.name().to_string(),
        }
    }

    /// Run `call` on D-Bus if possible, otherwise (or on failure) on systemctl
    ///
    /// A missing unit reported over D-Bus is final: systemctl would only
    /// repeat the same answer less precisely.
    fn dispatch<T>(
        &self,
        operation: &str,
        call: impl Fn(&dyn ServiceBackend) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        if let Some(primary) = self.dbus.as_deref() {
            if primary.is_available() {
                match call(primary) {
                    Ok(value) => return Ok(value),
                    Err(e @ ServiceError::UnitNotFound(_)) => return Err(e),
                    Err(e) => warn!(
                        "{} over {} failed: {}, retrying with {}",
                        operation, primary.name(), e, self.systemctl.name()
                    ),
                }
            }
        }
        call(&self.systemctl)
    }

    /// All service units, sorted by name
    pub fn list_services(&self) -> Result<Vec<ServiceRecord>, ServiceError> {
        let mut services = self.dispatch("ListUnits", |b| b.list_units())?;
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }

    pub fn start_service(&self, name: &str) -> Result<(), ServiceError> {
        let unit = unit_name(name)?;
        self.dispatch("StartUnit", |b| b.start_unit(&unit))?;
        info!("Service {} started", unit);
        Ok(())
    }

    pub fn stop_service(&self, name: &str) -> Result<(), ServiceError> {
        let unit = unit_name(name)?;
        self.dispatch("StopUnit", |b| b.stop_unit(&unit))?;
        info!("Service {} stopped", unit);
        Ok(())
    }

    pub fn restart_service(&self, name: &str) -> Result<(), ServiceError> {
        let unit = unit_name(name)?;
        self.dispatch("RestartUnit", |b| b.restart_unit(&unit))?;
        info!("Service {} restarted", unit);
        Ok(())
    }

    pub fn enable_service(&self, name: &str) -> Result<(), ServiceError> {
        let unit = unit_name(name)?;
        self.dispatch("EnableUnitFiles", |b| b.enable_unit(&unit))?;
        info!("Service {} enabled", unit);
        Ok(())
    }

    pub fn disable_service(&self, name: &str) -> Result<(), ServiceError> {
        let unit = unit_name(name)?;
        self.dispatch("DisableUnitFiles", |b| b.disable_unit(&unit))?;
        info!("Service {} disabled", unit);
        Ok(())
    }

    pub fn is_service_enabled(&self, name: &str) -> Result<bool, ServiceError> {
        let unit = unit_name(name)?;
        self.dispatch("GetUnitFileState", |b| b.unit_enabled(&unit))
    }

    /// Recent journal output, or the no-logs sentinel
    pub fn service_logs(&self, name: &str, lines: u32) -> Result<String, ServiceError> {
        let unit = unit_name(name)?;
        self.systemctl.journal(&unit, lines.min(MAX_LOG_LINES))
    }

    /// Status text plus enablement
    ///
    /// An enablement lookup that fails on every path reports `enabled: false`
    /// rather than failing the whole query.
    pub fn service_status(&self, name: &str) -> Result<ServiceStatus, ServiceError> {
        let unit = unit_name(name)?;
        let status_output = self.systemctl.status_text(&unit)?;
        let enabled = match self.is_service_enabled(name) {
            Ok(enabled) => enabled,
            Err(e) => {
                warn!("Could not determine whether {} is enabled: {}", unit, e);
                false
            }
        };
        Ok(ServiceStatus {
            name: name.to_string(),
            is_active: parse::status_is_active(&status_output),
            status_output,
            enabled,
        })
    }
}
