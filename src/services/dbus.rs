// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! D-Bus service backend — systemd's org.freedesktop.systemd1.Manager
//!
//! Inside a container this needs the host's system bus socket mounted at
//! /run/dbus/system_bus_socket.

use std::fmt::Display;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use zbus::zvariant::OwnedObjectPath;

use super::parse::{self, SERVICE_SUFFIX};
use super::{ServiceBackend, ServiceError, ServiceRecord};

/// Row returned by `ListUnits`: name, description, load state, active state,
/// sub state, followed unit, unit path, job id, job type, job path
type UnitListing = (
    String,
    String,
    String,
    String,
    String,
    String,
    OwnedObjectPath,
    u32,
    String,
    OwnedObjectPath,
);

/// Change reported by `EnableUnitFiles`/`DisableUnitFiles`: type, file, destination
type UnitFileChange = (String, String, String);

#[zbus::proxy(
    interface = "org.freedesktop.systemd1.Manager",
    default_service = "org.freedesktop.systemd1",
    default_path = "/org/freedesktop/systemd1",
    gen_async = false,
    blocking_name = "SystemdManagerProxy"
)]
trait SystemdManager {
    fn list_units(&self) -> zbus::Result<Vec<UnitListing>>;

    fn start_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn stop_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn restart_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn enable_unit_files(
        &self,
        files: &[&str],
        runtime: bool,
        force: bool,
    ) -> zbus::Result<(bool, Vec<UnitFileChange>)>;

    fn disable_unit_files(&self, files: &[&str], runtime: bool) -> zbus::Result<Vec<UnitFileChange>>;

    fn get_unit_file_state(&self, file: &str) -> zbus::Result<String>;

    fn get_job(&self, id: u32) -> zbus::Result<OwnedObjectPath>;

    fn reload(&self) -> zbus::Result<()>;
}

/// A connection acquired on first use and kept for the life of its owner
///
/// Acquisition runs at most once: concurrent first callers block on the same
/// attempt, and a failed attempt is remembered so later calls skip straight
/// to the fallback.
pub struct LazyHandle<T> {
    cell: OnceLock<Option<T>>,
}

impl<T> LazyHandle<T> {
    pub fn new() -> Self {
        Self { cell: OnceLock::new() }
    }

    pub fn get_or_connect<E: Display>(&self, connect: impl FnOnce() -> Result<T, E>) -> Option<&T> {
        self.cell
            .get_or_init(|| match connect() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    warn!("D-Bus connection failed: {}, using systemctl from now on", e);
                    None
                }
            })
            .as_ref()
    }
}

impl<T> Default for LazyHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn connect_system_manager() -> zbus::Result<SystemdManagerProxy<'static>> {
    let connection = zbus::blocking::Connection::system()?;
    let manager = SystemdManagerProxy::new(&connection)?;
    info!("Connected to systemd over the system bus");
    Ok(manager)
}

/// Map a D-Bus error, keeping "no such unit" distinct
fn dbus_error(unit: &str, err: zbus::Error) -> ServiceError {
    if let zbus::Error::MethodError(name, _, _) = &err {
        if matches!(
            name.as_str(),
            "org.freedesktop.systemd1.NoSuchUnit" | "org.freedesktop.DBus.Error.FileNotFound"
        ) {
            return ServiceError::UnitNotFound(unit.to_string());
        }
    }
    ServiceError::Dbus(err.to_string())
}

/// How often a queued job is checked for completion
const JOB_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Job id from a job object path such as `/org/freedesktop/systemd1/job/1234`
fn job_id(path: &str) -> Option<u32> {
    path.rsplit('/').next()?.parse().ok()
}

/// Poll until `pending` reports the job gone, or fail once `timeout` passes
fn await_job(
    mut pending: impl FnMut() -> Result<bool, ServiceError>,
    timeout: Duration,
    interval: Duration,
    command: &str,
) -> Result<(), ServiceError> {
    let deadline = Instant::now() + timeout;
    while pending()? {
        if Instant::now() >= deadline {
            return Err(ServiceError::Timeout { command: command.to_string() });
        }
        std::thread::sleep(interval);
    }
    Ok(())
}

/// Normalize `ListUnits` rows into service records
///
/// Non-service units are dropped. An enablement lookup that fails marks only
/// its own unit as disabled.
fn records_from_listing(
    units: Vec<UnitListing>,
    enabled: impl Fn(&str) -> Result<bool, ServiceError>,
) -> Vec<ServiceRecord> {
    units.into_iter()
        .filter(|unit| unit.0.ends_with(SERVICE_SUFFIX))
        .map(|(unit, description, load_state, active_state, sub_state, ..)| {
            let enabled = enabled(&unit).unwrap_or_else(|e| {
                debug!("GetUnitFileState {} failed: {}", unit, e);
                false
            });
            ServiceRecord {
                name: parse::service_name(&unit).to_string(),
                description,
                load_state,
                active_state,
                sub_state,
                enabled,
            }
        })
        .collect()
}

/// Service backend speaking to systemd over the system bus
pub struct DbusBackend {
    manager: LazyHandle<SystemdManagerProxy<'static>>,
    job_timeout: Duration,
}

impl DbusBackend {
    /// `job_timeout` bounds the wait for a start, stop or restart job to finish
    pub fn new(job_timeout: Duration) -> Self {
        Self { manager: LazyHandle::new(), job_timeout }
    }

    /// Block until the queued job leaves the manager, as `systemctl` does
    fn wait_for_job(
        &self,
        manager: &SystemdManagerProxy<'static>,
        job: &OwnedObjectPath,
        command: &str,
    ) -> Result<(), ServiceError> {
        let Some(id) = job_id(job.as_str()) else {
            debug!("Unrecognised job path {} for {}", job.as_str(), command);
            return Ok(());
        };
        await_job(
            || match manager.get_job(id) {
                Ok(_) => Ok(true),
                Err(zbus::Error::MethodError(name, _, _))
                    if name.as_str() == "org.freedesktop.systemd1.NoSuchJob" => Ok(false),
                Err(e) => Err(ServiceError::Dbus(e.to_string())),
            },
            self.job_timeout,
            JOB_POLL_INTERVAL,
            command,
        )
    }

    fn run_job(
        &self,
        verb: &str,
        unit: &str,
        call: impl FnOnce(&SystemdManagerProxy<'static>) -> zbus::Result<OwnedObjectPath>,
    ) -> Result<(), ServiceError> {
        let manager = self.manager()?;
        let job = call(manager).map_err(|e| dbus_error(unit, e))?;
        self.wait_for_job(manager, &job, &format!("{} {}", verb, unit))
    }

    fn manager(&self) -> Result<&SystemdManagerProxy<'static>, ServiceError> {
        self.manager
            .get_or_connect(connect_system_manager)
            .ok_or_else(|| ServiceError::Unreachable("system bus not available".to_string()))
    }

    fn enabled(manager: &SystemdManagerProxy<'static>, unit: &str) -> Result<bool, ServiceError> {
        let state = manager.get_unit_file_state(unit).map_err(|e| dbus_error(unit, e))?;
        Ok(parse::is_enabled_state(&state))
    }
}

impl ServiceBackend for DbusBackend {
    fn name(&self) -> &'static str {
        "D-Bus"
    }

    fn is_available(&self) -> bool {
        self.manager().is_ok()
    }

    fn list_units(&self) -> Result<Vec<ServiceRecord>, ServiceError> {
        let manager = self.manager()?;
        let units = manager.list_units().map_err(|e| ServiceError::Dbus(e.to_string()))?;
        Ok(records_from_listing(units, |unit| Self::enabled(manager, unit)))
    }

    fn start_unit(&self, unit: &str) -> Result<(), ServiceError> {
        self.run_job("StartUnit", unit, |m| m.start_unit(unit, "replace"))
    }

    fn stop_unit(&self, unit: &str) -> Result<(), ServiceError> {
        self.run_job("StopUnit", unit, |m| m.stop_unit(unit, "replace"))
    }

    fn restart_unit(&self, unit: &str) -> Result<(), ServiceError> {
        self.run_job("RestartUnit", unit, |m| m.restart_unit(unit, "replace"))
    }

    fn enable_unit(&self, unit: &str) -> Result<(), ServiceError> {
        let manager = self.manager()?;
        let (_, changes) = manager.enable_unit_files(&[unit], false, true).map_err(|e| dbus_error(unit, e))?;
        debug!("EnableUnitFiles {}: {} change(s)", unit, changes.len());
        manager.reload().map_err(|e| ServiceError::Dbus(e.to_string()))
    }

    fn disable_unit(&self, unit: &str) -> Result<(), ServiceError> {
        let manager = self.manager()?;
        let changes = manager.disable_unit_files(&[unit], false).map_err(|e| dbus_error(unit, e))?;
        debug!("DisableUnitFiles {}: {} change(s)", unit, changes.len());
        manager.reload().map_err(|e| ServiceError::Dbus(e.to_string()))
    }

    fn unit_enabled(&self, unit: &str) -> Result<bool, ServiceError> {
        Self::enabled(self.manager()?, unit)
    }
}
