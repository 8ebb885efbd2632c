// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Parsers for `systemctl` output
//!
//! `list-units --output=json` is tried first; older systemd builds ignore the
//! flag and print the fixed-width table, which is parsed column by column.

use serde::Deserialize;

use super::ServiceRecord;

pub const SERVICE_SUFFIX: &str = ".service";

/// One row of `systemctl list-units`, before enablement is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitRow {
    pub unit: String,
    pub description: String,
    pub load: String,
    pub active: String,
    pub sub: String,
}

impl UnitRow {
    pub fn into_record(self, enabled: bool) -> ServiceRecord {
        ServiceRecord {
            name: service_name(&self.unit).to_string(),
            description: self.description,
            load_state: self.load,
            active_state: self.active,
            sub_state: self.sub,
            enabled,
        }
    }
}

#[derive(Deserialize)]
struct JsonUnit {
    #[serde(default)]
    unit: String,
    description: Option<String>,
    load: Option<String>,
    active: Option<String>,
    sub: Option<String>,
}

/// Strip the `.service` suffix from a unit name
pub fn service_name(unit: &str) -> &str {
    unit.strip_suffix(SERVICE_SUFFIX).unwrap_or(unit)
}

/// Unit file states that count as "starts on boot"
pub fn is_enabled_state(state: &str) -> bool {
    matches!(state.trim(), "enabled" | "enabled-runtime" | "static")
}

/// Parse `systemctl list-units --output=json`
pub fn list_units_json(stdout: &str) -> Result<Vec<UnitRow>, serde_json::Error> {
    let units: Vec<JsonUnit> = serde_json::from_str(stdout)?;
    Ok(units.into_iter()
        .filter(|u| u.unit.ends_with(SERVICE_SUFFIX))
        .map(|u| UnitRow {
            unit: u.unit,
            description: u.description.unwrap_or_default(),
            load: u.load.unwrap_or_else(|| "unknown".to_string()),
            active: u.active.unwrap_or_else(|| "unknown".to_string()),
            sub: u.sub.unwrap_or_else(|| "unknown".to_string()),
        })
        .collect())
}

/// Parse the plain-text `systemctl list-units` table
///
/// Rows look like `● foo.service loaded failed failed Foo daemon`; the
/// leading marker only appears on failed units. The header, legend and
/// summary lines are skipped because their first column is not a unit.
pub fn list_units_text(stdout: &str) -> Vec<UnitRow> {
    stdout.lines()
        .filter_map(|line| {
            let line = line.trim_start().trim_start_matches(['●', '*']);
            let mut parts = line.split_whitespace();
            let unit = parts.next()?;
            if !unit.ends_with(SERVICE_SUFFIX) {
                return None;
            }
            let load = parts.next()?;
            let active = parts.next()?;
            let sub = parts.next()?;
            let description = parts.collect::<Vec<_>>().join(" ");
            Some(UnitRow {
                unit: unit.to_string(),
                description,
                load: load.to_string(),
                active: active.to_string(),
                sub: sub.to_string(),
            })
        })
        .collect()
}

/// `systemctl status` text reports a running unit as "Active: active (running)"
pub fn status_is_active(status_output: &str) -> bool {
    status_output.to_lowercase().contains("active (running)")
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_JSON: &str = r#"[
        {"unit":"ssh.service","load":"loaded","active":"active","sub":"running","description":"OpenBSD Secure Shell server"},
        {"unit":"cron.service","load":"loaded","active":"active","sub":"running","description":"Regular background program processing daemon"},
        {"unit":"auditd.service","load":"not-found","active":"inactive","sub":"dead"},
        {"unit":"dev-sda1.device","load":"loaded","active":"active","sub":"plugged","description":"disk"}
    ]"#;

    const LIST_TEXT: &str = "  UNIT                      LOAD      ACTIVE   SUB     DESCRIPTION
  cron.service              loaded    active   running Regular background program processing daemon
● apparmor.service          loaded    failed   failed  Load AppArmor profiles
  auditd.service            not-found inactive dead    auditd.service

LOAD   = Reflects whether the unit definition was properly loaded.
ACTIVE = The high-level unit activation state, i.e. generalization of SUB.
SUB    = The low-level unit activation state, values depend on unit type.

3 loaded units listed.
To show all installed unit files use 'systemctl list-unit-files'.
";

    #[test]
    fn json_rows_keep_only_services() {
        let rows = list_units_json(LIST_JSON).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].unit, "ssh.service");
        assert_eq!(rows[0].sub, "running");
        assert_eq!(rows[2].description, "");
        assert_eq!(rows[2].load, "not-found");
    }

    #[test]
    fn json_parse_rejects_text_output() {
        assert!(list_units_json(LIST_TEXT).is_err());
    }

    #[test]
    fn text_rows_parse_columns_and_failed_marker() {
        let rows = list_units_text(LIST_TEXT);
        let units: Vec<&str> = rows.iter().map(|r| r.unit.as_str()).collect();
        assert_eq!(units, ["cron.service", "apparmor.service", "auditd.service"]);

        assert_eq!(rows[0].description, "Regular background program processing daemon");
        assert_eq!(rows[1].active, "failed");
        assert_eq!(rows[1].sub, "failed");
        assert_eq!(rows[2].load, "not-found");
        assert_eq!(rows[2].description, "auditd.service");
    }

    #[test]
    fn text_rows_need_four_columns() {
        assert!(list_units_text("broken.service loaded active\n").is_empty());
        let rows = list_units_text("bare.service loaded active exited\n");
        assert_eq!(rows[0].description, "");
    }

    #[test]
    fn record_strips_suffix() {
        let row = list_units_text("nginx.service loaded active running A high performance web server\n")
            .remove(0);
        let record = row.into_record(true);
        assert_eq!(record.name, "nginx");
        assert_eq!(record.description, "A high performance web server");
        assert!(record.enabled);
    }

    #[test]
    fn enabled_states() {
        assert!(is_enabled_state("enabled\n"));
        assert!(is_enabled_state("enabled-runtime"));
        assert!(is_enabled_state("static"));
        assert!(!is_enabled_state("disabled"));
        assert!(!is_enabled_state("masked"));
        assert!(!is_enabled_state(""));
    }

    #[test]
    fn active_detection_is_case_insensitive() {
        assert!(status_is_active("● nginx.service\n     Active: Active (Running) since Mon"));
        assert!(!status_is_active("     Active: inactive (dead)"));
        assert!(!status_is_active("Unit foo.service could not be found."));
    }
}
