//! Harness configuration
//!
//! Settings come from three layers, lowest precedence first: an optional TOML
//! file, the process environment, and command-line overrides. Validation runs
//! once over the merged result and reports every missing field together, so
//! the operator sees the whole problem before any network call is made.

use crate::identity::Credentials;
use serde::Deserialize;
use std::path::Path;

/// Timezone passed to the check-in procedure when none is configured
pub const DEFAULT_TIMEZONE: &str = "America/Montevideo";

/// Environment variable names
pub mod env {
    /// Backend base URL
    pub const URL: &str = "SUPABASE_URL";
    /// Public API key
    pub const ANON_KEY: &str = "SUPABASE_ANON_KEY";
    /// Staff sign-in email
    pub const STAFF_EMAIL: &str = "STAFF_EMAIL";
    /// Staff sign-in password
    pub const STAFF_PASSWORD: &str = "STAFF_PASSWORD";
    /// Non-staff sign-in email
    pub const NON_STAFF_EMAIL: &str = "NON_STAFF_EMAIL";
    /// Non-staff sign-in password
    pub const NON_STAFF_PASSWORD: &str = "NON_STAFF_PASSWORD";
    /// Athlete the checks write against
    pub const TEST_ATHLETE_ID: &str = "TEST_ATHLETE_ID";
    /// Weekly schedule used for slot assignments
    pub const TEST_WEEKLY_SCHEDULE_ID: &str = "TEST_WEEKLY_SCHEDULE_ID";
    /// Timezone for the check-in procedure
    pub const KIOSK_TIMEZONE: &str = "KIOSK_TIMEZONE";
    /// National id used by the check-in lookup
    pub const TEST_DNI: &str = "TEST_DNI";
    /// Phone number used by the check-in lookup
    pub const TEST_PHONE: &str = "TEST_PHONE";
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// One or more required settings are absent or empty
    #[error("Missing required configuration: {}", fields.join(", "))]
    Missing {
        /// Names of the missing settings
        fields: Vec<String>,
    },

    /// A setting is present but unusable
    #[error("Invalid configuration for {field}: {message}")]
    Invalid {
        /// Setting name
        field: String,
        /// What is wrong with it
        message: String,
    },

    /// The config file could not be read
    #[error("Failed to read config file {path}: {message}")]
    Read {
        /// File path
        path: String,
        /// I/O error message
        message: String,
    },

    /// The config file is not valid TOML for this layout
    #[error("Failed to parse config file {path}: {message}")]
    Parse {
        /// File path
        path: String,
        /// Parser error message
        message: String,
    },
}

impl ConfigError {
    /// Create a missing-fields error
    pub fn missing(fields: Vec<String>) -> Self {
        Self::Missing { fields }
    }

    /// Create an invalid-value error
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Fixture identifiers the checks write against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixtures {
    /// Athlete owning every row the harness creates
    pub athlete_id: String,
    /// Weekly schedule referenced by slot assignments
    pub weekly_schedule_id: String,
    /// National id for the check-in lookup
    pub dni: Option<String>,
    /// Phone number for the check-in lookup
    pub phone: Option<String>,
}

/// Names of the protected collections
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TableNames {
    /// Access-log entries written by the kiosk
    pub access_logs: String,
    /// Per-athlete monthly visit counters
    pub monthly_counters: String,
    /// Athlete to weekly-schedule slot assignments
    pub slot_assignments: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            access_logs: "access_logs".to_string(),
            monthly_counters: "athlete_monthly_counters".to_string(),
            slot_assignments: "schedule_slot_assignments".to_string(),
        }
    }
}

/// Fully validated configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Backend base URL
    pub backend_url: String,
    /// Public API key sent with every request
    pub api_key: String,
    /// Staff credentials
    pub staff: Credentials,
    /// Non-staff credentials
    pub non_staff: Credentials,
    /// Fixture identifiers
    pub fixtures: Fixtures,
    /// Timezone for the check-in procedure
    pub timezone: String,
    /// Protected collection names
    pub tables: TableNames,
}

impl HarnessConfig {
    /// Load from an optional file, the process environment, and a timezone flag
    pub fn load(path: Option<&Path>, timezone: Option<String>) -> Result<Self, ConfigError> {
        let raw = match path {
            Some(path) => RawConfig::from_file(path)?,
            None => RawConfig::default(),
        };
        raw.overlay_env(|key| std::env::var(key).ok())
            .with_timezone(timezone)
            .resolve()
    }
}

/// Unvalidated settings as read from any layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawConfig {
    /// `[backend]`
    pub backend: RawBackend,
    /// `[staff]`
    pub staff: RawCredentials,
    /// `[non_staff]`
    pub non_staff: RawCredentials,
    /// `[fixtures]`
    pub fixtures: RawFixtures,
    /// `[kiosk]`
    pub kiosk: RawKiosk,
    /// `[tables]`
    pub tables: TableNames,
}

/// `[backend]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawBackend {
    /// Base URL
    pub url: Option<String>,
    /// Public API key
    pub anon_key: Option<String>,
}

/// `[staff]` / `[non_staff]` sections
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawCredentials {
    /// Sign-in email
    pub email: Option<String>,
    /// Sign-in password
    pub password: Option<String>,
}

/// `[fixtures]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawFixtures {
    /// Test athlete
    pub athlete_id: Option<String>,
    /// Test weekly schedule
    pub weekly_schedule_id: Option<String>,
    /// National id for the check-in lookup
    pub dni: Option<String>,
    /// Phone number for the check-in lookup
    pub phone: Option<String>,
}

/// `[kiosk]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawKiosk {
    /// Check-in timezone
    pub timezone: Option<String>,
}

impl RawConfig {
    /// Parse a TOML document
    pub fn from_toml_str(source: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Read and parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&source, &path.display().to_string())
    }

    /// Override file values with whatever `lookup` finds
    ///
    /// Empty values are ignored so an exported-but-blank variable does not mask
    /// a value from the file.
    pub fn overlay_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let slots: [(&str, &mut Option<String>); 11] = [
            (env::URL, &mut self.backend.url),
            (env::ANON_KEY, &mut self.backend.anon_key),
            (env::STAFF_EMAIL, &mut self.staff.email),
            (env::STAFF_PASSWORD, &mut self.staff.password),
            (env::NON_STAFF_EMAIL, &mut self.non_staff.email),
            (env::NON_STAFF_PASSWORD, &mut self.non_staff.password),
            (env::TEST_ATHLETE_ID, &mut self.fixtures.athlete_id),
            (env::TEST_WEEKLY_SCHEDULE_ID, &mut self.fixtures.weekly_schedule_id),
            (env::KIOSK_TIMEZONE, &mut self.kiosk.timezone),
            (env::TEST_DNI, &mut self.fixtures.dni),
            (env::TEST_PHONE, &mut self.fixtures.phone),
        ];
        for (key, slot) in slots {
            if let Some(value) = get(key) {
                *slot = Some(value);
            }
        }
        self
    }

    /// Override the check-in timezone
    pub fn with_timezone(mut self, timezone: Option<String>) -> Self {
        if let Some(tz) = timezone {
            self.kiosk.timezone = Some(tz);
        }
        self
    }

    /// Validate and produce the final configuration
    pub fn resolve(self) -> Result<HarnessConfig, ConfigError> {
        let mut validator = ConfigValidator::default();
        let backend_url = validator.required(env::URL, self.backend.url);
        let api_key = validator.required(env::ANON_KEY, self.backend.anon_key);
        let staff_email = validator.required(env::STAFF_EMAIL, self.staff.email);
        let staff_password = validator.required(env::STAFF_PASSWORD, self.staff.password);
        let non_staff_email = validator.required(env::NON_STAFF_EMAIL, self.non_staff.email);
        let non_staff_password =
            validator.required(env::NON_STAFF_PASSWORD, self.non_staff.password);
        let athlete_id = validator.required(env::TEST_ATHLETE_ID, self.fixtures.athlete_id);
        let weekly_schedule_id = validator.required(
            env::TEST_WEEKLY_SCHEDULE_ID,
            self.fixtures.weekly_schedule_id,
        );
        validator.finish()?;

        if !(backend_url.starts_with("http://") || backend_url.starts_with("https://")) {
            return Err(ConfigError::invalid(
                env::URL,
                format!("expected an http(s) URL, got '{}'", backend_url),
            ));
        }

        Ok(HarnessConfig {
            backend_url,
            api_key,
            staff: Credentials::new(staff_email, staff_password),
            non_staff: Credentials::new(non_staff_email, non_staff_password),
            fixtures: Fixtures {
                athlete_id,
                weekly_schedule_id,
                dni: non_blank(self.fixtures.dni),
                phone: non_blank(self.fixtures.phone),
            },
            timezone: non_blank(self.kiosk.timezone)
                .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string()),
            tables: self.tables,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Collects missing required fields instead of stopping at the first one
#[derive(Debug, Default)]
struct ConfigValidator {
    missing: Vec<String>,
}

impl ConfigValidator {
    fn required(&mut self, field: &str, value: Option<String>) -> String {
        match non_blank(value) {
            Some(value) => value,
            None => {
                self.missing.push(field.to_string());
                String::new()
            }
        }
    }

    fn finish(self) -> Result<(), ConfigError> {
        if self.missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::missing(self.missing))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serial_test::serial;
    use std::collections::HashMap;
    use std::io::Write;

    fn full_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            (env::URL, "https://gym.supabase.co"),
            (env::ANON_KEY, "anon-key"),
            (env::STAFF_EMAIL, "staff@gym.test"),
            (env::STAFF_PASSWORD, "staff-pass"),
            (env::NON_STAFF_EMAIL, "kiosk@gym.test"),
            (env::NON_STAFF_PASSWORD, "kiosk-pass"),
            (env::TEST_ATHLETE_ID, "athlete-1"),
            (env::TEST_WEEKLY_SCHEDULE_ID, "schedule-1"),
        ])
    }

    fn resolve_with(vars: &HashMap<&'static str, &'static str>) -> Result<HarnessConfig, ConfigError> {
        RawConfig::default()
            .overlay_env(|key| vars.get(key).map(|v| v.to_string()))
            .resolve()
    }

    #[test]
    fn resolves_complete_environment_with_defaults() {
        let config = resolve_with(&full_env()).unwrap();
        assert_eq!(config.backend_url, "https://gym.supabase.co");
        assert_eq!(config.staff.email, "staff@gym.test");
        assert_eq!(config.non_staff.password, "kiosk-pass");
        assert_eq!(config.timezone, DEFAULT_TIMEZONE);
        assert_eq!(config.fixtures.dni, None);
        assert_eq!(config.fixtures.phone, None);
        assert_eq!(config.tables, TableNames::default());
    }

    #[test]
    fn reports_every_missing_field_at_once() {
        let mut vars = full_env();
        vars.remove(env::STAFF_PASSWORD);
        vars.remove(env::TEST_WEEKLY_SCHEDULE_ID);
        let err = resolve_with(&vars).unwrap_err();
        assert_eq!(
            err,
            ConfigError::missing(vec![
                env::STAFF_PASSWORD.to_string(),
                env::TEST_WEEKLY_SCHEDULE_ID.to_string(),
            ])
        );
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut vars = full_env();
        vars.insert(env::NON_STAFF_EMAIL, "   ");
        let err = resolve_with(&vars).unwrap_err();
        assert_matches!(err, ConfigError::Missing { fields } if fields == vec![env::NON_STAFF_EMAIL.to_string()]);
    }

    #[test]
    fn rejects_non_http_url() {
        let mut vars = full_env();
        vars.insert(env::URL, "gym.supabase.co");
        assert_matches!(resolve_with(&vars), Err(ConfigError::Invalid { field, .. }) if field == env::URL);
    }

    #[test]
    fn optional_lookup_fields_pass_through() {
        let mut vars = full_env();
        vars.insert(env::TEST_DNI, "12345678");
        vars.insert(env::KIOSK_TIMEZONE, "America/Argentina/Buenos_Aires");
        let config = resolve_with(&vars).unwrap();
        assert_eq!(config.fixtures.dni.as_deref(), Some("12345678"));
        assert_eq!(config.timezone, "America/Argentina/Buenos_Aires");
    }

    #[test]
    fn environment_overrides_file_and_flag_overrides_both() {
        let file = r#"
            [backend]
            url = "https://from-file.supabase.co"
            anon_key = "file-key"

            [kiosk]
            timezone = "UTC"

            [tables]
            access_logs = "kiosk_access_logs"
        "#;
        let raw = RawConfig::from_toml_str(file, "inline").unwrap();
        let vars = full_env();
        let config = raw
            .overlay_env(|key| vars.get(key).map(|v| v.to_string()))
            .with_timezone(Some("America/Santiago".to_string()))
            .resolve()
            .unwrap();
        assert_eq!(config.backend_url, "https://gym.supabase.co");
        assert_eq!(config.timezone, "America/Santiago");
        assert_eq!(config.tables.access_logs, "kiosk_access_logs");
        assert_eq!(config.tables.slot_assignments, "schedule_slot_assignments");
    }

    #[test]
    fn file_alone_can_satisfy_requirements() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [backend]
            url = "http://localhost:54321"
            anon_key = "local"
            [staff]
            email = "staff@gym.test"
            password = "s"
            [non_staff]
            email = "kiosk@gym.test"
            password = "k"
            [fixtures]
            athlete_id = "athlete-1"
            weekly_schedule_id = "schedule-1"
            phone = "+59899000000"
            "#
        )
        .unwrap();
        let config = RawConfig::from_file(file.path())
            .unwrap()
            .overlay_env(|_| None)
            .resolve()
            .unwrap();
        assert_eq!(config.backend_url, "http://localhost:54321");
        assert_eq!(config.fixtures.phone.as_deref(), Some("+59899000000"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = RawConfig::from_toml_str("[backend]\nendpoint = \"x\"\n", "inline").unwrap_err();
        assert_matches!(err, ConfigError::Parse { .. });
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = RawConfig::from_file(Path::new("/nonexistent/kiosk-rls.toml")).unwrap_err();
        assert_matches!(err, ConfigError::Read { .. });
    }

    #[test]
    #[serial]
    fn load_reads_process_environment() {
        let vars = full_env();
        for (key, value) in &vars {
            std::env::set_var(key, value);
        }
        let config = HarnessConfig::load(None, None);
        for key in vars.keys() {
            std::env::remove_var(key);
        }
        assert_eq!(config.unwrap().fixtures.athlete_id, "athlete-1");
    }

    #[test]
    #[serial]
    fn load_without_environment_reports_missing() {
        for key in full_env().keys() {
            std::env::remove_var(key);
        }
        assert_matches!(HarnessConfig::load(None, None), Err(ConfigError::Missing { fields }) if fields.len() == 8);
    }
}
