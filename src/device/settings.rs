//! Declarative validation of camera settings maps.
//!
//! Each driver describes the keys it understands with a table of
//! [`SettingSpec`]s. [`validate_settings`] checks a whole map against that
//! table before anything is applied, so a rejected `configure()` never leaves
//! the driver half-updated.

use super::SettingsMap;
use crate::error::{RigError, RigResult};
use serde_json::Value;

/// Accepted shape of one setting.
#[derive(Debug, Clone, Copy)]
pub enum SettingKind {
    /// Whole number in `min..=max`
    Integer { min: u64, max: u64 },
    Float { min: f64, max: f64 },
    /// One of a fixed set of strings
    Choice(&'static [&'static str]),
}

/// A setting understood by a driver.
#[derive(Debug, Clone, Copy)]
pub struct SettingSpec {
    pub name: &'static str,
    pub kind: SettingKind,
}

impl SettingSpec {
    pub const fn integer(name: &'static str, min: u64, max: u64) -> Self {
        Self {
            name,
            kind: SettingKind::Integer { min, max },
        }
    }

    pub const fn float(name: &'static str, min: f64, max: f64) -> Self {
        Self {
            name,
            kind: SettingKind::Float { min, max },
        }
    }

    pub const fn choice(name: &'static str, choices: &'static [&'static str]) -> Self {
        Self {
            name,
            kind: SettingKind::Choice(choices),
        }
    }

    fn check(&self, value: &Value) -> Result<(), String> {
        match self.kind {
            SettingKind::Integer { min, max } => match value.as_u64() {
                Some(v) if (min..=max).contains(&v) => Ok(()),
                Some(v) => Err(format!("{} out of range [{}, {}]", v, min, max)),
                None => Err(format!("expected an integer, got {}", value)),
            },
            SettingKind::Float { min, max } => match value.as_f64() {
                Some(v) if v >= min && v <= max => Ok(()),
                Some(v) => Err(format!("{} out of range [{}, {}]", v, min, max)),
                None => Err(format!("expected a number, got {}", value)),
            },
            SettingKind::Choice(choices) => match value.as_str() {
                Some(v) if choices.contains(&v) => Ok(()),
                _ => Err(format!("expected one of {}, got {}", choices.join("|"), value)),
            },
        }
    }
}

/// Validate every entry of `settings` against `specs`.
pub fn validate_settings(
    driver: &str,
    specs: &[SettingSpec],
    settings: &SettingsMap,
) -> RigResult<()> {
    for (key, value) in settings {
        let spec = specs.iter().find(|s| s.name == key).ok_or_else(|| {
            RigError::operation("configure", format!("{}: unsupported setting '{}'", driver, key))
        })?;
        spec.check(value).map_err(|reason| {
            RigError::operation("configure", format!("{}: setting '{}': {}", driver, key, reason))
        })?;
    }
    Ok(())
}

/// Integer setting, or `default` when absent or malformed.
pub fn get_u64(settings: &SettingsMap, key: &str, default: u64) -> u64 {
    settings.get(key).and_then(Value::as_u64).unwrap_or(default)
}

/// Float setting, or `default` when absent or malformed.
pub fn get_f64(settings: &SettingsMap, key: &str, default: f64) -> f64 {
    settings.get(key).and_then(Value::as_f64).unwrap_or(default)
}

/// String setting, or `default` when absent or malformed.
pub fn get_str<'a>(settings: &'a SettingsMap, key: &str, default: &'a str) -> &'a str {
    settings.get(key).and_then(Value::as_str).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SPECS: &[SettingSpec] = &[
        SettingSpec::integer("exposure_us", 1, 1_000),
        SettingSpec::float("gain", 1.0, 16.0),
        SettingSpec::choice("awb", &["auto", "daylight"]),
    ];

    fn map(pairs: &[(&str, Value)]) -> SettingsMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_accepts_valid_map() {
        let settings = map(&[
            ("exposure_us", json!(500)),
            ("gain", json!(2.5)),
            ("awb", json!("daylight")),
        ]);
        assert!(validate_settings("test", SPECS, &settings).is_ok());
    }

    #[test]
    fn test_rejects_unknown_key() {
        let err = validate_settings("test", SPECS, &map(&[("iso", json!(800))])).unwrap_err();
        assert!(err.to_string().contains("unsupported setting 'iso'"));
    }

    #[test]
    fn test_rejects_out_of_range_and_wrong_type() {
        assert!(validate_settings("test", SPECS, &map(&[("exposure_us", json!(0))])).is_err());
        assert!(validate_settings("test", SPECS, &map(&[("gain", json!("high"))])).is_err());
        assert!(validate_settings("test", SPECS, &map(&[("awb", json!("tungsten"))])).is_err());
    }

    #[test]
    fn test_getters_fall_back() {
        let settings = map(&[("gain", json!(4.0))]);
        assert_eq!(get_f64(&settings, "gain", 1.0), 4.0);
        assert_eq!(get_u64(&settings, "width", 640), 640);
        assert_eq!(get_str(&settings, "awb", "auto"), "auto");
    }
}
