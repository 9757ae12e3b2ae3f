//! Built-in plugins.
//!
//! A small manifest of generic plugins, enough to run rules and activities
//! end to end: `time` and `weekday` reporters, `tautology` and
//! `time_interval` checkers, `notify` and `track` fixers. The fixers only
//! log; desktop integrations register their own plugins next to these.

use chrono::{Datelike, Local, NaiveTime, Weekday};
use serde_json::{json, Value};

use crate::error::PluginError;
use crate::plugin::{plugin_fn, CallArgs, PluginDescriptor, PluginRegistry};

/// Register every built-in plugin.
///
/// # Errors
///
/// `Duplicate` if one of the identifiers is already taken.
pub fn register_all(registry: &mut PluginRegistry) -> Result<(), PluginError> {
    registry.register(PluginDescriptor::reporter("time"), || {
        plugin_fn(|_| Ok(json!(Local::now().format("%H:%M").to_string())))
    })?;

    registry.register(PluginDescriptor::reporter("weekday"), || {
        plugin_fn(|_| Ok(json!(weekday_name(Local::now().weekday()))))
    })?;

    registry.register(PluginDescriptor::checker("tautology"), || plugin_fn(|_| Ok(json!(true))))?;

    registry.register(PluginDescriptor::checker("time_interval"), || plugin_fn(time_interval))?;

    registry.register(PluginDescriptor::fixer("notify"), || {
        plugin_fn(|call| {
            let message = call.require_str("notify", "message")?;
            let headline = call.get("headline").and_then(Value::as_str).unwrap_or("Actor");
            tracing::info!(headline, message, "notification");
            Ok(Value::Null)
        })
    })?;

    registry.register(PluginDescriptor::fixer("track"), || {
        plugin_fn(|call| {
            let activity = call.require_str("track", "activity")?;
            tracing::info!(activity, "tracking");
            Ok(Value::Null)
        })
    })?;

    Ok(())
}

/// A registry holding only the built-in plugins.
///
/// # Errors
///
/// Never in practice; registration into an empty registry cannot clash.
pub fn registry() -> Result<PluginRegistry, PluginError> {
    let mut registry = PluginRegistry::new();
    register_all(&mut registry)?;
    Ok(registry)
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Parse `HH:MM`, `HH.MM` or `HH:MM:SS`.
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    ["%H:%M:%S", "%H:%M", "%H.%M"]
        .iter()
        .find_map(|format| NaiveTime::parse_from_str(value.trim(), format).ok())
}

/// Whether `time` lies in `[start, end)`. An interval whose start is later
/// than its end wraps past midnight.
pub fn in_interval(time: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        start <= time && time < end
    } else {
        time >= start || time < end
    }
}

fn time_interval(call: &CallArgs) -> Result<Value, PluginError> {
    let time_arg = |key: &str| -> Result<NaiveTime, PluginError> {
        let raw = call.require_str("time_interval", key)?;
        parse_time(raw).ok_or_else(|| PluginError::InvalidArgument {
            identifier: "time_interval".to_string(),
            name: key.to_string(),
            message: format!("'{raw}' is not a time of day"),
        })
    };

    let start = time_arg("start")?;
    let end = time_arg("end")?;
    let time = time_arg("time")?;
    Ok(json!(in_interval(time, start, end)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Capability;

    fn t(s: &str) -> NaiveTime {
        parse_time(s).unwrap()
    }

    #[test]
    fn interval_is_half_open() {
        assert!(in_interval(t("10:00"), t("10:00"), t("12:00")));
        assert!(in_interval(t("11:59:59"), t("10:00"), t("12:00")));
        assert!(!in_interval(t("12:00"), t("10:00"), t("12:00")));
        assert!(!in_interval(t("09:59"), t("10:00"), t("12:00")));
    }

    #[test]
    fn interval_wraps_midnight() {
        assert!(in_interval(t("23:30"), t("22:00"), t("06:00")));
        assert!(in_interval(t("05:00"), t("22:00"), t("06:00")));
        assert!(!in_interval(t("12:00"), t("22:00"), t("06:00")));
    }

    #[test]
    fn parses_dotted_times() {
        assert_eq!(t("7.30"), t("07:30"));
        assert!(parse_time("noon").is_none());
    }

    #[test]
    fn time_interval_plugin_reads_kwargs() {
        let call = CallArgs::new()
            .kwarg("start", "22:00")
            .kwarg("end", "23:59")
            .kwarg("time", "22:15");
        assert_eq!(time_interval(&call).unwrap(), json!(true));

        let bad = CallArgs::new().kwarg("start", "22:00").kwarg("end", "late").kwarg("time", "22:15");
        assert!(matches!(time_interval(&bad), Err(PluginError::InvalidArgument { .. })));
    }

    #[test]
    fn manifest_registers_every_plugin() {
        let registry = registry().unwrap();
        assert_eq!(registry.identifiers(Capability::Reporter), vec!["time", "weekday"]);
        assert_eq!(registry.identifiers(Capability::Checker), vec!["tautology", "time_interval"]);
        assert_eq!(registry.identifiers(Capability::Fixer), vec!["notify", "track"]);

        let fixer = registry.resolve(Capability::Fixer, "notify").unwrap();
        assert!(fixer.descriptor.side_effects);
        let mut notify = fixer.instantiate();
        assert!(notify.run(&CallArgs::new().kwarg("message", "hi")).is_ok());
        assert!(notify.run(&CallArgs::new()).is_err());
    }
}
