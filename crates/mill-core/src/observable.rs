//! Observable values and dialog settings.
//!
//! An [`Observable`] wraps a `tokio::sync::watch` channel. Every piece of
//! shared mutable state goes through one: dialog settings, stream flags,
//! the active tab, the feature list and the status of each feature.
//! Clones share the channel, so a setting handed to a dialog and the copy
//! kept by a plugin always agree.
//!
//! Writes through [`Observable::set`] are checked against the observable's
//! checks (range, choices, custom rules). [`Observable::update`] edits in
//! place without checks and is meant for lists and internal flags.
//!
//! ```rust
//! use mill_core::observable::Observable;
//!
//! let dz = Observable::new("dz", 50e-6)
//!     .with_units("m")
//!     .with_range(10e-6, 200e-6);
//!
//! assert!(dz.set(100e-6).is_ok());
//! assert!(dz.set(1e-3).is_err());
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

type Check<T> = Arc<dyn Fn(&T) -> Result<()> + Send + Sync>;

/// A labelled allowed value of an enumerated setting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    /// Value as JSON
    pub value: serde_json::Value,
    /// Text shown to the operator
    pub label: String,
}

/// What a dialog needs to present a setting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettingInfo {
    /// Key of the setting within its dialog
    pub name: String,
    /// Text shown instead of the name
    pub label: Option<String>,
    /// Units, e.g. "m" or "deg"
    pub units: Option<String>,
    /// Inclusive bounds, as JSON
    pub range: Option<(serde_json::Value, serde_json::Value)>,
    /// Allowed values; empty when any value is accepted
    pub choices: Vec<Choice>,
}

/// A setting seen without its value type.
pub trait Setting: Send + Sync {
    /// Presentation details.
    fn info(&self) -> &SettingInfo;

    /// Current value as JSON.
    fn value_json(&self) -> Result<serde_json::Value>;

    /// Decode `value` and store it, running the checks.
    fn set_json(&self, value: serde_json::Value) -> Result<()>;

    /// Key of the setting.
    fn name(&self) -> &str {
        &self.info().name
    }
}

/// A [`Setting`] that can be downcast back to its concrete type.
pub trait AnySetting: Setting {
    /// `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;
}

/// A shared value with change notification.
pub struct Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    tx: watch::Sender<T>,
    info: SettingInfo,
    checks: Vec<Check<T>>,
}

impl<T> Clone for Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            info: self.info.clone(),
            checks: self.checks.clone(),
        }
    }
}

impl<T> fmt::Debug for Observable<T>
where
    T: Clone + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observable({} = {:?})", self.info.name, *self.tx.borrow())
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Observable called `name` starting at `value`.
    pub fn new(name: impl Into<String>, value: T) -> Self {
        Self {
            tx: watch::channel(value).0,
            info: SettingInfo {
                name: name.into(),
                ..SettingInfo::default()
            },
            checks: Vec::new(),
        }
    }

    /// Operator-facing label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.info.label = Some(label.into());
        self
    }

    /// Physical units.
    pub fn with_units(mut self, units: impl Into<String>) -> Self {
        self.info.units = Some(units.into());
        self
    }

    /// Extra rule checked on every [`set`](Self::set), after the others.
    pub fn with_validator<F>(mut self, check: F) -> Self
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.checks.push(Arc::new(check));
        self
    }

    /// Name of the observable.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Presentation details.
    pub fn info(&self) -> &SettingInfo {
        &self.info
    }

    /// A copy of the current value.
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Check and store `value`. On error the previous value is kept.
    pub fn set(&self, value: T) -> Result<()> {
        self.checks.iter().try_for_each(|check| check(&value))?;
        self.tx.send_replace(value);
        Ok(())
    }

    /// Edit the value in place, without checks.
    pub fn update<F>(&self, edit: F)
    where
        F: FnOnce(&mut T),
    {
        self.tx.send_modify(edit);
    }

    /// Receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + PartialOrd + fmt::Debug + Serialize + 'static,
{
    /// Accept only values within `[low, high]`.
    pub fn with_range(mut self, low: T, high: T) -> Self {
        self.info.range = match (serde_json::to_value(&low), serde_json::to_value(&high)) {
            (Ok(l), Ok(h)) => Some((l, h)),
            _ => None,
        };
        let name = self.info.name.clone();
        self.with_validator(move |value| {
            if *value < low || *value > high {
                return Err(anyhow!(
                    "{name} = {value:?} is outside [{low:?}, {high:?}]"
                ));
            }
            Ok(())
        })
    }
}

impl<T> Observable<T>
where
    T: Clone + Send + Sync + PartialEq + fmt::Debug + Serialize + 'static,
{
    /// Accept only the listed values; labels are shown to the operator.
    pub fn with_choices<L: Into<String>>(mut self, choices: Vec<(T, L)>) -> Self {
        let mut allowed = Vec::with_capacity(choices.len());
        for (value, label) in choices {
            if let Ok(json) = serde_json::to_value(&value) {
                self.info.choices.push(Choice {
                    value: json,
                    label: label.into(),
                });
            }
            allowed.push(value);
        }
        let name = self.info.name.clone();
        self.with_validator(move |value| {
            if allowed.contains(value) {
                Ok(())
            } else {
                Err(anyhow!("{value:?} is not one of the choices of {name}"))
            }
        })
    }
}

impl<T> Setting for Observable<T>
where
    T: Clone + Send + Sync + Serialize + for<'de> Deserialize<'de> + 'static,
{
    fn info(&self) -> &SettingInfo {
        &self.info
    }

    fn value_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.get())?)
    }

    fn set_json(&self, value: serde_json::Value) -> Result<()> {
        let decoded = serde_json::from_value::<T>(value).map_err(|e| {
            anyhow!(
                "cannot decode {} as {}: {e}",
                self.info.name,
                std::any::type_name::<T>()
            )
        })?;
        self.set(decoded)
    }
}

impl<T> AnySetting for Observable<T>
where
    T: Clone + Send + Sync + Serialize + for<'de> Deserialize<'de> + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Settings of a dialog, in display order.
#[derive(Default)]
pub struct SettingSet {
    entries: Vec<Box<dyn AnySetting>>,
}

impl fmt::Debug for SettingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl SettingSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `setting`, or replace the one with the same name where it stands.
    pub fn register<S>(&mut self, setting: S)
    where
        S: AnySetting + 'static,
    {
        let position = self.entries.iter().position(|s| s.name() == setting.name());
        let boxed = Box::new(setting);
        match position {
            Some(i) => self.entries[i] = boxed,
            None => self.entries.push(boxed),
        }
    }

    /// Setting `name`, type-erased.
    pub fn get(&self, name: &str) -> Option<&dyn Setting> {
        self.iter().find(|s| s.name() == name)
    }

    /// Setting `name` as its concrete type.
    pub fn get_typed<S: AnySetting + 'static>(&self, name: &str) -> Option<&S> {
        self.entries
            .iter()
            .find(|s| s.name() == name)
            .and_then(|s| s.as_any().downcast_ref())
    }

    /// Settings in display order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn Setting> {
        self.entries.iter().map(|s| s.as_ref() as &dyn Setting)
    }

    /// Names in display order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|s| s.name()).collect()
    }

    /// Number of settings.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clones_see_the_same_status() {
        let status = Observable::new("status", "Active".to_string());
        let held_by_sequencer = status.clone();

        held_by_sequencer.set("Rough Milled".to_string()).unwrap();
        assert_eq!(status.get(), "Rough Milled");
    }

    #[test]
    fn dz_range_is_enforced() {
        let dz = Observable::new("dz", 50e-6).with_units("m").with_range(10e-6, 200e-6);

        assert!(dz.set(5e-6).is_err());
        assert!(dz.set(1e-3).is_err());
        assert_eq!(dz.get(), 50e-6);
        dz.set(200e-6).unwrap();
        assert_eq!(dz.info().range, Some((json!(10e-6), json!(200e-6))));
    }

    #[test]
    fn action_choices() {
        let act = Observable::new("act", 1usize)
            .with_label("Action")
            .with_choices(vec![(0, "Relief cuts"), (1, "Rough milling"), (2, "RC & RM")]);

        act.set(2).unwrap();
        assert!(act.set(5).is_err());
        assert_eq!(act.get(), 2);
        assert_eq!(act.info().choices[0].label, "Relief cuts");
        assert_eq!(act.info().choices[2].value, json!(2));
    }

    #[test]
    fn custom_rules_run_after_the_range() {
        let rz = Observable::new("rz", 0.0)
            .with_range(-180.0, 180.0)
            .with_validator(|deg: &f64| {
                if deg.is_nan() {
                    Err(anyhow!("rz is not a number"))
                } else {
                    Ok(())
                }
            });

        assert!(rz.set(f64::NAN).is_err());
        assert!(rz.set(200.0).is_err());
        rz.set(-90.0).unwrap();
    }

    #[test]
    fn update_skips_checks() {
        let tabs = Observable::new("tabs", vec!["secom_live".to_string()])
            .with_validator(|tabs: &Vec<String>| {
                if tabs.is_empty() {
                    Err(anyhow!("no tab"))
                } else {
                    Ok(())
                }
            });
        assert!(tabs.set(Vec::new()).is_err());
        tabs.update(Vec::clear);
        assert!(tabs.get().is_empty());
    }

    #[tokio::test]
    async fn subscribers_wake_on_change() {
        let should_update = Observable::new("should_update", false);
        let mut rx = should_update.subscribe();

        should_update.set(true).unwrap();
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());
    }

    #[test]
    fn json_round_trip_through_the_trait() {
        let z = Observable::new("z", 1e-3);
        let setting: &dyn Setting = &z;

        assert_eq!(setting.value_json().unwrap(), json!(1e-3));
        setting.set_json(json!(2e-3)).unwrap();
        assert_eq!(z.get(), 2e-3);
        let err = setting.set_json(json!("up")).unwrap_err();
        assert!(err.to_string().contains("cannot decode z"));
    }

    #[test]
    fn setting_set_order_and_replacement() {
        let mut settings = SettingSet::new();
        for name in ["rx", "rz", "x", "y", "z", "dz"] {
            settings.register(Observable::new(name, 0.0));
        }
        settings.register(Observable::new("rz", 12.0));

        assert_eq!(settings.names(), vec!["rx", "rz", "x", "y", "z", "dz"]);
        assert_eq!(settings.get_typed::<Observable<f64>>("rz").unwrap().get(), 12.0);
        assert!(settings.get_typed::<Observable<usize>>("rz").is_none());
        assert!(settings.get("missing").is_none());
    }

    #[test]
    fn set_edits_the_shared_value() {
        let act = Observable::new("act", 0usize).with_choices(vec![(0, "a"), (1, "b")]);
        let mut settings = SettingSet::new();
        settings.register(act.clone());

        settings.get("act").unwrap().set_json(json!(1)).unwrap();
        assert_eq!(act.get(), 1);
    }
}
