//! Options projection with defaults.
//!
//! The `options` key holds whatever the options page last wrote, which may
//! be partial or come from an older version. [`Options`] fills every
//! missing or unreadable field with its default, so consumers never see a
//! half-configured value.

use crate::error::Result;
use crate::subscriptions::Watch;
use crate::surface::Surface;
use crate::types::{LogicalKey, SharedValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Colour theme of the extension UI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Theme {
    #[default]
    #[serde(rename = "DEFAULT")]
    Default,
    #[serde(rename = "DARK")]
    Dark,
}

/// User options, as stored under [`LogicalKey::Options`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    /// Jira user name.
    #[serde(deserialize_with = "or_default")]
    pub user: String,
    /// Personal access token.
    #[serde(deserialize_with = "or_default")]
    pub token: String,
    /// Base URL of the Jira REST API.
    #[serde(deserialize_with = "or_default")]
    pub domain: String,
    /// Tracked issue keys mapped to a display alias (empty for none).
    #[serde(deserialize_with = "or_default")]
    pub issues: BTreeMap<String, String>,
    #[serde(deserialize_with = "or_default")]
    pub autosync: bool,
    /// Show the in-page tracking overlay.
    #[serde(deserialize_with = "or_default")]
    pub overlay: bool,
    /// Weekdays the overlay is active on, 0 = Sunday.
    #[serde(deserialize_with = "or_default")]
    pub overlay_days: Vec<u8>,
    /// Active window as minutes since midnight, `[start, end]`.
    #[serde(deserialize_with = "or_default")]
    pub overlay_hours: [u32; 2],
    #[serde(deserialize_with = "or_default")]
    pub show_comments: bool,
    #[serde(deserialize_with = "or_default")]
    pub theme: Theme,
    #[serde(deserialize_with = "or_default")]
    pub workday_sync: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            user: String::new(),
            token: String::new(),
            domain: String::new(),
            issues: BTreeMap::new(),
            autosync: false,
            overlay: true,
            overlay_days: vec![1, 2, 3, 4, 5],
            overlay_hours: [9 * 60, 17 * 60],
            show_comments: false,
            theme: Theme::Default,
            workday_sync: false,
        }
    }
}

/// Deserialize a field, falling back to its type's default when the stored
/// value has the wrong shape.
///
/// The fallback is the type default, not the struct default, so callers
/// fix up struct-level defaults in [`Options::from_value`].
fn or_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

/// Whether `name` is present in `map` but does not decode as `T`.
fn malformed<T: DeserializeOwned>(
    map: &serde_json::Map<String, serde_json::Value>,
    name: &str,
) -> bool {
    map.get(name)
        .is_some_and(|value| T::deserialize(value).is_err())
}

impl Options {
    /// Build options from a stored value, filling in defaults.
    ///
    /// Fields that are absent take the default; fields present with the
    /// wrong type are reset to the default as well. A non-object value
    /// yields [`Options::default`].
    pub fn from_value(value: Option<&serde_json::Value>) -> Self {
        let defaults = Self::default();
        let Some(serde_json::Value::Object(map)) = value else {
            return defaults;
        };

        let mut options = Self::deserialize(&serde_json::Value::Object(map.clone()))
            .unwrap_or_else(|_| defaults.clone());

        // Malformed fields came back as the type default; restore the
        // struct default where the two differ.
        if malformed::<bool>(map, "overlay") {
            options.overlay = defaults.overlay;
        }
        if malformed::<Vec<u8>>(map, "overlayDays") {
            options.overlay_days = defaults.overlay_days.clone();
        }
        if malformed::<[u32; 2]>(map, "overlayHours") {
            options.overlay_hours = defaults.overlay_hours;
        }

        options
    }

    /// Whether enough is set to talk to Jira.
    pub fn is_configured(&self) -> bool {
        !self.user.is_empty() && !self.token.is_empty() && !self.domain.is_empty()
    }

    /// Whether the overlay should show on `weekday` (0 = Sunday) at
    /// `minute_of_day`.
    pub fn overlay_active_at(&self, weekday: u8, minute_of_day: u32) -> bool {
        let [start, end] = self.overlay_hours;
        self.overlay
            && self.overlay_days.contains(&weekday)
            && (start..end).contains(&minute_of_day)
    }
}

/// Read and write access to the options of one surface.
pub struct OptionsView<'a> {
    surface: &'a Surface,
}

impl<'a> OptionsView<'a> {
    pub fn new(surface: &'a Surface) -> Self {
        Self { surface }
    }

    /// Current options with defaults filled in.
    pub fn get(&self) -> Options {
        let stored: Option<SharedValue> = self.surface.read(LogicalKey::Options);
        Options::from_value(stored.as_deref())
    }

    /// Replace the stored options.
    pub fn set(&self, options: &Options) -> Result<()> {
        self.surface.write_as(LogicalKey::Options, options)
    }

    /// Shallow-merge `partial` (camelCase field names) over the stored
    /// options, or over the full defaults if none are stored yet.
    pub fn merge(&self, partial: serde_json::Value) -> Result<()> {
        let defaults = serde_json::to_value(Options::default())?;
        self.surface.merge_onto(LogicalKey::Options, partial, defaults)
    }

    /// Overwrite the stored options with the defaults.
    pub fn reset(&self) -> Result<()> {
        self.set(&Options::default())
    }

    /// Live feed of raw option changes; pass values through
    /// [`Options::from_value`].
    pub fn watch(&self) -> Result<Watch> {
        self.surface.watch(LogicalKey::Options)
    }
}

impl Surface {
    /// Options projection over this surface.
    pub fn options(&self) -> OptionsView<'_> {
        OptionsView::new(self)
    }
}
