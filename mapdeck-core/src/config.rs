//! Overlay configuration props.
//!
//! Props arrive from the embedding application as a loose JSON object.
//! A handful of keys are owned by the bridge itself; everything else is
//! passed through to the engine untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Altitude synthesized for raster hosts, which expose no perspective
/// distance. Heuristic, not derived; override via `rasterAltitude`.
pub const DEFAULT_RASTER_ALTITUDE: f64 = 10_000.0;

/// CSS declarations applied to the engine's output container.
pub type Style = BTreeMap<String, String>;

/// Engine props the bridge manages itself. Callers cannot set them.
const RESERVED_KEYS: &[&str] = &[
    "width",
    "height",
    "gl",
    "deviceProps",
    "parent",
    "canvas",
    "viewState",
    "initialViewState",
    "controller",
    "_customRender",
];

/// Whether `key` is an engine prop the bridge manages itself.
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Config must be a JSON object, got {0}")]
    NotAnObject(&'static str),
    #[error("Config key `{key}` expects {expected}")]
    InvalidType {
        key: &'static str,
        expected: &'static str,
    },
    #[error("Style property `{0}` must be a string")]
    InvalidStyleValue(String),
}

/// Current configuration: user props merged over defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigProps {
    /// Share the host's graphics context when the host supports it.
    pub interleaved: bool,
    /// Presentation for the output container. Never forwarded to the engine.
    #[serde(default)]
    pub style: Style,
    pub raster_altitude: f64,
    /// Pass-through engine props.
    #[serde(flatten)]
    pub engine: Map<String, Value>,
}

impl Default for ConfigProps {
    fn default() -> Self {
        Self {
            interleaved: true,
            style: Style::new(),
            raster_altitude: DEFAULT_RASTER_ALTITUDE,
            engine: Map::new(),
        }
    }
}

impl ConfigProps {
    /// Defaults with `update` applied on top.
    pub fn with_update(update: &ConfigUpdate) -> Self {
        let mut props = Self::default();
        props.merge(update);
        props
    }

    /// Apply a partial update. Fields absent from `update` keep their value;
    /// a present `style` replaces the previous one wholesale.
    pub fn merge(&mut self, update: &ConfigUpdate) {
        if let Some(interleaved) = update.interleaved {
            self.interleaved = interleaved;
        }
        if let Some(style) = &update.style {
            self.style = style.clone();
        }
        if let Some(altitude) = update.raster_altitude {
            self.raster_altitude = altitude;
        }
        for (key, value) in &update.engine {
            if is_reserved_key(key) {
                log::warn!("Ignoring reserved engine prop `{key}`");
                continue;
            }
            self.engine.insert(key.clone(), value.clone());
        }
    }
}

/// A partial configuration update.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigUpdate {
    pub interleaved: Option<bool>,
    pub style: Option<Style>,
    pub raster_altitude: Option<f64>,
    pub engine: Map<String, Value>,
}

impl ConfigUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interleaved(mut self, interleaved: bool) -> Self {
        self.interleaved = Some(interleaved);
        self
    }

    pub fn style<K, V>(mut self, style: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.style = Some(
            style
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn raster_altitude(mut self, altitude: f64) -> Self {
        self.raster_altitude = Some(altitude);
        self
    }

    /// Add a pass-through engine prop. Reserved keys are dropped.
    pub fn engine_prop(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        if is_reserved_key(&key) {
            log::warn!("Ignoring reserved engine prop `{key}`");
        } else {
            self.engine.insert(key, value);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.interleaved.is_none()
            && self.style.is_none()
            && self.raster_altitude.is_none()
            && self.engine.is_empty()
    }

    /// Parse a props object as handed over by the embedding application.
    ///
    /// Recognized keys are type-checked; reserved engine keys are dropped
    /// with a warning; all other keys pass through.
    pub fn from_json(value: Value) -> Result<Self, ConfigError> {
        let object = match value {
            Value::Object(object) => object,
            other => return Err(ConfigError::NotAnObject(json_kind(&other))),
        };

        let mut update = Self::new();
        for (key, value) in object {
            match key.as_str() {
                "interleaved" => {
                    update.interleaved = Some(value.as_bool().ok_or(ConfigError::InvalidType {
                        key: "interleaved",
                        expected: "a boolean",
                    })?);
                }
                "rasterAltitude" => {
                    update.raster_altitude =
                        Some(value.as_f64().ok_or(ConfigError::InvalidType {
                            key: "rasterAltitude",
                            expected: "a number",
                        })?);
                }
                "style" => update.style = Some(parse_style(value)?),
                reserved if is_reserved_key(reserved) => {
                    log::warn!("Ignoring reserved engine prop `{reserved}`");
                }
                _ => {
                    update.engine.insert(key, value);
                }
            }
        }
        Ok(update)
    }
}

fn parse_style(value: Value) -> Result<Style, ConfigError> {
    let object = match value {
        Value::Object(object) => object,
        Value::Null => return Ok(Style::new()),
        _ => {
            return Err(ConfigError::InvalidType {
                key: "style",
                expected: "an object",
            })
        }
    };

    object
        .into_iter()
        .map(|(property, value)| match value {
            Value::String(s) => Ok((property, s)),
            Value::Number(n) => Ok((property, n.to_string())),
            _ => Err(ConfigError::InvalidStyleValue(property)),
        })
        .collect()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ===================================================================
// Tests
// ===================================================================
