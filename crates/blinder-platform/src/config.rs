//! Configuration records for the platform and the filter engine.
//!
//! Everything here is plain serde data: the CLI reads it from `blinder.toml`,
//! and the script side receives `AppInfo` and `FilterEngineParams` as JSON.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use blinder_engine::SessionOptions;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Identity of the embedding application, exposed to script as `_appInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppInfo {
    pub id: String,
    pub version: String,
    pub name: String,
    pub application: String,
    pub application_version: String,
    pub locale: String,
    pub development_build: bool,
}

impl Default for AppInfo {
    fn default() -> Self {
        Self {
            id: String::new(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            name: "blinder".to_owned(),
            application: "standalone".to_owned(),
            application_version: env!("CARGO_PKG_VERSION").to_owned(),
            locale: "en-US".to_owned(),
            development_build: false,
        }
    }
}

/// Boolean preferences that can be preset before the filter engine starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BooleanPrefName {
    FirstRunSubscriptionAutoselect,
}

impl BooleanPrefName {
    /// Name of the preference on the script side.
    pub fn script_name(self) -> &'static str {
        match self {
            Self::FirstRunSubscriptionAutoselect => "first_run_subscription_auto_select",
        }
    }
}

/// String preferences that can be preset before the filter engine starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringPrefName {
    AllowedConnectionType,
}

impl StringPrefName {
    pub fn script_name(self) -> &'static str {
        match self {
            Self::AllowedConnectionType => "allowed_connection_type",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreconfiguredPrefs {
    pub boolean_prefs: BTreeMap<BooleanPrefName, bool>,
    pub string_prefs: BTreeMap<StringPrefName, String>,
}

impl PreconfiguredPrefs {
    /// Flat map keyed by script-side preference names.
    pub fn to_json(&self) -> serde_json::Value {
        let mut prefs = serde_json::Map::new();
        for (name, value) in &self.boolean_prefs {
            prefs.insert(name.script_name().to_owned(), json!(value));
        }
        for (name, value) in &self.string_prefs {
            prefs.insert(name.script_name().to_owned(), json!(value));
        }
        serde_json::Value::Object(prefs)
    }
}

/// Parameters handed to the script-side filter engine factory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterEngineParams {
    pub preconfigured_prefs: PreconfiguredPrefs,
}

impl FilterEngineParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boolean_pref(mut self, name: BooleanPrefName, value: bool) -> Self {
        self.preconfigured_prefs.boolean_prefs.insert(name, value);
        self
    }

    pub fn string_pref(mut self, name: StringPrefName, value: impl Into<String>) -> Self {
        self.preconfigured_prefs
            .string_prefs
            .insert(name, value.into());
        self
    }

    /// The factory's `params` argument.
    pub fn to_json(&self, app_info: &AppInfo) -> serde_json::Value {
        json!({
            "preconfiguredPrefs": self.preconfigured_prefs.to_json(),
            "appInfo": app_info,
        })
    }
}

/// Platform-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Worker threads of the default executor
    pub executor_threads: usize,
    /// Script sources evaluated, in order, before the factory is called
    pub bootstrap_sources: Vec<String>,
    /// Global function that constructs the filter engine
    pub factory_function: String,
    /// How long the factory may take to report back, in milliseconds
    pub construction_timeout_ms: u64,
    /// Base directory of the default file system
    pub base_path: PathBuf,
    /// Runtime limits for the engine session
    pub session: SessionOptions,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            executor_threads: num_cpus::get().max(1),
            bootstrap_sources: vec!["compat.js".to_owned(), "filter-engine.js".to_owned()],
            factory_function: "_createFilterEngine".to_owned(),
            construction_timeout_ms: 30_000,
            base_path: PathBuf::new(),
            session: SessionOptions::default(),
        }
    }
}

impl PlatformConfig {
    pub fn construction_timeout(&self) -> Duration {
        Duration::from_millis(self.construction_timeout_ms)
    }

    pub fn bootstrap_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bootstrap_sources = sources.into_iter().map(Into::into).collect();
        self
    }

    pub fn factory_function(mut self, name: impl Into<String>) -> Self {
        self.factory_function = name.into();
        self
    }

    pub fn with_construction_timeout(mut self, timeout: Duration) -> Self {
        self.construction_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn executor_threads(mut self, threads: usize) -> Self {
        self.executor_threads = threads.max(1);
        self
    }

    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = path.into();
        self
    }
}
