//! Screen type registry.
//!
//! A screen type is a kind of renderable content ("weather", "quote"). Each
//! one has a stable key, compiled-in default config, and the content
//! endpoint the renderer loads. The registry is built once at startup from
//! a fixed list and passed to the pipeline; nothing writes to it afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

/// Fallback screen for denials and failures.
pub const ERROR_SCREEN: &str = "fruitstand/error";

/// Fallback screen showing a pending device its approval code.
pub const APPROVAL_CODE_SCREEN: &str = "fruitstand/approval_code";

/// Descriptor of one registered screen type.
#[derive(Debug, Clone, PartialEq)]
pub struct ScreenType {
    pub key: String,
    pub title: String,
    pub description: Option<String>,
    /// Path of the content endpoint, relative to the server base URL
    pub endpoint: String,
    pub default_config: Map<String, Value>,
    /// System screens are fallbacks and never placed in playlists
    pub system: bool,
}

impl ScreenType {
    /// New screen type mounted at `/screens/render/<key>`.
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            endpoint: format!("/screens/render/{}", key),
            key,
            title: title.into(),
            description: None,
            default_config: Map::new(),
            system: false,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Add a compiled-in default config value.
    #[must_use]
    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.default_config.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }
}

/// Registered screen types by key.
#[derive(Debug, Clone, Default)]
pub struct ScreenRegistry {
    screens: HashMap<String, Arc<ScreenType>>,
}

impl ScreenRegistry {
    /// Empty registry. Most callers want [`ScreenRegistry::with_system_screens`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the error and approval-code fallback screens.
    pub fn with_system_screens() -> Self {
        let mut registry = Self::new();
        registry
            .register(
                ScreenType::new(ERROR_SCREEN, "Error")
                    .with_description("Render an error")
                    .system(),
            )
            .register(
                ScreenType::new(APPROVAL_CODE_SCREEN, "Approval Code")
                    .with_description("Render an approval code to screens that are pending approval")
                    .system(),
            );
        registry
    }

    /// System screens plus the content screens shipped with the crate.
    pub fn with_builtin_screens() -> Self {
        let mut registry = Self::with_system_screens();
        for screen in builtin_screens() {
            registry.register(screen);
        }
        registry
    }

    /// Add or replace a screen type.
    pub fn register(&mut self, screen: ScreenType) -> &mut Self {
        tracing::debug!(key = %screen.key, "registered screen type");
        self.screens.insert(screen.key.clone(), Arc::new(screen));
        self
    }

    pub fn get(&self, key: &str) -> Option<Arc<ScreenType>> {
        self.screens.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.screens.contains_key(key)
    }

    /// All screen types ordered by title, then key.
    pub fn screen_types(&self) -> Vec<Arc<ScreenType>> {
        let mut screens: Vec<Arc<ScreenType>> = self.screens.values().cloned().collect();
        screens.sort_by(|a, b| a.title.cmp(&b.title).then_with(|| a.key.cmp(&b.key)));
        screens
    }

    /// Screen types that may be placed in playlists.
    pub fn content_screen_types(&self) -> Vec<Arc<ScreenType>> {
        self.screen_types()
            .into_iter()
            .filter(|s| !s.system)
            .collect()
    }
}

/// Content screens shipped with the crate.
pub fn builtin_screens() -> Vec<ScreenType> {
    vec![
        ScreenType::new("fruitstand/zenquotes", "Zen Quotes")
            .with_description("Display a random quote from Zen Quotes")
            .with_default("mode", "random")
            .with_default("display_image", false),
        ScreenType::new("fruitstand/openweather", "OpenWeather")
            .with_description("Current conditions and forecast from OpenWeatherMap")
            .with_default("units", "imperial"),
        ScreenType::new("fruitstand/color_test", "Color Test")
            .with_description("Color bars for checking a panel's color spec"),
    ]
}
