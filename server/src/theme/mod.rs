//! Theme projection onto presentation variables.
//!
//! The applicator maps the visual fields of a `SiteConfig` onto a fixed set of
//! named CSS custom properties. Values are passed through as-is; the last
//! applied configuration wins.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::site::SiteConfig;

/// Variable names set by every projection
pub const THEME_VARIABLES: [&str; 11] = [
    "--color-primary",
    "--color-secondary",
    "--color-accent",
    "--color-background",
    "--color-text",
    "--color-header-bg",
    "--color-footer-bg",
    "--particles-color",
    "--stars-color",
    "--gradient-start",
    "--gradient-end",
];

/// Pure projection of a configuration onto the theme variables
pub fn project(config: &SiteConfig) -> BTreeMap<&'static str, String> {
    let values = [
        &config.primary_color,
        &config.secondary_color,
        &config.accent_color,
        &config.background_color,
        &config.text_color,
        &config.header_bg_color,
        &config.footer_bg_color,
        &config.particles_color,
        &config.stars_color,
        &config.gradient_start_color,
        &config.gradient_end_color,
    ];

    THEME_VARIABLES
        .iter()
        .zip(values)
        .map(|(name, value)| (*name, value.clone()))
        .collect()
}

/// Process-wide holder of the current presentation variables
#[derive(Debug, Default)]
pub struct ThemeApplicator {
    variables: RwLock<BTreeMap<&'static str, String>>,
    site_name: RwLock<Option<String>>,
}

impl ThemeApplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current variables with the projection of `config`
    pub fn apply(&self, config: &SiteConfig) {
        *self.variables.write() = project(config);
        *self.site_name.write() = Some(config.site_name.clone());
        tracing::debug!("Theme applied: {}", config.site_name);
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.variables.read().get(name).cloned()
    }

    pub fn variables(&self) -> BTreeMap<&'static str, String> {
        self.variables.read().clone()
    }

    /// Whether any configuration has been applied yet
    pub fn is_applied(&self) -> bool {
        self.site_name.read().is_some()
    }

    /// Render the variables as a `:root` stylesheet
    pub fn to_css(&self) -> String {
        let variables = self.variables.read();
        let mut css = String::from(":root {\n");
        for (name, value) in variables.iter() {
            // Values are uninterpreted; only strip what would end the declaration
            let value: String = value.chars().filter(|c| !matches!(c, ';' | '{' | '}')).collect();
            let _ = writeln!(css, "  {}: {};", name, value.trim());
        }
        css.push_str("}\n");
        css
    }
}
