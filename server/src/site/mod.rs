//! Site configuration model.
//!
//! This module defines the single configuration entity of the storefront:
//! - `SiteConfig`: theme, typography, content copy, contact, commerce and
//!   visual-effect settings, always fully populated
//! - `SiteConfigPatch`: a field mask used for merge-not-replace updates
//! - `ConfigVersion`: immutable numbered snapshots forming the audit trail

mod patch;
mod version;

pub use patch::SiteConfigPatch;
pub use version::{ConfigVersion, VersionSummary};

use serde::{Deserialize, Serialize};

/// Identifier of the administrative identity owning a configuration lineage
pub type OwnerId = String;

/// Complete storefront configuration.
///
/// Absent fields are filled from [`SiteConfig::default`] on deserialization, so a
/// stored row or cached entry written by an older build still reads back fully
/// populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Opaque record id (assigned by the repository)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Owning identity (none for the public default)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<OwnerId>,

    // Colors
    pub primary_color: String,
    pub secondary_color: String,
    pub accent_color: String,
    pub background_color: String,
    pub text_color: String,
    pub header_bg_color: String,
    pub footer_bg_color: String,

    // Content
    pub site_name: String,
    pub site_slogan: String,
    pub home_hero_title: String,
    pub home_hero_subtitle: String,
    pub about_title: String,
    pub about_description: String,

    // Contact
    pub contact_email: String,
    pub contact_phone: String,
    pub contact_address: String,
    pub facebook_url: String,
    pub instagram_url: String,
    pub twitter_url: String,

    // Commerce
    pub shipping_cost: f64,
    pub free_shipping_threshold: f64,
    pub order_processing_days: u32,
    pub custom_order_delay_days: u32,
    pub show_prices: bool,
    pub allow_custom_orders: bool,

    // Background animations
    pub enable_particles: bool,
    pub particles_color: String,
    pub particles_count: u32,
    pub enable_stars: bool,
    pub stars_color: String,
    pub stars_count: u32,

    // Background images
    pub hero_background_image: String,
    pub hero_background_overlay_opacity: f64,
    pub about_background_image: String,
    pub boutique_background_image: String,

    // Visual effects
    pub enable_blur_effects: bool,
    pub enable_gradient_backgrounds: bool,
    pub gradient_start_color: String,
    pub gradient_end_color: String,

    // Logos and icons
    pub logo_url: String,
    pub favicon_url: String,
    pub hero_icon_url: String,

    // Typography
    pub font_family: String,
    pub heading_font_family: String,
    pub base_font_size: f64,

    // Design
    pub border_radius: String,
    pub section_spacing: String,
    pub card_shadow: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            id: None,
            user_id: None,

            primary_color: "#3b82f6".to_string(),
            secondary_color: "#8b5cf6".to_string(),
            accent_color: "#f59e0b".to_string(),
            background_color: "#0f172a".to_string(),
            text_color: "#ffffff".to_string(),
            header_bg_color: "#1e293b".to_string(),
            footer_bg_color: "#0f172a".to_string(),

            site_name: "MOONLINE ART".to_string(),
            site_slogan: "Des créations uniques entre art et style".to_string(),
            home_hero_title: "Bienvenue dans l'univers MOONLINE".to_string(),
            home_hero_subtitle: "Découvrez notre collection unique d'art spatial".to_string(),
            about_title: "Notre histoire".to_string(),
            about_description: "MOONLINE ART est né d'une passion pour l'art et l'univers."
                .to_string(),

            contact_email: "contact@moonlineart.com".to_string(),
            contact_phone: "+33 1 23 45 67 89".to_string(),
            contact_address: String::new(),
            facebook_url: String::new(),
            instagram_url: String::new(),
            twitter_url: String::new(),

            shipping_cost: 5.99,
            free_shipping_threshold: 50.0,
            order_processing_days: 3,
            custom_order_delay_days: 14,
            show_prices: true,
            allow_custom_orders: true,

            enable_particles: true,
            particles_color: "#a855f7".to_string(),
            particles_count: 50,
            enable_stars: true,
            stars_color: "#ffffff".to_string(),
            stars_count: 100,

            hero_background_image: String::new(),
            hero_background_overlay_opacity: 0.6,
            about_background_image: String::new(),
            boutique_background_image: String::new(),

            enable_blur_effects: true,
            enable_gradient_backgrounds: true,
            gradient_start_color: "#7c3aed".to_string(),
            gradient_end_color: "#2563eb".to_string(),

            logo_url: String::new(),
            favicon_url: String::new(),
            hero_icon_url: String::new(),

            font_family: "Inter, system-ui, sans-serif".to_string(),
            heading_font_family: "Inter, system-ui, sans-serif".to_string(),
            base_font_size: 16.0,

            border_radius: "0.75rem".to_string(),
            section_spacing: "4rem".to_string(),
            card_shadow: "0 10px 40px rgba(0, 0, 0, 0.2)".to_string(),
        }
    }
}

impl SiteConfig {
    /// Default configuration owned by the given identity
    pub fn default_for(owner_id: impl Into<OwnerId>) -> Self {
        Self {
            user_id: Some(owner_id.into()),
            ..Default::default()
        }
    }

    /// All color fields, in presentation order
    pub fn colors(&self) -> [(&'static str, &str); 11] {
        [
            ("primary_color", &self.primary_color),
            ("secondary_color", &self.secondary_color),
            ("accent_color", &self.accent_color),
            ("background_color", &self.background_color),
            ("text_color", &self.text_color),
            ("header_bg_color", &self.header_bg_color),
            ("footer_bg_color", &self.footer_bg_color),
            ("particles_color", &self.particles_color),
            ("stars_color", &self.stars_color),
            ("gradient_start_color", &self.gradient_start_color),
            ("gradient_end_color", &self.gradient_end_color),
        ]
    }

    /// Fields whose value violates the schema, with the reason
    pub fn invalid_fields(&self) -> Vec<(&'static str, String)> {
        let mut invalid = Vec::new();

        for (field, value) in self.colors() {
            if !is_color_like(value) {
                invalid.push((field, format!("'{}' is not a color", value)));
            }
        }

        if self.site_name.trim().is_empty() {
            invalid.push(("site_name", "must not be empty".to_string()));
        }
        if !is_non_negative(self.shipping_cost) {
            invalid.push(("shipping_cost", "must be a number >= 0".to_string()));
        }
        if !is_non_negative(self.free_shipping_threshold) {
            invalid.push(("free_shipping_threshold", "must be a number >= 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.hero_background_overlay_opacity) {
            invalid.push((
                "hero_background_overlay_opacity",
                "must be between 0.0 and 1.0".to_string(),
            ));
        }
        if !(self.base_font_size.is_finite() && self.base_font_size > 0.0) {
            invalid.push(("base_font_size", "must be a number > 0".to_string()));
        }

        invalid
    }

    /// Shipping cost for an order subtotal, honoring the free-shipping threshold
    pub fn shipping_for(&self, subtotal: f64) -> f64 {
        if subtotal >= self.free_shipping_threshold {
            0.0
        } else {
            self.shipping_cost
        }
    }
}

fn is_non_negative(value: f64) -> bool {
    value.is_finite() && value >= 0.0
}

/// Check whether a string looks like a CSS color (hex, functional or named)
pub fn is_color_like(value: &str) -> bool {
    let value = value.trim();

    if let Some(hex) = value.strip_prefix('#') {
        return matches!(hex.len(), 3 | 4 | 6 | 8) && hex.chars().all(|c| c.is_ascii_hexdigit());
    }

    let lower = value.to_ascii_lowercase();
    for func in ["rgb(", "rgba(", "hsl(", "hsla("] {
        if lower.starts_with(func) {
            return lower.ends_with(')');
        }
    }

    !value.is_empty() && value.chars().all(|c| c.is_ascii_alphabetic())
}
