//! Field-mask updates for `SiteConfig`.

use serde::{Deserialize, Serialize};

use super::SiteConfig;

macro_rules! site_config_patch {
    ($($field:ident: $ty:ty),* $(,)?) => {
        /// A set of optional editable fields with merge-not-replace semantics.
        ///
        /// `id` and `user_id` are not editable; unknown keys are rejected.
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        #[serde(deny_unknown_fields)]
        pub struct SiteConfigPatch {
            $(
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $field: Option<$ty>,
            )*
        }

        impl SiteConfigPatch {
            /// Overwrite every field present in the patch, leaving the rest untouched
            pub fn apply_to(&self, config: &mut SiteConfig) {
                $(
                    if let Some(value) = &self.$field {
                        config.$field = value.clone();
                    }
                )*
            }

            /// Full mask carrying every editable field of `config`
            pub fn from_config(config: &SiteConfig) -> Self {
                Self {
                    $( $field: Some(config.$field.clone()), )*
                }
            }

            /// Names of the fields set in this patch
            pub fn changed_fields(&self) -> Vec<&'static str> {
                let mut fields = Vec::new();
                $(
                    if self.$field.is_some() {
                        fields.push(stringify!($field));
                    }
                )*
                fields
            }

            pub fn is_empty(&self) -> bool {
                $( self.$field.is_none() && )* true
            }
        }
    };
}

site_config_patch! {
    primary_color: String,
    secondary_color: String,
    accent_color: String,
    background_color: String,
    text_color: String,
    header_bg_color: String,
    footer_bg_color: String,

    site_name: String,
    site_slogan: String,
    home_hero_title: String,
    home_hero_subtitle: String,
    about_title: String,
    about_description: String,

    contact_email: String,
    contact_phone: String,
    contact_address: String,
    facebook_url: String,
    instagram_url: String,
    twitter_url: String,

    shipping_cost: f64,
    free_shipping_threshold: f64,
    order_processing_days: u32,
    custom_order_delay_days: u32,
    show_prices: bool,
    allow_custom_orders: bool,

    enable_particles: bool,
    particles_color: String,
    particles_count: u32,
    enable_stars: bool,
    stars_color: String,
    stars_count: u32,

    hero_background_image: String,
    hero_background_overlay_opacity: f64,
    about_background_image: String,
    boutique_background_image: String,

    enable_blur_effects: bool,
    enable_gradient_backgrounds: bool,
    gradient_start_color: String,
    gradient_end_color: String,

    logo_url: String,
    favicon_url: String,
    hero_icon_url: String,

    font_family: String,
    heading_font_family: String,
    base_font_size: f64,

    border_radius: String,
    section_spacing: String,
    card_shadow: String,
}

impl SiteConfigPatch {
    /// Validate the fields carried by this patch against the schema.
    ///
    /// Fields the patch does not touch are not checked.
    pub fn validate(&self) -> Result<(), String> {
        let mut probe = SiteConfig::default();
        self.apply_to(&mut probe);

        let changed = self.changed_fields();
        let problems: Vec<String> = probe
            .invalid_fields()
            .into_iter()
            .filter(|(field, _)| changed.contains(field))
            .map(|(field, reason)| format!("{}: {}", field, reason))
            .collect();

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems.join("; "))
        }
    }
}
