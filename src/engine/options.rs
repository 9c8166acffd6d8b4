//! Diagram rendering options.

use serde::{Deserialize, Serialize};

/// d3 `schemeCategory10`, the default branch palette.
const DEFAULT_COLORS: &[&str] = &[
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b", "#e377c2", "#7f7f7f",
    "#bcbd22", "#17becf",
];

/// Options a diagram instance is drawn with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkmapOptions {
    pub auto_fit: bool,
    pub color: Vec<String>,
    /// Branches deeper than this level keep the color of their ancestor (0 = never).
    pub color_freeze_level: u32,
    pub duration: u64,
    pub embed_global_css: bool,
    pub fit_ratio: f64,
    /// -1 expands every level.
    pub initial_expand_level: i32,
    pub max_initial_scale: f64,
    /// 0 means unlimited.
    pub max_width: u32,
    pub node_min_height: u32,
    pub padding_x: u32,
    pub pan: bool,
    pub spacing_horizontal: u32,
    pub spacing_vertical: u32,
    pub toggle_recursively: bool,
    pub zoom: bool,
}

impl Default for MarkmapOptions {
    fn default() -> Self {
        Self {
            auto_fit: false,
            color: DEFAULT_COLORS.iter().map(|c| c.to_string()).collect(),
            color_freeze_level: 0,
            duration: 500,
            embed_global_css: true,
            fit_ratio: 0.95,
            initial_expand_level: -1,
            max_initial_scale: 2.0,
            max_width: 0,
            node_min_height: 16,
            padding_x: 8,
            pan: true,
            spacing_horizontal: 80,
            spacing_vertical: 5,
            toggle_recursively: false,
            zoom: true,
        }
    }
}

impl MarkmapOptions {
    /// Color of the branch with the given index.
    pub fn branch_color(&self, branch: usize) -> &str {
        if self.color.is_empty() {
            return DEFAULT_COLORS[branch % DEFAULT_COLORS.len()];
        }
        &self.color[branch % self.color.len()]
    }
}

/// A single color or a palette.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ColorOption {
    One(String),
    Many(Vec<String>),
}

/// Options as written by users, e.g. in front matter. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonOptions {
    pub auto_fit: Option<bool>,
    pub color: Option<ColorOption>,
    pub color_freeze_level: Option<u32>,
    pub duration: Option<u64>,
    pub fit_ratio: Option<f64>,
    pub initial_expand_level: Option<i32>,
    pub max_initial_scale: Option<f64>,
    pub max_width: Option<u32>,
    pub node_min_height: Option<u32>,
    pub padding_x: Option<u32>,
    pub pan: Option<bool>,
    pub spacing_horizontal: Option<u32>,
    pub spacing_vertical: Option<u32>,
    pub toggle_recursively: Option<bool>,
    pub zoom: Option<bool>,
}

/// Overlay user options on the defaults. Fields the user did not set keep their
/// default value.
pub fn derive_options(json: Option<&JsonOptions>) -> MarkmapOptions {
    let mut options = MarkmapOptions::default();
    let Some(json) = json else {
        return options;
    };

    macro_rules! overlay {
        ($($field:ident),* $(,)?) => {
            $(if let Some(value) = json.$field.clone() {
                options.$field = value;
            })*
        };
    }
    overlay!(
        auto_fit,
        color_freeze_level,
        duration,
        fit_ratio,
        initial_expand_level,
        max_initial_scale,
        max_width,
        node_min_height,
        padding_x,
        pan,
        spacing_horizontal,
        spacing_vertical,
        toggle_recursively,
        zoom,
    );

    match &json.color {
        Some(ColorOption::One(color)) => options.color = vec![color.clone()],
        Some(ColorOption::Many(colors)) if !colors.is_empty() => options.color = colors.clone(),
        _ => {}
    }

    options
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_options_keep_defaults() {
        assert_eq!(derive_options(None), MarkmapOptions::default());
        assert_eq!(
            derive_options(Some(&JsonOptions::default())),
            MarkmapOptions::default()
        );
    }

    #[test]
    fn test_user_options_win() {
        let json: JsonOptions = serde_json::from_str(
            r##"{ "maxWidth": 300, "color": "#2980b9", "initialExpandLevel": 2, "zoom": false }"##,
        )
        .unwrap();
        let options = derive_options(Some(&json));

        assert_eq!(options.max_width, 300);
        assert_eq!(options.color, vec!["#2980b9".to_string()]);
        assert_eq!(options.initial_expand_level, 2);
        assert!(!options.zoom);
        assert_eq!(options.spacing_horizontal, 80);
    }

    #[test]
    fn test_palette_cycles() {
        let json = JsonOptions {
            color: Some(ColorOption::Many(vec!["red".into(), "blue".into()])),
            ..Default::default()
        };
        let options = derive_options(Some(&json));
        assert_eq!(options.branch_color(0), "red");
        assert_eq!(options.branch_color(3), "blue");
    }
}
