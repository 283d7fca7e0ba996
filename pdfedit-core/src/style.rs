use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::geometry::Color;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontSlant {
    #[default]
    Normal,
    Italic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextDecoration {
    #[default]
    None,
    Underline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    #[default]
    Left,
    Center,
    Right,
}

/// Formatting attached to a run. Fields are `None` when the source did not
/// tell us.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TextStyle {
    pub weight: Option<FontWeight>,
    pub slant: Option<FontSlant>,
    pub decoration: Option<TextDecoration>,
    pub color: Option<Color>,
    pub align: Option<TextAlign>,
}

impl TextStyle {
    /// Best-effort weight/slant from a PDF font name such as
    /// `ABCDEF+Times-BoldItalic`.
    pub fn from_font_name(font_name: &str) -> Self {
        if let Some(font) = StandardFont::from_postscript_name(font_name) {
            return Self {
                weight: Some(font.weight()),
                slant: Some(font.slant()),
                ..Self::default()
            };
        }
        let lower = base_font_name(font_name).to_ascii_lowercase();
        let bold = ["bold", "black", "heavy", "semibold"]
            .iter()
            .any(|hint| lower.contains(hint));
        let italic = lower.contains("italic") || lower.contains("oblique");
        Self {
            weight: bold.then_some(FontWeight::Bold),
            slant: italic.then_some(FontSlant::Italic),
            ..Self::default()
        }
    }
}

/// Per-edit overrides. Anything left `None` is inherited from the run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TextFormat {
    pub font_family: Option<String>,
    pub font_size: Option<f32>,
    pub weight: Option<FontWeight>,
    pub slant: Option<FontSlant>,
    pub decoration: Option<TextDecoration>,
    pub color: Option<Color>,
    pub align: Option<TextAlign>,
}

impl TextFormat {
    /// Layers the overrides over `style`.
    pub fn apply_to(&self, style: &TextStyle) -> TextStyle {
        TextStyle {
            weight: self.weight.or(style.weight),
            slant: self.slant.or(style.slant),
            decoration: self.decoration.or(style.decoration),
            color: self.color.or(style.color),
            align: self.align.or(style.align),
        }
    }
}

/// The fourteen base fonts every PDF consumer can draw without embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StandardFont {
    Helvetica,
    HelveticaBold,
    HelveticaOblique,
    HelveticaBoldOblique,
    TimesRoman,
    TimesBold,
    TimesItalic,
    TimesBoldItalic,
    Courier,
    CourierBold,
    CourierOblique,
    CourierBoldOblique,
    Symbol,
    ZapfDingbats,
}

static POSTSCRIPT_NAMES: Lazy<HashMap<&'static str, StandardFont>> = Lazy::new(|| {
    StandardFont::ALL
        .iter()
        .map(|font| (font.postscript_name(), *font))
        .collect()
});

impl StandardFont {
    pub const ALL: [StandardFont; 14] = [
        StandardFont::Helvetica,
        StandardFont::HelveticaBold,
        StandardFont::HelveticaOblique,
        StandardFont::HelveticaBoldOblique,
        StandardFont::TimesRoman,
        StandardFont::TimesBold,
        StandardFont::TimesItalic,
        StandardFont::TimesBoldItalic,
        StandardFont::Courier,
        StandardFont::CourierBold,
        StandardFont::CourierOblique,
        StandardFont::CourierBoldOblique,
        StandardFont::Symbol,
        StandardFont::ZapfDingbats,
    ];

    /// Picks the closest base font for a family name. Unknown families fall
    /// back to the Helvetica family.
    pub fn resolve(family: &str, weight: FontWeight, slant: FontSlant) -> StandardFont {
        let lower = base_font_name(family).to_ascii_lowercase();
        let bold = weight == FontWeight::Bold;
        let italic = slant == FontSlant::Italic;

        if lower.contains("symbol") {
            return StandardFont::Symbol;
        }
        if lower.contains("zapf") || lower.contains("dingbat") {
            return StandardFont::ZapfDingbats;
        }
        if lower.contains("times") || (lower.contains("serif") && !lower.contains("sans")) {
            return match (bold, italic) {
                (true, true) => StandardFont::TimesBoldItalic,
                (true, false) => StandardFont::TimesBold,
                (false, true) => StandardFont::TimesItalic,
                (false, false) => StandardFont::TimesRoman,
            };
        }
        if lower.contains("courier") || lower.contains("mono") {
            return match (bold, italic) {
                (true, true) => StandardFont::CourierBoldOblique,
                (true, false) => StandardFont::CourierBold,
                (false, true) => StandardFont::CourierOblique,
                (false, false) => StandardFont::Courier,
            };
        }
        match (bold, italic) {
            (true, true) => StandardFont::HelveticaBoldOblique,
            (true, false) => StandardFont::HelveticaBold,
            (false, true) => StandardFont::HelveticaOblique,
            (false, false) => StandardFont::Helvetica,
        }
    }

    pub fn from_postscript_name(name: &str) -> Option<StandardFont> {
        POSTSCRIPT_NAMES.get(base_font_name(name)).copied()
    }

    pub fn postscript_name(&self) -> &'static str {
        match self {
            StandardFont::Helvetica => "Helvetica",
            StandardFont::HelveticaBold => "Helvetica-Bold",
            StandardFont::HelveticaOblique => "Helvetica-Oblique",
            StandardFont::HelveticaBoldOblique => "Helvetica-BoldOblique",
            StandardFont::TimesRoman => "Times-Roman",
            StandardFont::TimesBold => "Times-Bold",
            StandardFont::TimesItalic => "Times-Italic",
            StandardFont::TimesBoldItalic => "Times-BoldItalic",
            StandardFont::Courier => "Courier",
            StandardFont::CourierBold => "Courier-Bold",
            StandardFont::CourierOblique => "Courier-Oblique",
            StandardFont::CourierBoldOblique => "Courier-BoldOblique",
            StandardFont::Symbol => "Symbol",
            StandardFont::ZapfDingbats => "ZapfDingbats",
        }
    }

    pub fn weight(&self) -> FontWeight {
        match self {
            StandardFont::HelveticaBold
            | StandardFont::HelveticaBoldOblique
            | StandardFont::TimesBold
            | StandardFont::TimesBoldItalic
            | StandardFont::CourierBold
            | StandardFont::CourierBoldOblique => FontWeight::Bold,
            _ => FontWeight::Normal,
        }
    }

    pub fn slant(&self) -> FontSlant {
        match self {
            StandardFont::HelveticaOblique
            | StandardFont::HelveticaBoldOblique
            | StandardFont::TimesItalic
            | StandardFont::TimesBoldItalic
            | StandardFont::CourierOblique
            | StandardFont::CourierBoldOblique => FontSlant::Italic,
            _ => FontSlant::Normal,
        }
    }
}

/// Strips a subset tag (`ABCDEF+`) from an embedded font name.
fn base_font_name(name: &str) -> &str {
    match name.split_once('+') {
        Some((tag, rest)) if tag.len() == 6 && tag.chars().all(|c| c.is_ascii_uppercase()) => rest,
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_families_like_the_base_fonts() {
        assert_eq!(
            StandardFont::resolve("Times New Roman", FontWeight::Bold, FontSlant::Italic),
            StandardFont::TimesBoldItalic
        );
        assert_eq!(
            StandardFont::resolve("Courier New", FontWeight::Normal, FontSlant::Italic),
            StandardFont::CourierOblique
        );
        assert_eq!(
            StandardFont::resolve("Arial", FontWeight::Bold, FontSlant::Normal),
            StandardFont::HelveticaBold
        );
        assert_eq!(
            StandardFont::resolve("g_d0_f1", FontWeight::Normal, FontSlant::Normal),
            StandardFont::Helvetica
        );
    }

    #[test]
    fn infers_style_from_subset_font_names() {
        let style = TextStyle::from_font_name("QWERTY+Times-BoldItalic");
        assert_eq!(style.weight, Some(FontWeight::Bold));
        assert_eq!(style.slant, Some(FontSlant::Italic));

        let style = TextStyle::from_font_name("OpenSans-Semibold");
        assert_eq!(style.weight, Some(FontWeight::Bold));
        assert_eq!(style.slant, None);
    }

    #[test]
    fn format_overrides_only_what_it_sets() {
        let base = TextStyle {
            weight: Some(FontWeight::Bold),
            color: Some(Color::rgb(10, 20, 30)),
            ..TextStyle::default()
        };
        let format = TextFormat {
            slant: Some(FontSlant::Italic),
            color: Some(Color::BLACK),
            ..TextFormat::default()
        };
        let merged = format.apply_to(&base);
        assert_eq!(merged.weight, Some(FontWeight::Bold));
        assert_eq!(merged.slant, Some(FontSlant::Italic));
        assert_eq!(merged.color, Some(Color::BLACK));
    }
}
