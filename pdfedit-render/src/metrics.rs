use pdfedit_core::style::FontWeight;
use pdfedit_core::{StandardFont, TextStyle};

/// Approximate advance widths, in ems, for the base fonts. Pdfium only
/// measures text that already sits in a page, so replacement text is sized
/// from these instead.
pub fn char_width_em(ch: char, font: StandardFont) -> f32 {
    if ch.is_whitespace() {
        return 0.278;
    }
    let base = match font {
        StandardFont::Courier
        | StandardFont::CourierBold
        | StandardFont::CourierOblique
        | StandardFont::CourierBoldOblique => return 0.6,
        _ => proportional_width(ch),
    };
    let family = match font {
        StandardFont::TimesRoman
        | StandardFont::TimesBold
        | StandardFont::TimesItalic
        | StandardFont::TimesBoldItalic => 0.92,
        _ => 1.0,
    };
    let weight = match font.weight() {
        FontWeight::Bold => 1.06,
        FontWeight::Normal => 1.0,
    };
    base * family * weight
}

fn proportional_width(ch: char) -> f32 {
    match ch {
        'i' | 'j' | 'l' | '.' | ',' | ':' | ';' | '\'' | '!' | '|' => 0.24,
        'f' | 't' | 'r' | '(' | ')' | '[' | ']' | '-' | '/' => 0.33,
        'm' | 'w' => 0.83,
        'M' | 'W' | '@' | '%' => 0.89,
        '0'..='9' => 0.556,
        c if c.is_ascii_uppercase() => 0.68,
        c if c.is_ascii() => 0.52,
        // CJK and other wide scripts
        c if (c as u32) >= 0x2E80 => 1.0,
        _ => 0.6,
    }
}

/// Base font standing in for `font_name`.
pub fn standard_font(font_name: &str) -> StandardFont {
    StandardFont::from_postscript_name(font_name).unwrap_or_else(|| {
        let style = TextStyle::from_font_name(font_name);
        StandardFont::resolve(
            font_name,
            style.weight.unwrap_or_default(),
            style.slant.unwrap_or_default(),
        )
    })
}

/// Width of `text` at `size` points in the base font matching `font_name`.
pub fn measure(text: &str, font_name: &str, size: f32) -> f32 {
    let font = standard_font(font_name);
    text.chars().map(|ch| char_width_em(ch, font)).sum::<f32>() * size
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_grows_with_prefix_length() {
        let text = "Hello, wide World 42";
        let mut last = 0.0;
        for end in 1..=text.len() {
            let width = measure(&text[..end], "Helvetica", 12.0);
            assert!(width > last);
            last = width;
        }
    }

    #[test]
    fn courier_is_monospaced() {
        let narrow = measure("iiii", "Courier", 10.0);
        let wide = measure("MMMM", "Courier", 10.0);
        assert!((narrow - wide).abs() < 1e-4);
        assert!((narrow - 24.0).abs() < 1e-4);
    }

    #[test]
    fn bold_and_serif_adjust_widths() {
        let regular = measure("Total", "Helvetica", 12.0);
        assert!(measure("Total", "Helvetica-Bold", 12.0) > regular);
        assert!(measure("Total", "Times-Roman", 12.0) < regular);
        // subset-prefixed names resolve like their base font
        assert_eq!(
            measure("Total", "ABCDEF+Arial-BoldMT", 12.0),
            measure("Total", "Helvetica-Bold", 12.0)
        );
    }
}
