use base64::engine::general_purpose::STANDARD;
use base64::Engine;

const BACKGROUND: &str = "#2b2d31";
const FOREGROUND: &str = "#ffffff";
const FALLBACK_GLYPH: char = '?';

fn is_cjk(c: char) -> bool {
    matches!(
        c,
        '\u{3040}'..='\u{30FF}'
            | '\u{3400}'..='\u{4DBF}'
            | '\u{4E00}'..='\u{9FFF}'
            | '\u{AC00}'..='\u{D7AF}'
            | '\u{F900}'..='\u{FAFF}'
    )
}

/// First Latin alphanumeric (uppercased) or CJK character of `text`.
pub fn icon_glyph(text: &str) -> Option<char> {
    text.chars().find_map(|c| {
        if c.is_ascii_alphanumeric() {
            Some(c.to_ascii_uppercase())
        } else if is_cjk(c) {
            Some(c)
        } else {
            None
        }
    })
}

/// Square dark tile with one centred glyph taken from the title, or from
/// `fallback` (usually the domain) when the title has none.
pub fn default_icon(title: &str, fallback: &str, size: u32) -> String {
    let glyph = icon_glyph(title)
        .or_else(|| icon_glyph(fallback))
        .unwrap_or(FALLBACK_GLYPH);
    let size = size.max(1);
    let radius = size / 5;
    let font_size = size * 9 / 16;
    let svg = format!(
        concat!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{size}" height="{size}" viewBox="0 0 {size} {size}">"#,
            r#"<rect width="{size}" height="{size}" rx="{radius}" fill="{bg}"/>"#,
            r#"<text x="50%" y="50%" dominant-baseline="central" text-anchor="middle" "#,
            r#"font-family="-apple-system, 'Segoe UI', 'PingFang SC', 'Microsoft YaHei', sans-serif" "#,
            r#"font-size="{font_size}" font-weight="600" fill="{fg}">{glyph}</text></svg>"#
        ),
        size = size,
        radius = radius,
        bg = BACKGROUND,
        fg = FOREGROUND,
        font_size = font_size,
        glyph = glyph,
    );
    format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icon::encode::parse_data_uri;
    use rstest::rstest;

    #[rstest]
    #[case("github", Some('G'))]
    #[case("  --9gag", Some('9'))]
    #[case("知乎 - 有问题", Some('知'))]
    #[case("(beta) mail", Some('B'))]
    #[case("!!! ...", None)]
    fn glyph_selection(#[case] title: &str, #[case] expected: Option<char>) {
        assert_eq!(icon_glyph(title), expected);
    }

    #[test]
    fn default_icon_is_deterministic() {
        assert_eq!(
            default_icon("Docs", "docs.example", 64),
            default_icon("docs", "other.example", 64)
        );
    }

    #[test]
    fn default_icon_falls_back_to_domain_then_placeholder() {
        let (_, bytes) = parse_data_uri(&default_icon("***", "mail.example", 64)).expect("data uri");
        assert!(String::from_utf8(bytes).expect("utf8").contains(">M</text>"));

        let (_, bytes) = parse_data_uri(&default_icon("", "", 64)).expect("data uri");
        assert!(String::from_utf8(bytes).expect("utf8").contains(">?</text>"));
    }
}
