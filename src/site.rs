//! Fixed markup contract of the chapter pages on `b.faloo.com`.
//!
//! Any change to the site's markup shows up here first: classification silently falls back to
//! [`crate::page::ChapterKind::Undetermined`] and missed placeholders degrade the VIP capture.

use url::Url;

pub const TITLE_SELECTOR: &str = "div.c_l_title h1";
pub const CONTENT_CONTAINER_SELECTOR: &str = "div.noveContent";
pub const TEXT_MARKER_CLASS: &str = "readline";
pub const VIP_IMAGE_AREA_SELECTOR: &str = "div.con_img";
pub const IMAGE_PLACEHOLDER_SELECTOR: &str = "div[id^='img_src_cok_']";
pub const PROBLEM_IMAGE_SELECTOR: &str = "img[src*='s.faloo.com/adimages/beijing_page.gif']";

pub const CHAPTER_HOST: &str = "b.faloo.com";

/// Returns true when `url` points at a chapter page of the target site.
pub fn is_chapter_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    parsed.host_str() == Some(CHAPTER_HOST) && parsed.path().ends_with(".html")
}

/// Turns a protocol-relative URL into an absolute `https:` one.
pub fn normalize_image_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_owned()
    }
}

/// Recovers the URL from a CSS `url(...)` value, with or without quotes.
pub fn extract_css_url(value: &str) -> Option<String> {
    let start = value.find("url(")? + "url(".len();
    let rest = &value[start..];
    let end = rest.rfind(')')?;
    let inner = rest[..end].trim();

    let unquoted = match inner.chars().next() {
        Some(quote @ ('"' | '\'')) => inner
            .strip_prefix(quote)
            .and_then(|s| s.strip_suffix(quote))
            .unwrap_or(inner),
        _ => inner,
    };
    if unquoted.is_empty() {
        return None;
    }

    Some(normalize_image_url(unquoted))
}

/// Value of one declaration in an inline `style` attribute.
pub fn style_declaration<'a>(style: &'a str, property: &str) -> Option<&'a str> {
    declarations(style)
        .find(|(name, _)| name.eq_ignore_ascii_case(property))
        .map(|(_, value)| value)
}

/// Rewrites (or appends) one declaration, keeping the others in place.
pub fn with_style_declaration(style: &str, property: &str, value: &str) -> String {
    let mut out = Vec::new();
    let mut replaced = false;
    for (name, existing) in declarations(style) {
        if name.eq_ignore_ascii_case(property) {
            if !replaced {
                out.push(format!("{property}: {value}"));
                replaced = true;
            }
        } else {
            out.push(format!("{name}: {existing}"));
        }
    }
    if !replaced {
        out.push(format!("{property}: {value}"));
    }
    out.join("; ")
}

// The `;base64` marker of a data URL must not end a declaration, so split only outside
// parentheses.
fn declarations(style: &str) -> impl Iterator<Item = (&str, &str)> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (idx, ch) in style.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ';' if depth == 0 => {
                parts.push(&style[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&style[start..]);

    parts.into_iter().filter_map(|decl| {
        let (name, value) = decl.split_once(':')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        Some((name, value.trim()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_url_accepts_quoted_and_bare_forms() {
        assert_eq!(
            extract_css_url(r#"url("https://img.faloo.com/a.gif")"#).as_deref(),
            Some("https://img.faloo.com/a.gif")
        );
        assert_eq!(
            extract_css_url("url('https://img.faloo.com/b.gif')").as_deref(),
            Some("https://img.faloo.com/b.gif")
        );
        assert_eq!(
            extract_css_url("url(https://img.faloo.com/c.gif)").as_deref(),
            Some("https://img.faloo.com/c.gif")
        );
    }

    #[test]
    fn css_url_normalizes_protocol_relative() {
        assert_eq!(
            extract_css_url(r#"url("//img.faloo.com/p/1.gif?k=v")"#).as_deref(),
            Some("https://img.faloo.com/p/1.gif?k=v")
        );
    }

    #[test]
    fn css_url_rejects_missing_or_empty() {
        assert_eq!(extract_css_url("none"), None);
        assert_eq!(extract_css_url(""), None);
        assert_eq!(extract_css_url("url(\"\")"), None);
    }

    #[test]
    fn chapter_url_guard() {
        assert!(is_chapter_url("https://b.faloo.com/1482723_12.html"));
        assert!(is_chapter_url("http://b.faloo.com/1482723_12.html?from=toc"));
        assert!(!is_chapter_url("https://b.faloo.com/1482723.htm"));
        assert!(!is_chapter_url("https://www.faloo.com/1482723_12.html"));
        assert!(!is_chapter_url("not a url"));
    }

    #[test]
    fn style_declarations_are_read_and_rewritten() {
        let style = "width: 100px; background-image: url(\"//img.faloo.com/x.gif\"); height: 20px";
        assert_eq!(
            style_declaration(style, "background-image"),
            Some("url(\"//img.faloo.com/x.gif\")")
        );

        let rewritten = with_style_declaration(
            style,
            "background-image",
            "url(\"data:image/gif;base64,R0lG\")",
        );
        assert_eq!(
            rewritten,
            "width: 100px; background-image: url(\"data:image/gif;base64,R0lG\"); height: 20px"
        );
        assert_eq!(
            style_declaration(&rewritten, "background-image"),
            Some("url(\"data:image/gif;base64,R0lG\")")
        );
        assert_eq!(style_declaration(&rewritten, "height"), Some("20px"));
    }

    #[test]
    fn style_declaration_is_appended_when_absent() {
        assert_eq!(
            with_style_declaration("", "background-image", "url(a)"),
            "background-image: url(a)"
        );
        assert_eq!(
            with_style_declaration("color: red;", "background-image", "url(a)"),
            "color: red; background-image: url(a)"
        );
    }
}
