//! Outbound message text.
//!
//! Messages use the small HTML subset every adapter is expected to render:
//! `<b>`, `<i>`, `<code>`, `<pre>` and `<a href>`. Anything user- or
//! source-provided goes through [`escape_html`] first.

use crate::{listing::Listing, search::SearchSpec};

/// Escape HTML special characters.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn bold(text: &str) -> String {
    format!("<b>{}</b>", escape_html(text))
}

pub fn code(text: &str) -> String {
    format!("<code>{}</code>", escape_html(text))
}

pub fn code_block(text: &str) -> String {
    format!("<pre>{}</pre>", escape_html(text))
}

/// `$1,200` or `$40.50`.
pub fn format_price(price: f64) -> String {
    let cents = (price.abs() * 100.0).round() as u64;
    let (whole, frac) = (cents / 100, cents % 100);

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if price < 0.0 { "-" } else { "" };
    if frac == 0 {
        format!("{sign}${grouped}")
    } else {
        format!("{sign}${grouped}.{frac:02}")
    }
}

/// Notification body for one novel listing.
pub fn format_listing(listing: &Listing, spec: &SearchSpec) -> String {
    let title = match &listing.url {
        Some(url) => format!(
            "<a href=\"{}\">{}</a>",
            escape_html(url),
            bold(&listing.title)
        ),
        None => bold(&listing.title),
    };

    let mut details = Vec::new();
    if let Some(price) = listing.price {
        details.push(format_price(price));
    }
    if let Some(loc) = listing.location.as_deref().filter(|l| !l.trim().is_empty()) {
        details.push(escape_html(loc.trim()));
    }

    let mut out = title;
    if !details.is_empty() {
        out.push('\n');
        out.push_str(&details.join(" · "));
    }
    out.push('\n');
    out.push_str(&format!("<i>{}</i>", escape_html(&spec.describe())));
    out
}

/// Keep at most the last `max_chars` characters (tracebacks end with the cause).
pub fn truncate_tail(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    let skip = count - max_chars;
    let start = s.char_indices().nth(skip).map(|(i, _)| i).unwrap_or(s.len());
    &s[start..]
}

/// Keep at most `max_chars` characters, marking the cut with `…`.
pub fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep = max_chars.saturating_sub(1);
    let mut out: String = s.chars().take(keep).collect();
    out.push('…');
    out
}
