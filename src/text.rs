//! Small text formatting helpers used when building embeds.

use chrono::NaiveDate;

/// Collapse whitespace and truncate `text` to at most `width` characters,
/// dropping whole words from the end and appending `placeholder` when
/// anything was cut.
pub fn shorten(text: &str, width: usize, placeholder: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let collapsed = words.join(" ");
    if collapsed.chars().count() <= width {
        return collapsed;
    }

    let room = width.saturating_sub(placeholder.chars().count());
    let mut out = String::new();
    let mut used = 0usize;
    for word in words {
        let len = word.chars().count();
        let needed = if out.is_empty() { len } else { len + 1 };
        if used + needed > room {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
        used += needed;
    }

    if out.is_empty() {
        return placeholder.trim_start().chars().take(width).collect();
    }
    out.push_str(placeholder);
    out
}

/// Format an integer with comma thousands separators.
pub fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `June 07, 2023`
pub fn long_date(date: NaiveDate) -> String {
    date.format("%B %d, %Y").to_string()
}

/// Uppercase the first character and lowercase the rest.
pub fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
