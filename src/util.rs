use chrono::{DateTime, Local, Utc};

/// Escape text for use inside xml element content and attribute values.
pub fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Render a timestamp as a local calendar date using a chrono format string.
pub fn format_local_date(date: DateTime<Utc>, format: &str) -> String {
    date.with_timezone(&Local).format(format).to_string()
}

/// Long date used on ticket footers, e.g. `Saturday, March 8, 2025`.
pub fn format_long_date(date: DateTime<Utc>) -> String {
    format_local_date(date, "%A, %B %-d, %Y")
}

/// `YYYY-MM-DD` of the UTC day, used in generated file names.
pub fn iso_date(date: DateTime<Utc>) -> String {
    date.format("%Y-%m-%d").to_string()
}
