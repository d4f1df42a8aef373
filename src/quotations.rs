//! Quoted-reply stripping
//!
//! Removes the previous message that mail clients append below a reply.
//! Only trailing quotations are removed: a reply written between quoted
//! fragments is left alone, as is a message that is nothing but quotation.

/// HTML markers that open a client's quoted-reply container
const HTML_QUOTE_MARKERS: [&str; 5] = [
    "<blockquote",
    "class=\"gmail_quote\"",
    "id=\"divrplyfwdmsg\"",
    "id=\"appendonsend\"",
    "class=\"yahoo_quoted\"",
];

/// Line width for rendering fragments; only emptiness is checked
const VISIBLE_TEXT_WIDTH: usize = 1_000;

/// Strip a trailing quotation from a plaintext reply
pub fn strip_plain(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let Some(cut) = plain_quote_start(&lines) else {
        return text.to_owned();
    };
    if lines[..cut].iter().all(|l| l.trim().is_empty()) {
        return text.to_owned();
    }
    lines[..cut].join("\n").trim_end().to_owned()
}

/// Find the line where the trailing quotation starts
fn plain_quote_start(lines: &[&str]) -> Option<usize> {
    for (idx, line) in lines.iter().enumerate() {
        let trimmed = line.trim();

        if is_forward_separator(trimmed, lines.get(idx + 1).copied()) {
            return Some(idx);
        }

        let header_end = if is_reply_header(trimmed) {
            Some(idx)
        } else if trimmed.starts_with("On ")
            && lines
                .get(idx + 1)
                .is_some_and(|next| next.trim().ends_with("wrote:"))
        {
            Some(idx + 1)
        } else {
            None
        };
        if let Some(end) = header_end
            && only_quoted_after(&lines[end + 1..])
        {
            return Some(idx);
        }
    }

    let last = lines.iter().rposition(|l| !l.trim().is_empty())?;
    if !is_quoted(lines[last]) {
        return None;
    }
    let mut start = last;
    while start > 0 && (is_quoted(lines[start - 1]) || lines[start - 1].trim().is_empty()) {
        start -= 1;
    }
    Some(start)
}

fn is_quoted(line: &str) -> bool {
    line.trim_start().starts_with('>')
}

fn is_reply_header(trimmed: &str) -> bool {
    trimmed.starts_with("On ") && trimmed.ends_with("wrote:")
}

fn is_forward_separator(trimmed: &str, next: Option<&str>) -> bool {
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("---") && lower.contains("original message") {
        return true;
    }
    trimmed.len() >= 20
        && trimmed.chars().all(|c| c == '_')
        && next.is_some_and(|n| n.trim_start().starts_with("From:"))
}

fn only_quoted_after(lines: &[&str]) -> bool {
    lines
        .iter()
        .all(|l| l.trim().is_empty() || is_quoted(l))
}

/// Drop a dangling "On … wrote:" line left at the end of converted text
pub fn drop_trailing_reply_header(text: &str) -> String {
    let trimmed = text.trim_end();
    match trimmed.rsplit_once('\n') {
        Some((head, last)) if is_reply_header(last.trim()) => head.trim_end().to_owned(),
        None if is_reply_header(trimmed.trim()) => String::new(),
        _ => trimmed.to_owned(),
    }
}

/// Strip a trailing quotation container from an HTML reply
///
/// Cuts at the first quote marker, provided no visible text follows the
/// quotation. Returns the HTML unchanged otherwise.
pub fn strip_html(html: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let cut = HTML_QUOTE_MARKERS
        .iter()
        .filter_map(|marker| {
            let pos = lower.find(marker)?;
            if marker.starts_with('<') {
                Some(pos)
            } else {
                lower[..pos].rfind('<')
            }
        })
        .min();
    let Some(cut) = cut else {
        return html.to_owned();
    };

    if let Some(close) = lower.rfind("</blockquote>") {
        let after = &html[close + "</blockquote>".len()..];
        if close >= cut && visible_text(after).is_none_or(|text| !text.is_empty()) {
            return html.to_owned();
        }
    }

    let head = &html[..cut];
    if visible_text(head).is_none_or(|text| text.is_empty()) {
        return html.to_owned();
    }
    head.to_owned()
}

/// Rendered text of an HTML fragment, trimmed
///
/// Sanitizing drops `<style>` and `<script>` content; rendering decodes
/// entities such as `&#160;`. `None` if the fragment cannot be rendered.
fn visible_text(fragment: &str) -> Option<String> {
    let clean = ammonia::clean(fragment);
    html2text::from_read(clean.as_bytes(), VISIBLE_TEXT_WIDTH)
        .ok()
        .map(|text| text.trim().to_owned())
}
