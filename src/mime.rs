//! Message parsing and chat-body extraction
//!
//! Parses RFC822 messages using `mailparse` and turns them into chat-ready
//! text: the preferred body part with quotations and signature footers
//! removed, followed by links to uploaded attachments. HTML-only messages
//! are sanitized with `ammonia` and rendered to text with `html2text`.

use std::collections::BTreeMap;

use mailparse::{MailAddr, MailHeaderMap, ParsedMail};

use crate::directory::RealmId;
use crate::errors::{ForwardError, ForwardResult};
use crate::outbound::{UploadRequest, Uploader};
use crate::quotations;

/// Substituted when a message yields no text at all
pub const NO_BODY_PLACEHOLDER: &str = "(No email body)";
/// Substituted when a message has no `Subject` header
pub const NO_SUBJECT_PLACEHOLDER: &str = "(no subject)";
/// Line width for HTML rendering; wide enough to avoid hard wrapping
const HTML_RENDER_WIDTH: usize = 1_000;

/// Gateway-ready content of one email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContent {
    /// Body text with quotations, footer and null bytes removed
    pub body_text: String,
    /// `[filename](url)` links in source order
    pub attachment_links: Vec<String>,
}

impl ExtractedContent {
    /// Join body and attachment links into the final chat message body
    ///
    /// Never returns an empty string; falls back to [`NO_BODY_PLACEHOLDER`].
    pub fn assemble(&self) -> String {
        let mut body = self.body_text.trim_end().to_owned();
        if !self.attachment_links.is_empty() {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(&self.attachment_links.join("\n"));
        }

        let body = body.trim();
        if body.is_empty() {
            NO_BODY_PLACEHOLDER.to_owned()
        } else {
            body.to_owned()
        }
    }
}

/// Identity attachments are stored under
#[derive(Debug, Clone, Copy)]
pub struct UploadScope<'a> {
    /// Owner recorded with each upload
    pub owner: &'a str,
    /// Realm the uploads belong to
    pub realm_id: RealmId,
}

/// Parse raw RFC822 bytes
///
/// # Errors
///
/// - `Parse` if `mailparse` fails
pub fn parse(raw: &[u8]) -> ForwardResult<ParsedMail<'_>> {
    mailparse::parse_mail(raw)
        .map_err(|e| ForwardError::Parse(format!("failed to parse RFC822 message: {e}")))
}

/// Decoded `Subject` header, or a placeholder when absent
pub fn subject(email: &ParsedMail<'_>) -> String {
    email
        .headers
        .get_first_value("Subject")
        .unwrap_or_else(|| NO_SUBJECT_PLACEHOLDER.to_owned())
}

/// Decoded `From` header, or an empty string when absent
pub fn sender(email: &ParsedMail<'_>) -> String {
    email.headers.get_first_value("From").unwrap_or_default()
}

/// All addresses carried by every instance of a header, in order
///
/// Values that do not parse as address lists are returned as-is, trimmed.
pub fn header_addresses(email: &ParsedMail<'_>, name: &str) -> Vec<String> {
    let mut out = Vec::new();
    for value in email.headers.get_all_values(name) {
        match mailparse::addrparse(&value) {
            Ok(list) => {
                for addr in list.iter() {
                    match addr {
                        MailAddr::Single(info) => out.push(info.addr.clone()),
                        MailAddr::Group(group) => {
                            out.extend(group.addrs.iter().map(|info| info.addr.clone()));
                        }
                    }
                }
            }
            Err(_) => out.push(value.trim().to_owned()),
        }
    }
    out
}

/// Extract the body text of a message
///
/// Prefers the first `text/plain` part (depth-first), stripped of plaintext
/// quotations. Falls back to the first `text/html` part, stripped of HTML
/// quotations and rendered to text.
///
/// # Errors
///
/// - `NoBodyFound` if neither part type carries content
/// - `Parse` if HTML rendering fails
pub fn extract_body(email: &ParsedMail<'_>) -> ForwardResult<String> {
    if let Some(text) = first_body_of_type(email, "text/plain")
        && !text.is_empty()
    {
        return Ok(quotations::strip_plain(&text));
    }

    if let Some(html) = first_body_of_type(email, "text/html")
        && !html.is_empty()
    {
        return render_html(&quotations::strip_html(&html));
    }

    Err(ForwardError::NoBodyFound)
}

/// Drop an unambiguous signature footer
///
/// Fires only when exactly one line starts with `--` (after trimming);
/// everything before that line is kept. Zero or several such lines leave
/// the text unchanged.
pub fn filter_footer(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut candidates = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.trim().starts_with("--"));

    match (candidates.next(), candidates.next()) {
        (Some((idx, _)), None) => lines[..idx].join("\n").trim().to_owned(),
        _ => text.to_owned(),
    }
}

/// Upload attachments and format them as links
///
/// Only immediate children of a multipart message are considered, and only
/// those declaring a filename. Parts whose payload cannot be decoded are
/// skipped with a warning.
///
/// # Errors
///
/// Returns the uploader's error if storing an attachment fails.
pub fn extract_attachments(
    email: &ParsedMail<'_>,
    uploader: &dyn Uploader,
    scope: UploadScope<'_>,
) -> ForwardResult<Vec<String>> {
    if !email.ctype.mimetype.to_ascii_lowercase().starts_with("multipart/") {
        return Ok(Vec::new());
    }

    let mut links = Vec::new();
    for part in &email.subparts {
        let disp = part.get_content_disposition();
        let Some(filename) = attachment_filename(part, &disp.params) else {
            continue;
        };

        let bytes = match part.get_body_raw() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(
                    filename = %filename,
                    from = %sender(email),
                    error = %e,
                    "skipping attachment with undecodable payload"
                );
                continue;
            }
        };

        let url = uploader.store(&UploadRequest {
            filename: &filename,
            size: bytes.len(),
            content_type: &part.ctype.mimetype.to_ascii_lowercase(),
            bytes: &bytes,
            owner: scope.owner,
            realm_id: scope.realm_id,
        })?;
        links.push(format!("[{filename}]({url})"));
    }
    Ok(links)
}

/// Run the full extraction pipeline
///
/// # Errors
///
/// Propagates [`extract_body`] and [`extract_attachments`] failures.
pub fn extract_content(
    email: &ParsedMail<'_>,
    uploader: &dyn Uploader,
    scope: UploadScope<'_>,
) -> ForwardResult<ExtractedContent> {
    let body = extract_body(email)?.replace('\0', "");
    Ok(ExtractedContent {
        body_text: filter_footer(&body),
        attachment_links: extract_attachments(email, uploader, scope)?,
    })
}

/// Build the final chat message body for an email
///
/// # Errors
///
/// Propagates [`extract_content`] failures.
pub fn assemble_body(
    email: &ParsedMail<'_>,
    uploader: &dyn Uploader,
    scope: UploadScope<'_>,
) -> ForwardResult<String> {
    Ok(extract_content(email, uploader, scope)?.assemble())
}

/// Decoded body of the first part with the given content type
///
/// Walks the part tree depth-first, parents before children.
fn first_body_of_type(part: &ParsedMail<'_>, content_type: &str) -> Option<String> {
    if part.ctype.mimetype.eq_ignore_ascii_case(content_type)
        && let Ok(body) = part.get_body()
    {
        return Some(body);
    }
    part.subparts
        .iter()
        .find_map(|sub| first_body_of_type(sub, content_type))
}

/// Sanitize HTML and render it as lightweight markup
fn render_html(html: &str) -> ForwardResult<String> {
    let clean = ammonia::clean(html);
    let text = html2text::from_read(clean.as_bytes(), HTML_RENDER_WIDTH)
        .map_err(|e| ForwardError::Parse(format!("failed to render HTML body: {e}")))?;
    Ok(quotations::drop_trailing_reply_header(text.trim()))
}

/// Extract attachment filename from part
///
/// Checks Content-Disposition parameter first, falls back to Content-Type
/// name parameter.
fn attachment_filename(
    part: &ParsedMail<'_>,
    disp_params: &BTreeMap<String, String>,
) -> Option<String> {
    disp_params
        .get("filename")
        .cloned()
        .or_else(|| part.ctype.params.get("name").cloned())
        .filter(|name| !name.is_empty())
}

/// Truncate string to maximum characters (Unicode-aware)
///
/// Preserves complete characters, never splitting multi-byte sequences.
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    input.chars().take(max_chars).collect()
}
