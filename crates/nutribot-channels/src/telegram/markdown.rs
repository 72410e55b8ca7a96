//! Conversion of the agent's markdown replies into Telegram MarkdownV2.
//!
//! MarkdownV2 rejects any unescaped reserved character, so everything that
//! is not recognised as formatting gets a backslash. Recognised constructs:
//! fenced and inline code, `**bold**`, `*italic*`/`_italic_` and `[label](url)`.

const RESERVED: &[char] = &[
    '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!', '\\',
];

pub fn to_markdown_v2(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 4);
    let mut rest = input;
    let mut prev: Option<char> = None;

    while let Some(ch) = rest.chars().next() {
        if let Some(after) = rest.strip_prefix("```") {
            let (body, remaining) = after.split_once("```").unwrap_or((after, ""));
            out.push_str("```");
            out.push_str(&escape_code(body));
            if !body.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("```");
            rest = remaining;
            prev = Some('`');
            continue;
        }

        if let Some((inner, remaining)) = delimited(rest, "**") {
            out.push('*');
            out.push_str(&escape_text(inner));
            out.push('*');
            rest = remaining;
            prev = Some('*');
            continue;
        }

        if let Some((inner, remaining)) = delimited(rest, "`") {
            out.push('`');
            out.push_str(&escape_code(inner));
            out.push('`');
            rest = remaining;
            prev = Some('`');
            continue;
        }

        if (ch == '*' || ch == '_')
            && prev.is_none_or(|p| p.is_whitespace() || p.is_ascii_punctuation())
            && let Some((inner, remaining)) = delimited(rest, if ch == '*' { "*" } else { "_" })
        {
            out.push('_');
            out.push_str(&escape_text(inner));
            out.push('_');
            rest = remaining;
            prev = Some(ch);
            continue;
        }

        if ch == '['
            && let Some((label, url, remaining)) = link(rest)
        {
            out.push('[');
            out.push_str(&escape_text(label));
            out.push_str("](");
            out.push_str(&escape_url(url));
            out.push(')');
            rest = remaining;
            prev = Some(')');
            continue;
        }

        if RESERVED.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
        rest = &rest[ch.len_utf8()..];
        prev = Some(ch);
    }
    out
}

/// Escape every reserved character so the text renders literally.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if RESERVED.contains(&ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn escape_code(text: &str) -> String {
    text.replace('\\', "\\\\").replace('`', "\\`")
}

fn escape_url(url: &str) -> String {
    url.replace('\\', "\\\\").replace(')', "\\)")
}

/// `marker inner marker` on a single line, where `inner` is non-empty and not
/// padded with whitespace.
fn delimited<'a>(text: &'a str, marker: &str) -> Option<(&'a str, &'a str)> {
    let after = text.strip_prefix(marker)?;
    let (inner, remaining) = after.split_once(marker)?;
    let valid = !inner.is_empty()
        && !inner.contains('\n')
        && !inner.starts_with(char::is_whitespace)
        && !inner.ends_with(char::is_whitespace);
    valid.then_some((inner, remaining))
}

fn link(text: &str) -> Option<(&str, &str, &str)> {
    let after = text.strip_prefix('[')?;
    let (label, after_label) = after.split_once("](")?;
    let (url, remaining) = after_label.split_once(')')?;
    if label.is_empty() || label.contains('\n') || url.contains(char::is_whitespace) {
        return None;
    }
    Some((label, url, remaining))
}
