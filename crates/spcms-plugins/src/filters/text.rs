//! String transformations behind the text filters.

use std::sync::LazyLock;

use regex::Regex;
use url::form_urlencoded;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern compiles"));

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:[A-Za-z][A-Za-z0-9]*|#[0-9]+|#[xX][0-9A-Fa-f]+);")
        .expect("entity pattern compiles")
});

/// Upper-cases the first letter of every word.
pub fn capitalize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = c.is_whitespace();
    }
    out
}

/// Escapes `&`, `<`, `>` and `"`.
pub fn escape(s: &str) -> String {
    escape_with(s, true)
}

/// Like [`escape`], but leaves existing entities alone.
pub fn escape_once(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for entity in ENTITY_RE.find_iter(s) {
        out.push_str(&escape(&s[last..entity.start()]));
        out.push_str(entity.as_str());
        last = entity.end();
    }
    out.push_str(&escape(&s[last..]));
    out
}

/// Removes HTML tags.
pub fn strip_html(s: &str) -> String {
    TAG_RE.replace_all(s, "").into_owned()
}

/// Removes `\n` and `\r`.
pub fn strip_newlines(s: &str) -> String {
    s.chars().filter(|c| !matches!(c, '\n' | '\r')).collect()
}

/// Replaces each newline with `<br/>`, dropping carriage returns.
pub fn newline_to_br(s: &str) -> String {
    s.replace('\r', "").replace('\n', "<br/>")
}

/// Escapes text for XML, decoding known entities first so they are not
/// escaped twice. Quotes are kept.
pub fn xml_escape(s: &str) -> String {
    escape_with(&decode_entities(s), false)
}

/// Form-urlencodes a string (spaces become `+`).
pub fn cgi_escape(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Counts words longer than one character, ignoring markup.
pub fn number_of_words(s: &str) -> usize {
    strip_html(s)
        .split_whitespace()
        .filter(|word| word.chars().count() > 1)
        .count()
}

fn escape_with(s: &str, quotes: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if quotes => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn decode_entities(s: &str) -> String {
    ENTITY_RE
        .replace_all(s, |caps: &regex::Captures<'_>| {
            let entity = &caps[0];
            decode_entity(&entity[1..entity.len() - 1]).unwrap_or_else(|| entity.to_string())
        })
        .into_owned()
}

fn decode_entity(name: &str) -> Option<String> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)?
        }
    };
    Some(c.to_string())
}
