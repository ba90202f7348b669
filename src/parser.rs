//! Page files: plain text split into named sections.
//!
//! A line consisting of `{Name}` (letters, optionally followed by digits)
//! starts the section `Name`; the lines after it are appended to the
//! content item of that name. Lines before the first marker are ignored.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use spcms_content::ContentStore;
use spcms_core::AppResult;

/// Published with the page path before a page is read.
pub const PARSE_START_EVENT: &str = "sandbox.parse_start";
/// Published with the page path after a page was read.
pub const PARSE_END_EVENT: &str = "sandbox.parse_end";
/// Published with the page path when a page cannot be opened.
pub const PARSE_FAILED_EVENT: &str = "sandbox.parse_failed";

static SECTION_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{([A-Za-z]+[0-9]*)\}$").expect("section marker pattern compiles")
});

/// Section name of a marker line, if it is one.
pub fn section_name(line: &str) -> Option<&str> {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);
    SECTION_MARKER
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Reads the page at `path` into `content`.
///
/// Returns `false` (after publishing the failure event) when the page is not
/// a readable file. Read errors after opening are returned. Bytes that are
/// not valid UTF-8 become U+FFFD.
pub fn parse_page(path: &Path, content: &ContentStore) -> AppResult<bool> {
    let bus = content.bus();
    let mut page = Value::from(path.to_string_lossy().into_owned());

    let file = match File::open(path) {
        Ok(file) if path.is_file() => file,
        _ => {
            warn!(path = %path.display(), "Page is not a readable file");
            bus.dispatch(PARSE_FAILED_EVENT, &mut page)?;
            return Ok(false);
        }
    };

    bus.dispatch(PARSE_START_EVENT, &mut page)?;

    let mut reader = BufReader::new(file);
    let mut section: Option<String> = None;
    let mut buf = Vec::new();
    let mut sections = 0usize;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        if let Some(name) = section_name(&line) {
            section = Some(name.to_string());
            sections += 1;
            continue;
        }
        if let Some(name) = &section {
            content.append_item(name, &line);
        }
    }

    debug!(path = %path.display(), sections, "Page parsed");
    bus.dispatch(PARSE_END_EVENT, &mut page)?;
    Ok(true)
}
