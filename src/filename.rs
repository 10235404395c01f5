//! Filename sanitization and collision-free output path resolution.
//!
//! Raw bitstream names arrive from the repository and may contain anything.
//! Names are normalized to be safe across common filesystems, bounded in
//! length, and made unique both against the files already on disk and
//! against the names handed out earlier in the same run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

/// Maximum length of a sanitized filename, in characters.
const MAX_FILENAME_CHARS: usize = 200;

/// Substitute when sanitization leaves nothing behind.
const DEFAULT_NAME: &str = "unnamed";

// Static patterns, safe to panic at first use.
#[allow(clippy::expect_used)]
static UNSAFE_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[/\\:*?"<>|]+"#).expect("unsafe-char regex is valid"));

#[allow(clippy::expect_used)]
static WHITESPACE_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex is valid"));

/// Normalizes a raw name for filesystem safety.
///
/// Strips control characters, replaces runs of `/ \ : * ? " < > |` with a
/// single `_`, collapses whitespace runs to one space, trims, and truncates
/// to 200 characters. An empty result becomes `unnamed`.
///
/// Idempotent: sanitizing an already-sanitized name returns it unchanged.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let no_control: String = name.chars().filter(|c| !c.is_control()).collect();
    let replaced = UNSAFE_RUN_RE.replace_all(&no_control, "_");
    let collapsed = WHITESPACE_RUN_RE.replace_all(&replaced, " ");
    let truncated: String = collapsed.trim().chars().take(MAX_FILENAME_CHARS).collect();
    let result = truncated.trim().to_string();

    if result.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        result
    }
}

/// Appends a `.pdf` extension unless one is already present (case-insensitive).
#[must_use]
pub fn ensure_pdf_extension(name: &str) -> String {
    if name.to_lowercase().ends_with(".pdf") {
        name.to_string()
    } else {
        format!("{name}.pdf")
    }
}

/// Resolves a unique output path for `base_name` inside `dir`.
///
/// A name is taken if it was handed out earlier in this run (`used`) or if a
/// file with that name already exists on disk. Collisions append ` (N)`
/// before the extension, with N starting at 2 and incrementing until free.
/// The winning name is recorded in `used`.
pub fn resolve_unique_name(dir: &Path, base_name: &str, used: &mut HashSet<String>) -> PathBuf {
    let mut final_name = base_name.to_string();
    let mut counter = 2usize;

    while used.contains(&final_name) || dir.join(&final_name).exists() {
        let (stem, ext) = split_extension(base_name);
        final_name = format!("{stem} ({counter}){ext}");
        counter += 1;
    }

    used.insert(final_name.clone());
    dir.join(final_name)
}

/// Splits a filename at its last dot into (stem, extension-with-dot).
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) => (&name[..pos], &name[pos..]),
        None => (name, ""),
    }
}
