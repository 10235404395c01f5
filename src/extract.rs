//! Identifier and display-name extraction from API response text.
//!
//! The repository's responses embed entity identifiers in self-referential
//! links. The fast path is a role-specific pattern scan over the raw text;
//! for bitstreams, where identifiers must be paired with display names, an
//! ambiguous scan falls back to parsing the response as structured JSON.
//! All functions here are pure: no I/O, no shared state.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

/// Placeholder display name when pairing cannot resolve one.
const UNKNOWN_NAME: &str = "unknown";

// Static patterns, safe to panic at first use.
#[allow(clippy::expect_used)]
static ITEM_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"/api/core/items/([0-9a-f-]+)/bundles""#).expect("item id regex is valid")
});

#[allow(clippy::expect_used)]
static BUNDLE_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/api/core/bundles/([0-9a-f-]+)/bitstreams").expect("bundle id regex is valid")
});

#[allow(clippy::expect_used)]
static BITSTREAM_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/api/core/bitstreams/([0-9a-f-]+)/bundle").expect("bitstream id regex is valid")
});

#[allow(clippy::expect_used)]
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""name"\s*:\s*"([^"]+)""#).expect("name regex is valid"));

/// Which entity's self-link shape to scan for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Item records from a search response.
    Items,
    /// Bundles attached to an item.
    Bundles,
    /// Bitstreams attached to a bundle.
    Bitstreams,
}

impl Role {
    fn pattern(self) -> &'static Regex {
        match self {
            Self::Items => &ITEM_ID_RE,
            Self::Bundles => &BUNDLE_ID_RE,
            Self::Bitstreams => &BITSTREAM_ID_RE,
        }
    }
}

/// One downloadable file reference: identifier plus display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BitstreamRef {
    /// Opaque bitstream identifier.
    pub id: String,
    /// Display name; synthetic when the response carried none.
    pub name: String,
}

impl BitstreamRef {
    /// Creates a reference from owned or borrowed parts.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Removes exact duplicates while preserving first-seen order.
pub fn dedupe<T>(values: impl IntoIterator<Item = T>) -> Vec<T>
where
    T: Eq + Hash + Clone,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for value in values {
        if seen.insert(value.clone()) {
            out.push(value);
        }
    }
    out
}

/// Extracts deduplicated identifiers for `role` from raw response text.
#[must_use]
pub fn extract_ids(text: &str, role: Role) -> Vec<String> {
    dedupe(
        role.pattern()
            .captures_iter(text)
            .map(|caps| caps[1].to_string()),
    )
}

/// Extracts deduplicated (identifier, name) pairs from a bitstream listing.
///
/// Pairing ladder, in priority order:
/// 1. Identifiers and names scanned from the text; equal counts zip
///    positionally. This trusts the response's textual emission order,
///    which holds for the target API.
/// 2. On a count mismatch, the response is parsed as JSON and the embedded
///    bitstream entries' self-link identifiers and explicit names are read
///    directly; this path is authoritative when it yields pairs.
/// 3. Failing that, identifiers pair positionally with a placeholder for
///    any missing name; a name with no identifier is dropped (it cannot
///    become a download).
/// 4. Identifiers with no names at all get a synthetic
///    `bitstream_<id>.pdf` name.
#[must_use]
pub fn extract_bitstream_refs(text: &str) -> Vec<BitstreamRef> {
    let ids = extract_ids(text, Role::Bitstreams);
    let names: Vec<String> = NAME_RE
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect();

    let pairs = if !ids.is_empty() && !names.is_empty() {
        if ids.len() == names.len() {
            ids.into_iter()
                .zip(names)
                .map(|(id, name)| BitstreamRef::new(id, name))
                .collect()
        } else {
            debug!(
                ids = ids.len(),
                names = names.len(),
                "id/name count mismatch, trying structured parse"
            );
            match structured_pairs(text) {
                Some(structured) if !structured.is_empty() => structured,
                _ => placeholder_pairs(&ids, &names),
            }
        }
    } else if !ids.is_empty() {
        ids.into_iter()
            .map(|id| {
                let name = format!("bitstream_{id}.pdf");
                BitstreamRef { id, name }
            })
            .collect()
    } else {
        Vec::new()
    };

    dedupe(pairs)
}

/// Pairs identifiers with names positionally, substituting a placeholder
/// for missing names. Surplus names have no identifier to attach to and
/// are discarded.
fn placeholder_pairs(ids: &[String], names: &[String]) -> Vec<BitstreamRef> {
    ids.iter()
        .enumerate()
        .map(|(i, id)| {
            let name = names.get(i).map_or(UNKNOWN_NAME, String::as_str);
            BitstreamRef::new(id, name)
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct BitstreamPage {
    #[serde(rename = "_embedded", alias = "embedded")]
    embedded: Option<EmbeddedBitstreams>,
}

#[derive(Debug, Deserialize)]
struct EmbeddedBitstreams {
    #[serde(default)]
    bitstreams: Vec<BitstreamEntry>,
}

#[derive(Debug, Deserialize)]
struct BitstreamEntry {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "_links", default)]
    links: Option<EntryLinks>,
}

#[derive(Debug, Deserialize)]
struct EntryLinks {
    #[serde(rename = "self", default)]
    self_link: Option<SelfLink>,
}

#[derive(Debug, Deserialize)]
struct SelfLink {
    #[serde(default)]
    href: Option<String>,
}

impl BitstreamEntry {
    /// Identifier from the self-link href, falling back to the uuid field.
    fn id(&self) -> Option<String> {
        let href = self
            .links
            .as_ref()
            .and_then(|links| links.self_link.as_ref())
            .and_then(|link| link.href.as_deref())
            .unwrap_or("");

        BITSTREAM_ID_RE
            .captures(href)
            .map(|caps| caps[1].to_string())
            .or_else(|| self.uuid.clone())
            .filter(|id| !id.is_empty())
    }
}

/// Authoritative pairing from the embedded bitstream list, when the
/// response parses as JSON. Entries missing either side are skipped.
fn structured_pairs(text: &str) -> Option<Vec<BitstreamRef>> {
    let page: BitstreamPage = serde_json::from_str(text).ok()?;
    let entries = page.embedded?.bitstreams;

    let pairs: Vec<BitstreamRef> = entries
        .into_iter()
        .filter_map(|entry| {
            let id = entry.id()?;
            let name = entry.name.filter(|name| !name.is_empty())?;
            Some(BitstreamRef { id, name })
        })
        .collect();

    Some(pairs)
}
