//! Reading known_hosts files into entries.

use std::path::Path;

use russh::keys::{self, PublicKey};

use super::patterns::HostName;

/// Line marker preceding the host field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Marker {
    None,
    Revoked,
    /// `@cert-authority` and unrecognised markers; never used for host keys
    Ignored,
}

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) marker: Marker,
    pub(crate) hosts: String,
    pub(crate) key: PublicKey,
    pub(crate) line: usize,
}

/// Keys recorded for one host across the files searched
#[derive(Debug, Default)]
pub(crate) struct HostEntries {
    pub(crate) trusted: Vec<PublicKey>,
    pub(crate) revoked: Vec<PublicKey>,
}

impl HostEntries {
    pub(crate) fn absorb(&mut self, entries: impl IntoIterator<Item = Entry>, name: &HostName) {
        for entry in entries {
            if !name.matches_field(&entry.hosts) {
                continue;
            }
            tracing::trace!(line = entry.line, marker = ?entry.marker, "known_hosts entry matches");
            match entry.marker {
                Marker::None => self.trusted.push(entry.key),
                Marker::Revoked => self.revoked.push(entry.key),
                Marker::Ignored => {}
            }
        }
    }
}

/// Parse one line. Blank lines, comments and lines that fail to parse
/// yield `None`.
pub(crate) fn parse_line(raw: &str, line: usize) -> Option<Entry> {
    let text = raw.trim();
    if text.is_empty() || text.starts_with('#') {
        return None;
    }

    let (marker, rest) = match text.strip_prefix('@') {
        Some(marked) => {
            let (name, rest) = marked.split_once(char::is_whitespace)?;
            let marker = if name == "revoked" {
                Marker::Revoked
            } else {
                Marker::Ignored
            };
            (marker, rest.trim_start())
        }
        None => (Marker::None, text),
    };

    let mut fields = rest.split_whitespace();
    let hosts = fields.next()?;
    let _algorithm = fields.next()?;
    let encoded = fields.next()?;

    match keys::parse_public_key_base64(encoded) {
        Ok(key) => Some(Entry {
            marker,
            hosts: hosts.to_string(),
            key,
            line,
        }),
        Err(e) => {
            tracing::debug!("Skipping known_hosts line {}: {}", line, e);
            None
        }
    }
}

/// Read every usable entry of a file. A missing file has no entries.
pub(crate) fn read_entries(path: &Path) -> std::io::Result<Vec<Entry>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    Ok(content
        .lines()
        .enumerate()
        .filter_map(|(index, raw)| parse_line(raw, index + 1))
        .collect())
}
