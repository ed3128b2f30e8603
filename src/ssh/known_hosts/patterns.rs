//! Host-field matching for known_hosts lines.

use data_encoding::BASE64_MIME;
use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::config::DEFAULT_SSH_PORT;

/// The names a host is recorded under: the bare host on port 22, and the
/// `[host]:port` form on any other port.
#[derive(Debug, Clone)]
pub(crate) struct HostName {
    bare: String,
    lookup: String,
}

impl HostName {
    pub(crate) fn new(host: &str, port: u16) -> Self {
        let lookup = if port == DEFAULT_SSH_PORT {
            host.to_string()
        } else {
            format!("[{}]:{}", host, port)
        };
        Self {
            bare: host.to_string(),
            lookup,
        }
    }

    /// Evaluate a comma-separated host field. Any negated pattern that
    /// matches vetoes the whole line.
    pub(crate) fn matches_field(&self, field: &str) -> bool {
        let mut positive = false;
        for pattern in field.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match pattern.strip_prefix('!') {
                Some(negated) if self.matches_pattern(negated) => return false,
                Some(_) => {}
                None => positive |= self.matches_pattern(pattern),
            }
        }
        positive
    }

    fn matches_pattern(&self, pattern: &str) -> bool {
        if let Some(hashed) = pattern.strip_prefix("|1|") {
            return hashed_matches(hashed, &self.lookup);
        }
        if pattern.contains(['*', '?']) {
            return wildcard_match(pattern.as_bytes(), self.bare.as_bytes())
                || wildcard_match(pattern.as_bytes(), self.lookup.as_bytes());
        }
        pattern == self.bare || pattern == self.lookup
    }
}

/// `salt|hash` where hash = HMAC-SHA1(salt, name), both base64
fn hashed_matches(salt_and_hash: &str, name: &str) -> bool {
    let Some((salt, hash)) = salt_and_hash.split_once('|') else {
        return false;
    };
    let (Ok(salt), Ok(hash)) = (
        BASE64_MIME.decode(salt.as_bytes()),
        BASE64_MIME.decode(hash.as_bytes()),
    ) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(&salt) else {
        return false;
    };
    mac.update(name.as_bytes());
    mac.verify_slice(&hash).is_ok()
}

/// `*` matches any run of bytes, `?` exactly one
pub(crate) fn wildcard_match(pattern: &[u8], text: &[u8]) -> bool {
    let mut p = 0;
    let mut t = 0;
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(&c) if c == b'?' || c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                // Let the last star swallow one more byte
                Some((star, consumed)) => {
                    p = star + 1;
                    t = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|&c| c == b'*')
}
