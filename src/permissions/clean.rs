//! Turning untrusted manifest permissions into enforceable grants.
//!
//! Cleaning rules, applied in manifest order:
//!
//! | Rule | Effect |
//! |------|--------|
//! | Unknown tag or key | Entry dropped |
//! | Bare `allowAll` anywhere | Whole set becomes `[allowAll]` |
//! | Value list contains `allowAll` | Values become `[allowAll]` |
//! | Fixed-option key (`files`, `gameSaves`) | Unknown values dropped |
//! | `webRequest` value | Dropped unless a safe `http(s)` origin |
//! | Duplicate values or entries | Merged |
//! | Keyed entry left with no values | Dropped |

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use tracing::debug;
use url::Url;

use super::capability::{ALLOW_ALL, Capability, CapabilityKey};
use super::grant::{Grant, ManifestPermission};

// ============================================================================
// Origin Checks
// ============================================================================

/// Percent-encoded double quote.
const ENCODED_DOUBLE_QUOTE: &str = "%22";

/// Returns `true` if `origin` must not be placed into a CSP source list.
///
/// Only plain `http(s)` origins with a dotted host and no wildcard or
/// quoting characters are safe.
#[must_use]
pub fn is_dangerous_origin(origin: &str) -> bool {
    if !origin.starts_with("http://") && !origin.starts_with("https://") {
        return true;
    }
    if origin.contains('\'')
        || origin.contains('*')
        || origin.contains('"')
        || origin.contains(ENCODED_DOUBLE_QUOTE)
        || origin.contains(';')
        || origin.contains(char::is_whitespace)
    {
        return true;
    }
    !origin.contains('.')
}

/// Returns `true` if `value` can be granted under `webRequest`.
fn is_valid_web_request_value(value: &str) -> bool {
    !is_dangerous_origin(value) && Url::parse(value).is_ok()
}

// ============================================================================
// clean_grants
// ============================================================================

/// Cleans manifest permissions into grants.
///
/// The output holds at most one grant per tag or key, in first-seen order.
#[must_use]
pub fn clean_grants(entries: &[ManifestPermission]) -> Vec<Grant> {
    let mut flags: Vec<Capability> = Vec::new();
    let mut keyed: Vec<(CapabilityKey, Vec<String>)> = Vec::new();
    let mut keyed_index: FxHashMap<CapabilityKey, usize> = FxHashMap::default();

    for entry in entries {
        if let Ok(capability) = entry.key.parse::<Capability>() {
            if capability == Capability::AllowAll {
                debug!("Manifest requests allowAll");
                return vec![Grant::Flag(Capability::AllowAll)];
            }
            if !flags.contains(&capability) {
                flags.push(capability);
            }
            continue;
        }

        let Ok(key) = entry.key.parse::<CapabilityKey>() else {
            debug!(key = %entry.key, "Dropping unknown permission");
            continue;
        };

        let index = *keyed_index.entry(key).or_insert_with(|| {
            keyed.push((key, Vec::new()));
            keyed.len() - 1
        });
        let values = &mut keyed[index].1;

        if values.iter().any(|v| v == ALLOW_ALL) {
            continue;
        }
        if entry.value.iter().any(|v| v == ALLOW_ALL) {
            *values = vec![ALLOW_ALL.to_string()];
            continue;
        }

        for value in &entry.value {
            if values.contains(value) {
                continue;
            }
            let accepted = match key.fixed_options() {
                Some(options) => options.contains(&value.as_str()),
                None if key == CapabilityKey::WebRequest => is_valid_web_request_value(value),
                None => !value.is_empty(),
            };
            if accepted {
                values.push(value.clone());
            } else {
                debug!(%key, %value, "Dropping permission value");
            }
        }
    }

    flags
        .into_iter()
        .map(Grant::Flag)
        .chain(
            keyed
                .into_iter()
                .filter(|(_, values)| !values.is_empty())
                .map(|(key, values)| Grant::Keyed { key, values }),
        )
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
