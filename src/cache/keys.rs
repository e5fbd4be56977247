//! Cache Key Construction
//!
//! Keys are `esi:<domain>:<id>[:<extra>]` for entities and `<prefix>:<name>`
//! for everything else. The version suffix is appended later by the facade.

use crate::domain::ports::CacheDomain;

/// Namespace shared by every entity key.
pub const ENTITY_NAMESPACE: &str = "esi";

/// Key of the persisted version history.
pub const VERSION_HISTORY_KEY: &str = "cache:version_history";

/// Key of the list of recently active characters.
pub const RECENT_CHARACTERS_KEY: &str = "tracking:recent_characters";

/// Key an entity is stored under.
pub fn entity_key(domain: CacheDomain, id: &str, extra: Option<&str>) -> String {
    match extra {
        Some(extra) => format!("{}:{}:{}:{}", ENTITY_NAMESPACE, domain, id, extra),
        None => format!("{}:{}:{}", ENTITY_NAMESPACE, domain, id),
    }
}

pub fn character(id: &str) -> String {
    entity_key(CacheDomain::Character, id, None)
}

pub fn corporation(id: &str) -> String {
    entity_key(CacheDomain::Corporation, id, None)
}

pub fn alliance(id: &str) -> String {
    entity_key(CacheDomain::Alliance, id, None)
}

pub fn system(id: &str) -> String {
    entity_key(CacheDomain::System, id, None)
}

pub fn type_info(id: &str) -> String {
    entity_key(CacheDomain::Type, id, None)
}

pub fn killmail(id: &str, hash: &str) -> String {
    entity_key(CacheDomain::Killmail, id, Some(hash))
}

/// `<prefix>:<name>` key.
pub fn prefixed(prefix: &str, name: &str) -> String {
    format!("{}:{}", prefix, name)
}

/// Backup of the version history taken before deploying `version`.
pub fn version_backup(version: &str) -> String {
    prefixed("cache:version_backup", version)
}

/// A key has at least one separator and at least two non-empty segments.
pub fn is_valid_key(key: &str) -> bool {
    key.contains(':') && key.split(':').filter(|s| !s.is_empty()).count() >= 2
}

/// Match `key` against a pattern where `*` matches any run of characters.
pub fn matches_pattern(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !key.starts_with(first) || key.len() < first.len() + last.len() || !key.ends_with(last) {
        return false;
    }

    let mut rest = &key[first.len()..key.len() - last.len()];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(idx) => rest = &rest[idx + middle.len()..],
            None => return false,
        }
    }
    true
}
