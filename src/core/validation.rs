// src/core/validation.rs

//! Input alphabets for strings that end up inside remote or local commands.
//!
//! Every command composed from a caller-supplied string is built with a
//! structured argv; these checks are a second, independent layer at the
//! API boundary. Invalid inputs are rejected before any side effect.

use crate::core::errors::ColdStoreError;

/// Image repositories: lowercase alphanumerics plus `.`, `/`, `_`, `-`,
/// between 1 and 128 characters.
pub fn validate_image_repo(repo: &str) -> Result<(), ColdStoreError> {
    if repo.is_empty() || repo.len() > 128 {
        return Err(ColdStoreError::Validation(format!(
            "image repository must be 1-128 characters, got {}",
            repo.len()
        )));
    }
    let ok = repo
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '/' | '_' | '-'));
    if !ok {
        return Err(ColdStoreError::Validation(format!(
            "image repository '{repo}' contains characters outside [a-z0-9./_-]"
        )));
    }
    Ok(())
}

/// Versions: an alphanumeric leading character, then alphanumerics plus
/// `.`, `_`, `-`, between 1 and 64 characters.
pub fn validate_version(version: &str) -> Result<(), ColdStoreError> {
    if version.is_empty() || version.len() > 64 {
        return Err(ColdStoreError::Validation(format!(
            "version must be 1-64 characters, got {}",
            version.len()
        )));
    }
    let mut chars = version.chars();
    let first = chars.next().expect("non-empty checked above");
    if !first.is_ascii_alphanumeric() {
        return Err(ColdStoreError::Validation(format!(
            "version '{version}' must start with an alphanumeric character"
        )));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')) {
        return Err(ColdStoreError::Validation(format!(
            "version '{version}' contains characters outside [A-Za-z0-9._-]"
        )));
    }
    Ok(())
}

/// Workload target suffixes (e.g. `employee`, `customer`): DNS-label shaped.
pub fn validate_target(target: &str) -> Result<(), ColdStoreError> {
    if target.is_empty() || target.len() > 63 {
        return Err(ColdStoreError::Validation(format!(
            "target must be 1-63 characters, got {}",
            target.len()
        )));
    }
    let ok = target
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !ok || target.starts_with('-') || target.ends_with('-') {
        return Err(ColdStoreError::Validation(format!(
            "target '{target}' is not a valid workload suffix"
        )));
    }
    Ok(())
}

/// Pool names share the target alphabet plus `_`.
pub fn validate_pool_name(pool: &str) -> Result<(), ColdStoreError> {
    if pool.is_empty() || pool.len() > 63 {
        return Err(ColdStoreError::Validation("unknown pool".to_string()));
    }
    let ok = pool
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_'));
    if !ok {
        return Err(ColdStoreError::Validation(format!(
            "pool '{pool}' is not a valid pool name"
        )));
    }
    Ok(())
}

/// Masks a secret to its `first5…last5` form for list/debug surfaces.
/// Short secrets are fully redacted so the two halves never overlap.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 10 {
        return "*****".to_string();
    }
    let head: String = chars[..5].iter().collect();
    let tail: String = chars[chars.len() - 5..].iter().collect();
    format!("{head}\u{2026}{tail}")
}
