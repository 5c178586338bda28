//! Sanitises caller-supplied names into backend-legal identifiers (spec
//! component C8).

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

const DEFAULT_MAX_LEN: usize = 63;

/// Normalise `input` into an identifier of length 1..=63 matching
/// `[A-Za-z0-9][A-Za-z0-9-]*[A-Za-z0-9]` (a single-character name only has
/// to be alphanumeric).
pub fn normalise_hostname(input: &str) -> Result<String> {
    normalise_hostname_capped(input, DEFAULT_MAX_LEN)
}

/// As [`normalise_hostname`] but with an explicit length cap, since some
/// backends (VM tools in particular) impose a shorter limit than 63.
pub fn normalise_hostname_capped(input: &str, max_len: usize) -> Result<String> {
    // Step 1: strip every character not in [A-Za-z0-9-].
    let stripped: String = input.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '-').collect();

    // Step 2: strip leading non-alphanumeric characters.
    let leading_trimmed = stripped.trim_start_matches(|c: char| !c.is_ascii_alphanumeric());

    // Step 3: truncate to max_len.
    let truncated: String = leading_trimmed.chars().take(max_len).collect();

    // Step 4: strip trailing non-alphanumeric characters.
    let result = truncated.trim_end_matches(|c: char| !c.is_ascii_alphanumeric()).to_string();

    // Step 5: empty result is a configuration error.
    if result.is_empty() {
        return Err(Error::configuration(format!(
            "Could not derive a valid hostname from {input:?}: result was empty after normalisation."
        )));
    }

    Ok(result)
}

/// Normalise `input` and append a deterministic 20-hex-digit hash of the
/// original name, separated by `-`, so the result is globally unique even
/// after truncation. The pre-hash portion is truncated to fit within `cap`.
pub fn normalise_hostname_unique(input: &str, cap: usize) -> Result<String> {
    const SUFFIX_LEN: usize = 20;
    const SEPARATOR_LEN: usize = 1;

    let suffix = deterministic_suffix(input, SUFFIX_LEN);
    let budget = cap.saturating_sub(SUFFIX_LEN + SEPARATOR_LEN).max(1);

    let base = normalise_hostname_capped(input, budget)?;
    Ok(format!("{base}-{suffix}"))
}

fn deterministic_suffix(input: &str, len: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..len].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_configuration_error() {
        assert!(matches!(normalise_hostname(""), Err(Error::Configuration { .. })));
    }

    #[test]
    fn lone_dash_is_configuration_error() {
        assert!(matches!(normalise_hostname("-"), Err(Error::Configuration { .. })));
    }

    #[test]
    fn long_alphanumeric_name_is_truncated_to_63() {
        let input: String = std::iter::repeat('a').take(64).collect();
        let result = normalise_hostname(&input).unwrap();
        assert_eq!(result.len(), 63);
    }

    #[test]
    fn strips_unicode_and_symbols() {
        let result = normalise_hostname("my café!!host_42").unwrap();
        assert_eq!(result, "mycafhost42");
    }

    #[test]
    fn strips_leading_and_trailing_dashes() {
        let result = normalise_hostname("--build--").unwrap();
        assert_eq!(result, "build");
    }

    #[test]
    fn is_idempotent() {
        let input = "  some_Weird--Name99  ";
        let once = normalise_hostname(input).unwrap();
        let twice = normalise_hostname(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn unique_variant_fits_the_cap() {
        let name = normalise_hostname_unique("my-project", 40).unwrap();
        assert!(name.len() <= 40);
        assert!(name.contains('-'));
    }

    #[test]
    fn unique_variant_is_deterministic() {
        let a = normalise_hostname_unique("my-project", 63).unwrap();
        let b = normalise_hostname_unique("my-project", 63).unwrap();
        assert_eq!(a, b);
    }
}
