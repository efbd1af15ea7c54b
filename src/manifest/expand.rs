use std::collections::BTreeMap;
use std::env;

use once_cell::sync::Lazy;
use regex::Regex;

static VAR_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid pattern"));

/// Expand `${NAME}` references against the process environment.
///
/// Unresolved references expand to the empty string, matching the
/// behavior callers rely on for optional overrides.
pub fn expand_str(value: &str) -> String {
    VAR_REF
        .replace_all(value, |caps: &regex::Captures<'_>| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

pub fn expand_in_place(value: &mut String) {
    if value.contains("${") {
        *value = expand_str(value);
    }
}

pub fn expand_opt(value: &mut Option<String>) {
    if let Some(inner) = value.as_mut() {
        expand_in_place(inner);
    }
}

/// Expand the values (not the keys) of a string map.
pub fn expand_map_values(map: &mut BTreeMap<String, String>) {
    for value in map.values_mut() {
        expand_in_place(value);
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;

    #[test]
    fn expands_known_variable() {
        // SAFETY: test-local variable name, no concurrent reader cares.
        unsafe { env::set_var("CLOUD_DEPLOY_TEST_REGION", "eu-west-1") };
        assert_eq!(expand_str("${CLOUD_DEPLOY_TEST_REGION}"), "eu-west-1");
        assert_eq!(
            expand_str("prefix-${CLOUD_DEPLOY_TEST_REGION}-suffix"),
            "prefix-eu-west-1-suffix"
        );
    }

    #[test]
    fn unresolved_reference_becomes_empty() {
        assert_eq!(expand_str("${CLOUD_DEPLOY_TEST_UNSET_VAR}"), "");
        assert_eq!(expand_str("a-${CLOUD_DEPLOY_TEST_UNSET_VAR}-b"), "a--b");
    }

    #[test]
    fn plain_strings_untouched() {
        assert_eq!(expand_str("no references here"), "no references here");
        assert_eq!(expand_str("$HOME is not a braced ref"), "$HOME is not a braced ref");
    }

    #[test]
    fn map_values_expand_but_keys_do_not() {
        unsafe { env::set_var("CLOUD_DEPLOY_TEST_DB", "postgres://db") };
        let mut map = BTreeMap::new();
        map.insert("${KEY}".to_string(), "${CLOUD_DEPLOY_TEST_DB}".to_string());
        expand_map_values(&mut map);
        assert_eq!(map.get("${KEY}").map(String::as_str), Some("postgres://db"));
    }
}
