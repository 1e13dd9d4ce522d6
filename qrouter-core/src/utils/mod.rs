use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;

#[cfg(feature = "serde")]
pub(crate) mod serde;

static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)\}").unwrap());

/// Replace every `${NAME}` with the value of the environment variable `NAME`
/// (empty if unset).
pub fn replace_env_var_in_string(input: &str) -> Cow<'_, str> {
    ENV_VAR_PATTERN.replace_all(input, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
}
