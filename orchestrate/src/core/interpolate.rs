//! `{token}` placeholder substitution for agent commands.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern should be valid"));

/// Values available to agent templates, keyed by token name.
pub type Replacements = BTreeMap<&'static str, String>;

/// Replace each `{name}` with its value. Unknown tokens are left verbatim.
pub fn interpolate(template: &str, values: &Replacements) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match values.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}
