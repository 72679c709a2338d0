//! `{{key}}` placeholder substitution for text messages.
//!
//! Single pass, no nesting or conditionals: substituted values are never
//! rescanned. Unknown keys and absent profile fields render as empty text.

use std::sync::OnceLock;

use cd_common::ContactProfile;
use regex::{Captures, Regex};

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\{\{\s*([^{}]*?)\s*\}\}").expect("placeholder pattern is valid"))
}

/// Profile value for a placeholder key, accepting Portuguese aliases
pub fn profile_value<'a>(profile: &'a ContactProfile, key: &str) -> Option<&'a str> {
    match key.to_lowercase().as_str() {
        "name" | "nome" => profile.name.as_deref(),
        "email" | "e-mail" => profile.email.as_deref(),
        "company" | "empresa" => profile.company.as_deref(),
        "phone" | "telefone" | "contact" | "contato" => Some(profile.phone.as_str()),
        _ => None,
    }
}

/// Render `template` against an optional contact profile
pub fn render(template: &str, profile: Option<&ContactProfile>) -> String {
    placeholder_pattern()
        .replace_all(template, |caps: &Captures| {
            profile
                .and_then(|p| profile_value(p, &caps[1]))
                .unwrap_or_default()
                .to_string()
        })
        .into_owned()
}
