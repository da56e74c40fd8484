//! Template token expansion for per-recipient personalization

use chrono::Local;
use embermail_common::types::Recipient;
use rand::Rng;
use regex::Regex;
use uuid::Uuid;

const ALPHANUMERIC: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";

const DEFAULT_RANDOM_LEN: usize = 8;
const DEFAULT_DIGIT_LEN: usize = 6;

/// Expands `{...}` tokens in message text. Pure string-to-string; the only
/// non-determinism is the process-wide random source behind the
/// `{random*}` and `{uuid}` tokens.
pub struct TemplateExpander {
    qualified: Regex,
}

impl Default for TemplateExpander {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateExpander {
    pub fn new() -> Self {
        let qualified =
            Regex::new(r"\{(random_lower|random_upper|random_digit|random):(\d{1,4})\}").unwrap();
        Self { qualified }
    }

    /// Expand all supported tokens. Unresolvable tokens (e.g. `{email}`
    /// without a recipient context) are left verbatim, never an error.
    /// Length-qualified random tokens go first, then unqualified ones,
    /// then date/time/uuid, then recipient tokens. Tokens do not nest.
    pub fn expand(&self, text: &str, recipient: Option<&Recipient>) -> String {
        let mut out = self
            .qualified
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let len: usize = caps[2].parse().unwrap_or(DEFAULT_RANDOM_LEN);
                match &caps[1] {
                    "random" => random_string(ALPHANUMERIC, len),
                    "random_lower" => random_string(LOWERCASE, len),
                    "random_upper" => random_string(UPPERCASE, len),
                    "random_digit" => random_string(DIGITS, len),
                    _ => caps[0].to_string(),
                }
            })
            .into_owned();

        out = replace_each(&out, "{random}", || {
            random_string(ALPHANUMERIC, DEFAULT_RANDOM_LEN)
        });
        out = replace_each(&out, "{random_lower}", || {
            random_string(LOWERCASE, DEFAULT_RANDOM_LEN)
        });
        out = replace_each(&out, "{random_upper}", || {
            random_string(UPPERCASE, DEFAULT_RANDOM_LEN)
        });
        out = replace_each(&out, "{random_digit}", || {
            random_string(DIGITS, DEFAULT_DIGIT_LEN)
        });

        if out.contains("{date}") {
            out = out.replace("{date}", &Local::now().format("%Y-%m-%d").to_string());
        }
        if out.contains("{time}") {
            out = out.replace("{time}", &Local::now().format("%H:%M").to_string());
        }
        out = replace_each(&out, "{uuid}", || {
            let id = Uuid::new_v4().simple().to_string();
            id[..8].to_string()
        });

        if let Some(recipient) = recipient {
            let identity = recipient.identity();
            out = out.replace("{email}", identity);
            if out.contains("{name}") {
                out = out.replace("{name}", &display_name(identity));
            }
        }

        out
    }
}

/// Replace every occurrence of `token`, drawing a fresh value each time
fn replace_each(text: &str, token: &str, mut generate: impl FnMut() -> String) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find(token) {
        out.push_str(&rest[..idx]);
        out.push_str(&generate());
        rest = &rest[idx + token.len()..];
    }
    out.push_str(rest);
    out
}

fn random_string(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| alphabet[rng.random_range(0..alphabet.len())] as char)
        .collect()
}

/// `{name}`: local part of the address with `.`, `_`, `-` as spaces,
/// title-cased
fn display_name(identity: &str) -> String {
    let local = identity.split('@').next().unwrap_or(identity);
    local
        .split(['.', '_', '-'])
        .filter(|word| !word.is_empty())
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_random_token_length_contract() {
        let expander = TemplateExpander::new();

        let out = expander.expand("{random:12}", None);
        assert_eq!(out.len(), 12);
        assert!(out.bytes().all(|b| b.is_ascii_alphanumeric()));

        let out = expander.expand("{random_digit:6}", None);
        assert_eq!(out.len(), 6);
        assert!(out.bytes().all(|b| b.is_ascii_digit()));

        let out = expander.expand("{random_lower:4}", None);
        assert_eq!(out.len(), 4);
        assert!(out.bytes().all(|b| b.is_ascii_lowercase()));

        let out = expander.expand("{random_upper:4}", None);
        assert_eq!(out.len(), 4);
        assert!(out.bytes().all(|b| b.is_ascii_uppercase()));
    }

    #[test]
    fn test_default_lengths() {
        let expander = TemplateExpander::new();
        assert_eq!(expander.expand("{random}", None).len(), 8);
        assert_eq!(expander.expand("{random_digit}", None).len(), 6);
    }

    #[test]
    fn test_each_occurrence_gets_a_fresh_draw() {
        let expander = TemplateExpander::new();
        let out = expander.expand("{random:16}-{random:16}", None);
        let parts: Vec<&str> = out.split('-').collect();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].len(), 16);
        assert_eq!(parts[1].len(), 16);
        // 62^16 draws colliding would point at a broken generator
        assert_ne!(parts[0], parts[1]);
    }

    #[test]
    fn test_uuid_token_is_eight_hex_chars() {
        let expander = TemplateExpander::new();
        let out = expander.expand("{uuid}", None);
        assert_eq!(out.len(), 8);
        assert!(out.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn test_non_random_tokens_are_idempotent() {
        let expander = TemplateExpander::new();
        let recipient = Recipient::email("john.doe@example.com");
        let template = "On {date}: {email} aka {name}";

        let first = expander.expand(template, Some(&recipient));
        let second = expander.expand(template, Some(&recipient));
        assert_eq!(first, second);
        assert!(first.contains("john.doe@example.com"));
        assert!(first.contains("John Doe"));
    }

    #[test]
    fn test_name_title_cases_separators() {
        let expander = TemplateExpander::new();
        let recipient = Recipient::email("jane_van-der.berg@example.com");
        let out = expander.expand("{name}", Some(&recipient));
        assert_eq!(out, "Jane Van Der Berg");
    }

    #[test]
    fn test_unresolved_tokens_stay_verbatim() {
        let expander = TemplateExpander::new();
        assert_eq!(expander.expand("hi {email}", None), "hi {email}");
        assert_eq!(expander.expand("hi {unknown}", None), "hi {unknown}");
    }

    #[test]
    fn test_date_format() {
        let expander = TemplateExpander::new();
        let out = expander.expand("{date}", None);
        assert_eq!(out.len(), 10);
        assert_eq!(out.as_bytes()[4], b'-');
        assert_eq!(out.as_bytes()[7], b'-');
    }

    #[test]
    fn test_plain_text_passes_through() {
        let expander = TemplateExpander::new();
        assert_eq!(
            expander.expand("no tokens here", None),
            "no tokens here"
        );
    }
}
