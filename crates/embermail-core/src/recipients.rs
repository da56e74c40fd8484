//! Recipient list parsing

use embermail_common::types::{normalize_recipients, Recipient};

/// Carrier assumed for single-column SMS rows
const DEFAULT_CARRIER: &str = "AT&T";

/// Parse email recipients from pasted text or a file body. Entries are
/// split on newlines and commas, anything without `@` is dropped, and the
/// survivors are normalized and deduped with the first occurrence winning.
pub fn parse_email_text(content: &str) -> Vec<Recipient> {
    let raw: Vec<Recipient> = content
        .lines()
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|cell| !cell.is_empty() && cell.contains('@'))
        .map(Recipient::email)
        .collect();
    normalize_recipients(&raw)
}

/// Parse `phone,carrier` CSV rows. Single-column rows get the default
/// carrier; rows whose number fails validation drop out silently.
pub fn parse_sms_csv(content: &str) -> Vec<Recipient> {
    let raw: Vec<Recipient> = content
        .lines()
        .filter_map(|line| {
            let mut cells = line.split(',').map(str::trim);
            let phone = cells.next()?;
            if phone.is_empty() {
                return None;
            }
            let carrier = cells
                .next()
                .filter(|cell| !cell.is_empty())
                .unwrap_or(DEFAULT_CARRIER);
            Some(Recipient::phone(phone, carrier))
        })
        .collect();
    normalize_recipients(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_email_text_drops_malformed_and_duplicates() {
        // a@x.com twice and one malformed entry: two unique recipients
        let content = "a@x.com\nbad-email\nb@x.com, a@x.com\n";
        let recipients = parse_email_text(content);
        assert_eq!(
            recipients,
            vec![Recipient::email("a@x.com"), Recipient::email("b@x.com")]
        );
    }

    #[test]
    fn test_parse_email_text_normalizes_case() {
        let recipients = parse_email_text("User@Example.com\nuser@example.com");
        assert_eq!(recipients, vec![Recipient::email("user@example.com")]);
    }

    #[test]
    fn test_parse_sms_csv() {
        let content = "3213675667,Verizon\n4075551234\nshort,att\n";
        let recipients = parse_sms_csv(content);
        assert_eq!(
            recipients,
            vec![
                Recipient::phone("3213675667", "Verizon"),
                Recipient::phone("4075551234", "AT&T"),
            ]
        );
    }

    #[test]
    fn test_parse_sms_csv_dedupes_by_last_ten_digits() {
        let content = "+1 321 367 5667,verizon\n3213675667,att\n";
        let recipients = parse_sms_csv(content);
        assert_eq!(recipients.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_email_text("").is_empty());
        assert!(parse_sms_csv("").is_empty());
    }
}
