//! Carrier email-to-SMS gateway domains

/// Gateway domains for major carriers, keyed by normalized carrier name
const GATEWAYS: &[(&str, &str)] = &[
    ("att", "txt.att.net"),
    ("tmobile", "tmomail.net"),
    ("verizon", "vtext.com"),
    ("sprint", "messaging.sprintpcs.com"),
    ("uscellular", "email.uscc.net"),
    ("metropcs", "mymetropcs.com"),
    ("boostmobile", "sms.myboostmobile.com"),
    ("cricket", "sms.cricketwireless.net"),
    ("virginmobile", "vmobl.com"),
    ("googlefi", "msg.fi.google.com"),
    ("republicwireless", "text.republicwireless.com"),
    ("straighttalk", "vtext.com"),
    ("mintmobile", "tmomail.net"),
    ("xfinitymobile", "vtext.com"),
    ("visible", "vtext.com"),
];

/// Carrier sentinel that tries the major-carrier domains in order
pub const AUTO_CARRIER: &str = "auto";

/// Domains tried for the `auto` carrier, largest subscriber base first
pub const AUTO_DOMAINS: [&str; 4] = [
    "vtext.com",
    "tmomail.net",
    "txt.att.net",
    "messaging.sprintpcs.com",
];

/// The full carrier table
pub fn all() -> &'static [(&'static str, &'static str)] {
    GATEWAYS
}

/// Whether the carrier is the `auto` sentinel
pub fn is_auto(carrier: &str) -> bool {
    carrier.trim().eq_ignore_ascii_case(AUTO_CARRIER)
}

/// Resolve a carrier name to its gateway domain. Case and punctuation
/// insensitive ("AT&T", "at&t" and "att" all match); a value containing a
/// dot is taken as a literal gateway domain.
pub fn resolve(carrier: &str) -> Option<String> {
    let trimmed = carrier.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.contains('.') {
        return Some(trimmed.to_ascii_lowercase());
    }
    let key = normalize_carrier(trimmed);
    GATEWAYS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, domain)| (*domain).to_string())
}

fn normalize_carrier(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}
