use once_cell::sync::Lazy;
use regex::Regex;

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex"));

const KNOWN_DOMAINS: [&str; 4] = ["gmail.com", "yahoo.com", "hotmail.com", "outlook.com"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContactError {
    #[error("Please provide a valid name.")]
    InvalidName,
    #[error("Please provide a valid email address.")]
    InvalidEmail,
    #[error("Please provide a valid phone number.")]
    InvalidPhone,
}

pub fn normalize_name(raw: &str) -> Result<String, ContactError> {
    let name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if name.chars().count() < 2 {
        return Err(ContactError::InvalidName);
    }
    Ok(name)
}

/// Repairs spoken-email artifacts: `jane dot doe at gmail dot com` becomes
/// `jane.doe@gmail.com`.
pub fn format_email(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase().replace("at the rate of", " at ").replace("at the rate", " at ");
    let mut email: String = lowered
        .split_whitespace()
        .map(|token| match token {
            "at" => "@",
            "dot" | "period" => ".",
            "underscore" => "_",
            "dash" | "hyphen" => "-",
            other => other,
        })
        .collect();

    if !email.contains('@') {
        if let Some(domain) = KNOWN_DOMAINS.iter().find(|d| email.ends_with(*d)) {
            let local = email[..email.len() - domain.len()].trim_end_matches('.');
            email = format!("{local}@{domain}");
        }
    }

    while email.contains("@@") {
        email = email.replace("@@", "@");
    }
    email
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL.is_match(email.trim())
}

pub fn normalize_email(raw: &str) -> Result<String, ContactError> {
    let email = format_email(raw);
    if is_valid_email(&email) {
        Ok(email)
    } else {
        Err(ContactError::InvalidEmail)
    }
}

/// Keeps the digits and forces a single leading `+`.
pub fn format_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return String::new();
    }
    format!("+{digits}")
}

/// E.164 length: 7 to 15 digits after the `+`.
pub fn is_valid_phone(phone: &str) -> bool {
    let Some(digits) = phone.strip_prefix('+') else {
        return false;
    };
    digits.chars().all(|c| c.is_ascii_digit()) && (7..=15).contains(&digits.len())
}

pub fn normalize_phone(raw: &str) -> Result<String, ContactError> {
    let phone = format_phone(raw);
    if is_valid_phone(&phone) {
        Ok(phone)
    } else {
        Err(ContactError::InvalidPhone)
    }
}
