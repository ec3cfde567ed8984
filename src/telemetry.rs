use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber, filtered by `RUST_LOG` (default `info`).
/// Safe to call more than once.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();
}

/// `jane@gmail.com` -> `j***@g***`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((user, domain)) => format!("{}***@{}***", first_char(user), first_char(domain)),
        None => "***".to_string(),
    }
}

/// `+923001234567` -> `+92***567`
pub fn mask_phone(phone: &str) -> String {
    let chars: Vec<char> = phone.chars().collect();
    if chars.len() < 7 {
        return "***".to_string();
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{head}***{tail}")
}

fn first_char(s: &str) -> String {
    s.chars().next().map(String::from).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_email() {
        assert_eq!(mask_email("jane.doe@gmail.com"), "j***@g***");
        assert_eq!(mask_email("not-an-email"), "***");
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+923001234567"), "+92***567");
        assert_eq!(mask_phone("+12"), "***");
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
    }
}
