//! Local checks applied to credentials before anything is sent to the server.

use once_cell::sync::Lazy;
use regex::Regex;

/// Minimum password length, for both login and registration.
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Symbols a registration password may (and must) draw from.
pub const PASSWORD_SYMBOLS: &str = "@$!%*?&";

static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("Email regex should be valid")
});

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email)
}

/// One line of the password checklist shown next to a registration form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordRequirement {
    pub text: &'static str,
    pub met: bool,
}

pub fn password_requirements(password: &str) -> Vec<PasswordRequirement> {
    vec![
        PasswordRequirement {
            text: "Use 8 or more characters",
            met: password.chars().count() >= MIN_PASSWORD_LENGTH,
        },
        PasswordRequirement {
            text: "Include at least one symbol (@$!%*?&)",
            met: password.chars().any(is_password_symbol),
        },
        PasswordRequirement {
            text: "Include at least one number",
            met: password.chars().any(|c| c.is_ascii_digit()),
        },
        PasswordRequirement {
            text: "Include uppercase and lowercase letters",
            met: password.chars().any(|c| c.is_ascii_lowercase())
                && password.chars().any(|c| c.is_ascii_uppercase()),
        },
    ]
}

/// Registration policy: every checklist item met, and nothing outside
/// ASCII letters, digits and the allowed symbols.
pub fn is_valid_password(password: &str) -> bool {
    password_requirements(password).iter().all(|r| r.met)
        && password
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || is_password_symbol(c))
}

fn is_password_symbol(c: char) -> bool {
    PASSWORD_SYMBOLS.contains(c)
}

pub fn validate_login(email: &str, password: &str) -> Result<(), String> {
    if email.is_empty() || password.is_empty() {
        return Err("Email and password are required".to_string());
    }
    if !is_valid_email(email) {
        return Err("Invalid email format".to_string());
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        ));
    }
    Ok(())
}

pub fn validate_registration(
    first_name: &str,
    last_name: &str,
    email: &str,
    password: &str,
) -> Result<(), String> {
    if first_name.trim().is_empty()
        || last_name.trim().is_empty()
        || email.is_empty()
        || password.is_empty()
    {
        return Err("All fields are required".to_string());
    }
    if !is_valid_email(email) {
        return Err("Invalid email format".to_string());
    }
    if !is_valid_password(password) {
        return Err(
            "Password must be at least 8 characters and include uppercase, lowercase, number, and special character"
                .to_string(),
        );
    }
    Ok(())
}
