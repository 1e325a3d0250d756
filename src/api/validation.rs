//! Input validation for API requests.
//!
//! Validation functions return `Result<(), String>` so handlers can collect
//! failures per field through the `ValidationErrorBuilder` in the `error`
//! module.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Regex for validating email addresses
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?)+$"
    ).unwrap();

    /// Regex for validating domain names
    static ref DOMAIN_REGEX: Regex = Regex::new(
        r"^[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?)*$"
    ).unwrap();
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email is too long (max 254 characters)".to_string());
    }

    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate password strength
pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }

    if password.len() < 8 {
        return Err("Password must be at least 8 characters".to_string());
    }

    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }

    let has_letter = password.chars().any(|c| c.is_ascii_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err("Password must contain at least one letter and one digit".to_string());
    }

    Ok(())
}

/// Validate a bot name
pub fn validate_bot_name(name: &str) -> Result<(), String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err("Bot name is required".to_string());
    }

    if trimmed.len() < 2 {
        return Err("Bot name is too short (min 2 characters)".to_string());
    }

    if trimmed.len() > 100 {
        return Err("Bot name is too long (max 100 characters)".to_string());
    }

    Ok(())
}

/// Validate a bot description
pub fn validate_description(description: &str) -> Result<(), String> {
    if description.trim().is_empty() {
        return Err("Description is required".to_string());
    }

    if description.len() > 2000 {
        return Err("Description is too long (max 2000 characters)".to_string());
    }

    Ok(())
}

/// Validate the customer domain a bot is embedded on
pub fn validate_bot_domain(domain: &str) -> Result<(), String> {
    if domain.is_empty() {
        return Err("Domain is required".to_string());
    }

    if domain.len() > 253 {
        return Err("Domain name is too long (max 253 characters)".to_string());
    }

    if !DOMAIN_REGEX.is_match(domain) {
        return Err("Invalid domain name format".to_string());
    }

    Ok(())
}

/// Validate a chat message body
pub fn validate_message_body(body: &str) -> Result<(), String> {
    if body.trim().is_empty() {
        return Err("Message body is required".to_string());
    }

    if body.len() > 10_000 {
        return Err("Message body is too long (max 10000 characters)".to_string());
    }

    Ok(())
}

/// Validate an issue subject line
pub fn validate_subject(subject: &str) -> Result<(), String> {
    if subject.trim().is_empty() {
        return Err("Subject is required".to_string());
    }

    if subject.len() > 200 {
        return Err("Subject is too long (max 200 characters)".to_string());
    }

    Ok(())
}

/// Validate an issue report body
pub fn validate_issue_body(body: &str) -> Result<(), String> {
    if body.trim().is_empty() {
        return Err("Body is required".to_string());
    }

    if body.len() > 5000 {
        return Err("Body is too long (max 5000 characters)".to_string());
    }

    Ok(())
}

/// Validate a UUID string
pub fn validate_uuid(id: &str, field_name: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err(format!("{} is required", field_name));
    }

    if uuid::Uuid::parse_str(id).is_err() {
        return Err(format!("Invalid {} format", field_name));
    }

    Ok(())
}
