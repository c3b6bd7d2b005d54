// crates/core/src/error.rs
use thiserror::Error;

/// Bad input rejected at the point of the request, before any I/O happens.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Email is required")]
    EmptyEmail,

    #[error("Password is required")]
    EmptyPassword,

    #[error("Consent is required to create an account")]
    ConsentRequired,

    #[error("Session name must not be blank")]
    BlankSessionName,

    #[error("Invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ValidationError {
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Trim and check the email/password pair shared by login and signup.
pub fn validate_credentials(email: &str, password: &str) -> Result<(String, String), ValidationError> {
    let email = email.trim();
    let password = password.trim();
    if email.is_empty() {
        return Err(ValidationError::EmptyEmail);
    }
    if password.is_empty() {
        return Err(ValidationError::EmptyPassword);
    }
    Ok((email.to_string(), password.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        assert_eq!(ValidationError::EmptyEmail.to_string(), "Email is required");
        let err = ValidationError::invalid("sample value", "must be non-negative");
        assert_eq!(err.to_string(), "Invalid sample value: must be non-negative");
    }

    #[test]
    fn test_validate_credentials_trims() {
        let (email, password) = validate_credentials("  a@x.com ", " pw ").unwrap();
        assert_eq!(email, "a@x.com");
        assert_eq!(password, "pw");
    }

    #[test]
    fn test_validate_credentials_rejects_blank() {
        assert_eq!(
            validate_credentials("   ", "pw").unwrap_err(),
            ValidationError::EmptyEmail
        );
        assert_eq!(
            validate_credentials("a@x.com", "\t").unwrap_err(),
            ValidationError::EmptyPassword
        );
    }
}
