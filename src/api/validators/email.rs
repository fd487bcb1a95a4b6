use super::{ValidationError, Validator};

const MAX_EMAIL_LEN: usize = 254;

pub struct EmailValidator;

impl EmailValidator {
    pub fn new() -> Self {
        Self
    }

    fn is_valid_label(label: &str) -> bool {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_alphanumeric() || c == '-')
    }
}

impl Default for EmailValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator for EmailValidator {
    fn validate(&self, input: &str) -> Result<(), ValidationError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ValidationError::new("email", "Please provide your email"));
        }
        let invalid = || ValidationError::new("email", "Please provide a valid email");
        if s.len() > MAX_EMAIL_LEN || s.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        let (local, domain) = s.rsplit_once('@').ok_or_else(invalid)?;
        if local.is_empty() || local.contains('@') || local.starts_with('.') || local.ends_with('.') {
            return Err(invalid());
        }

        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() < 2 || !labels.iter().all(|l| Self::is_valid_label(l)) {
            return Err(invalid());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        let v = EmailValidator::new();
        assert!(v.validate("reader@example.com").is_ok());
        assert!(v.validate("first.last+news@mail.example.co.in").is_ok());
        assert!(v.validate("  padded@example.com ").is_ok());
    }

    #[test]
    fn test_invalid_emails() {
        let v = EmailValidator::new();
        for bad in ["", "plain", "@example.com", "a@", "a@localhost", "a b@example.com", "a@-bad.com", "a@@example.com", ".a@example.com"] {
            assert!(v.validate(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_empty_message() {
        let err = EmailValidator::new().validate(" ").unwrap_err();
        assert_eq!(err.message, "Please provide your email");
        assert_eq!(err.field, "email");
    }
}
