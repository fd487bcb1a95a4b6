use super::{ValidationError, Validator};

const MIN_DIGITS: usize = 7;
const MAX_DIGITS: usize = 15;

/// E.164-style numbers: optional leading `+`, then 7-15 digits. Spaces and dashes are tolerated.
pub struct PhoneValidator;

impl PhoneValidator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PhoneValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator for PhoneValidator {
    fn validate(&self, input: &str) -> Result<(), ValidationError> {
        let s = input.trim();
        if s.is_empty() {
            return Err(ValidationError::new("phone", "Please provide your phone number"));
        }

        let body = s.strip_prefix('+').unwrap_or(s);
        if !body.chars().all(|c| c.is_ascii_digit() || c == ' ' || c == '-') {
            return Err(ValidationError::new("phone", "Please provide a valid phone number"));
        }
        let digits = body.chars().filter(char::is_ascii_digit).count();
        if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits) {
            return Err(ValidationError::new(
                "phone",
                format!("Phone number must have {}-{} digits", MIN_DIGITS, MAX_DIGITS),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_numbers() {
        let v = PhoneValidator::new();
        assert!(v.validate("+919876543210").is_ok());
        assert!(v.validate("9876543210").is_ok());
        assert!(v.validate("+1 555-010-9999").is_ok());
    }

    #[test]
    fn test_invalid_numbers() {
        let v = PhoneValidator::new();
        assert!(v.validate("").is_err());
        assert!(v.validate("12345").is_err());
        assert!(v.validate("+1234567890123456").is_err());
        assert!(v.validate("call me").is_err());
        assert!(v.validate("++919876543210").is_err());
    }
}
