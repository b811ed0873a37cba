//! Small input-shape helpers shared by the command modules.

use std::str::FromStr;

use validator::ValidateEmail;

use crate::error::FieldErrors;

/// Trimmed, non-empty text or a "required" error on `field`.
pub fn required_text(
    errors: &mut FieldErrors,
    field: &str,
    label: &str,
    value: Option<&str>,
) -> Option<String> {
    match optional_text(value) {
        Some(text) => {
            if text.chars().count() > 255 {
                errors.add(field, format!("The {} may not be greater than 255 characters.", label));
                None
            } else {
                Some(text)
            }
        }
        None => {
            errors.add(field, format!("The {} field is required.", label));
            None
        }
    }
}

/// Trimmed text, with blank strings treated as absent.
pub fn optional_text(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// One of a fixed set of values, parsed into its enum.
pub fn required_choice<T: FromStr>(
    errors: &mut FieldErrors,
    field: &str,
    label: &str,
    value: Option<&str>,
) -> Option<T> {
    let text = match optional_text(value) {
        Some(text) => text,
        None => {
            errors.add(field, format!("The {} field is required.", label));
            return None;
        }
    };
    match text.parse() {
        Ok(choice) => Some(choice),
        Err(_) => {
            errors.add(field, format!("The selected {} is invalid.", label));
            None
        }
    }
}

pub fn is_email(value: &str) -> bool {
    value.validate_email()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeliveryType;

    #[test]
    fn test_required_text() {
        let mut errors = FieldErrors::new();
        assert_eq!(
            required_text(&mut errors, "customer_name", "customer name", Some("  Ada ")),
            Some("Ada".to_string())
        );
        assert!(required_text(&mut errors, "customer_phone", "customer phone", Some("   ")).is_none());
        assert_eq!(
            errors.get("customer_phone").unwrap(),
            ["The customer phone field is required."]
        );
    }

    #[test]
    fn test_required_choice() {
        let mut errors = FieldErrors::new();
        let pickup: Option<DeliveryType> =
            required_choice(&mut errors, "delivery_type", "delivery type", Some("pickup"));
        assert_eq!(pickup, Some(DeliveryType::Pickup));

        let drone: Option<DeliveryType> =
            required_choice(&mut errors, "delivery_type", "delivery type", Some("drone"));
        assert!(drone.is_none());
        assert_eq!(
            errors.get("delivery_type").unwrap(),
            ["The selected delivery type is invalid."]
        );
    }

    #[test]
    fn test_is_email() {
        assert!(is_email("ada@example.com"));
        assert!(!is_email("ada.example.com"));
        assert!(!is_email("@example.com"));
        assert!(!is_email("ada@@example.com"));
        assert!(!is_email("ada lovelace@example.com"));
    }
}
