//! Input validation applied before anything touches persistence.

pub const MIN_RATING: f64 = 0.0;
pub const MAX_RATING: f64 = 5.0;

pub const MAX_STORE_NAME_LEN: usize = 120;
pub const MAX_ADDRESS_LEN: usize = 255;
pub const MAX_PHONE_LEN: usize = 20;
pub const MAX_CATEGORY_LEN: usize = 50;
pub const MAX_TITLE_LEN: usize = 120;
pub const MAX_CONTENT_LEN: usize = 5000;
pub const MAX_DESCRIPTION_LEN: usize = 1000;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("rating must be between 0 and 5, got {0}")]
    InvalidRating(f64),
    #[error("{0} is required")]
    Required(&'static str),
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
}

/// Ratings are inclusive on both ends; NaN and infinities are refused.
pub fn validate_rating(rating: f64) -> Result<f64, ValidationError> {
    if rating.is_finite() && (MIN_RATING..=MAX_RATING).contains(&rating) {
        Ok(rating)
    } else {
        Err(ValidationError::InvalidRating(rating))
    }
}

/// Trim `value` and require it to be non-empty and at most `max` chars.
pub fn require_text(
    field: &'static str,
    value: &str,
    max: usize,
) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required(field));
    }
    check_len(field, trimmed, max)?;
    Ok(trimmed.to_string())
}

/// Trim an optional value; blank becomes the empty string.
pub fn optional_text(
    field: &'static str,
    value: Option<&str>,
    max: usize,
) -> Result<String, ValidationError> {
    let trimmed = value.map(str::trim).unwrap_or_default();
    check_len(field, trimmed, max)?;
    Ok(trimmed.to_string())
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}

/// Reduce an uploaded filename to `[A-Za-z0-9._-]`, dropping any directory
/// part and replacing everything else with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}
