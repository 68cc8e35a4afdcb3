//! URL-safe shop slugs.

/// Maximum length of a generated slug.
pub const MAX_SLUG_LENGTH: usize = 48;

/// Errors that can occur when deriving a slug.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SlugError {
    /// The input contains no ASCII letters or digits.
    #[error("name must contain at least one letter or digit")]
    Empty,
}

/// Derive a slug from a display name.
///
/// ASCII letters and digits are kept (lowercased); every other run of
/// characters collapses into a single `-`. Leading and trailing dashes are
/// dropped and the result is capped at [`MAX_SLUG_LENGTH`].
///
/// ```
/// use atelier_core::slugify;
///
/// assert_eq!(slugify("Café Noir — Paris").unwrap(), "caf-noir-paris");
/// assert!(slugify("***").is_err());
/// ```
///
/// # Errors
///
/// Returns [`SlugError::Empty`] if nothing usable remains.
pub fn slugify(name: &str) -> Result<String, SlugError> {
    let mut slug = String::with_capacity(name.len().min(MAX_SLUG_LENGTH));
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }

        if slug.len() >= MAX_SLUG_LENGTH {
            break;
        }
    }

    slug.truncate(MAX_SLUG_LENGTH);
    let trimmed = slug.trim_end_matches('-');
    if trimmed.is_empty() {
        return Err(SlugError::Empty);
    }
    Ok(trimmed.to_owned())
}
