//! Node identity: the origin name that tags every log entry and addressed message.

/// Fresh random origin: a v4 UUID in simple (32 hex digit) form.
pub fn generate_origin() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Use `configured` if present, otherwise generate one.
/// Origins must be non-empty and free of whitespace so they survive console parsing.
pub fn resolve_origin(configured: Option<&str>) -> Result<String, OriginError> {
    match configured {
        None => Ok(generate_origin()),
        Some(name) => {
            if name.is_empty() {
                return Err(OriginError::Empty);
            }
            if name.chars().any(char::is_whitespace) {
                return Err(OriginError::Whitespace(name.to_string()));
            }
            Ok(name.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OriginError {
    #[error("origin must not be empty")]
    Empty,
    #[error("origin {0:?} contains whitespace")]
    Whitespace(String),
}
