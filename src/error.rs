use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Validation(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// HTTP status the relay answers with when this error reaches a handler.
    pub fn status(&self) -> u16 {
        match self {
            RelayError::Validation(_) => 400,
            RelayError::NotFound(_) => 404,
            RelayError::Delivery(_) | RelayError::Network(_) => 502,
            RelayError::Configuration(_) | RelayError::Io(_) => 500,
        }
    }
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_status_codes() {
        assert_eq!(RelayError::Validation("x".into()).status(), 400);
        assert_eq!(RelayError::Configuration("x".into()).status(), 500);
        assert_eq!(RelayError::Delivery("gone".into()).status(), 502);
        assert_eq!(RelayError::NotFound("offline".into()).status(), 404);
    }

    #[test]
    fn configuration_message_is_bare() {
        let err = RelayError::Configuration("VAPID keys not configured".into());
        assert_eq!(err.to_string(), "VAPID keys not configured");
    }
}
