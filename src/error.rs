use thiserror::Error;

pub type AppResult<T> = std::result::Result<T, AppError>;

/// Identity provider failures, recovered locally and shown on the form.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IdentityError {
    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("User already registered")]
    AlreadyRegistered,

    #[error("Email not confirmed")]
    EmailNotConfirmed,

    #[error("Session expired or invalid")]
    InvalidSession,

    #[error("User profile not found. Please contact support.")]
    ProfileMissing,

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid data: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Validation(String),

    #[error("You must be logged in to {0}")]
    NotAuthenticated(&'static str),

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Cannot move application from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Message suitable for end users. Internal details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Config(_) => {
                "The marketplace backend is not configured. Set SOLVERHUB_URL and SOLVERHUB_ANON_KEY or use the local backend.".to_string()
            }
            AppError::Identity(e) => e.to_string(),
            AppError::NotFound(what) => format!("{what} not found."),
            AppError::Validation(msg) => msg.clone(),
            AppError::NotAuthenticated(_)
            | AppError::Forbidden(_)
            | AppError::InvalidTransition { .. }
            | AppError::Unsupported(_) => self.to_string(),
            AppError::Network(_) => {
                "Could not reach the marketplace. Please check your connection and try again.".to_string()
            }
            AppError::Storage(_)
            | AppError::Remote { .. }
            | AppError::Decode(_)
            | AppError::Io(_) => "Something went wrong. Please try again.".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_hides_internal_details() {
        let err = AppError::Remote {
            status: 500,
            message: "relation \"profiles\" does not exist".into(),
        };
        assert_eq!(err.user_message(), "Something went wrong. Please try again.");
        assert!(err.to_string().contains("profiles"));
    }

    #[test]
    fn test_identity_errors_pass_through() {
        let err: AppError = IdentityError::InvalidCredentials.into();
        assert!(matches!(err, AppError::Identity(IdentityError::InvalidCredentials)));
        assert_eq!(err.user_message(), "Invalid login credentials");
    }

    #[test]
    fn test_transition_message() {
        let err = AppError::InvalidTransition {
            from: "rejected".into(),
            to: "accepted".into(),
        };
        assert_eq!(err.user_message(), "Cannot move application from rejected to accepted");
    }
}
