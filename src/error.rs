use thiserror::Error;

/// Coarse classification of a failure, used by the monitor loop to decide
/// whether to skip, log-and-continue, or abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No frame, capture timeout, encoder unreachable. Skip the tick or turn.
    SensorUnavailable,
    /// Speech, alarm or notification transport failed. Log and carry on.
    ActuatorFailure,
    /// Registry or capture directory could not be written.
    Persistence,
    /// Startup cannot continue.
    Fatal,
}

/// Error returned at every collaborator boundary.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("classification failed: {0}")]
    Classification(String),

    #[error("speech output failed: {0}")]
    SpeechOutput(String),

    #[error("speech capture failed: {0}")]
    SpeechCapture(String),

    #[error("alarm device error: {0}")]
    Alarm(String),

    #[error("notification failed: {0}")]
    Notify(String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GuardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GuardError::CameraUnavailable(_)
            | GuardError::Classification(_)
            | GuardError::SpeechCapture(_) => ErrorKind::SensorUnavailable,
            GuardError::SpeechOutput(_) | GuardError::Alarm(_) | GuardError::Notify(_) => {
                ErrorKind::ActuatorFailure
            }
            GuardError::Registry(_)
            | GuardError::Io(_)
            | GuardError::Image(_)
            | GuardError::Json(_) => ErrorKind::Persistence,
            GuardError::Config(_) => ErrorKind::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            GuardError::CameraUnavailable("x".into()).kind(),
            ErrorKind::SensorUnavailable
        );
        assert_eq!(GuardError::Alarm("x".into()).kind(), ErrorKind::ActuatorFailure);
        assert_eq!(GuardError::Notify("x".into()).kind(), ErrorKind::ActuatorFailure);
        assert_eq!(GuardError::Registry("x".into()).kind(), ErrorKind::Persistence);
        assert_eq!(GuardError::Config("x".into()).kind(), ErrorKind::Fatal);
    }
}
