use http::StatusCode;
use std::{fmt, ops::RangeInclusive};

/// Trait for classifying responses as either success or failure.
///
/// Response classifiers are used in cases where middleware needs to determine
/// whether a response completed successfully or failed. For example, they may
/// be used by tracing or metrics middleware to record failures differently
/// from successes.
pub trait Classifier {
    /// The type returned when a response is classified as a failure.
    type FailureClass;

    /// Classify a response by its status code.
    fn classify_status(&self, status: u16) -> Result<(), Self::FailureClass>;

    /// Classify an error.
    ///
    /// Errors are always failures, this only decides how they are described.
    fn classify_error<E>(&self, error: &E) -> Self::FailureClass
    where
        E: fmt::Display + ?Sized;
}

/// Classifier that considers responses with a status code within some range to be failures.
#[derive(Debug, Clone)]
pub struct StatusInRangeAsFailures {
    range: RangeInclusive<u16>,
}

impl StatusInRangeAsFailures {
    /// Creates a new `StatusInRangeAsFailures` that classifies responses with a `5xx` status code
    /// as failures, all others are considered successes.
    pub fn new_for_server_errors() -> Self {
        Self { range: 500..=599 }
    }

    /// Creates a new `StatusInRangeAsFailures` that classifies every response with a status code
    /// of `400` or above as a failure, including non-standard codes up to `999`.
    pub fn new_for_client_and_server_errors() -> Self {
        Self { range: 400..=999 }
    }
}

impl Default for StatusInRangeAsFailures {
    fn default() -> Self {
        Self::new_for_client_and_server_errors()
    }
}

impl Classifier for StatusInRangeAsFailures {
    type FailureClass = StatusInRangeFailureClass;

    fn classify_status(&self, status: u16) -> Result<(), Self::FailureClass> {
        if self.range.contains(&status) {
            Err(StatusInRangeFailureClass::StatusCode(status))
        } else {
            Ok(())
        }
    }

    fn classify_error<E>(&self, error: &E) -> Self::FailureClass
    where
        E: fmt::Display + ?Sized,
    {
        StatusInRangeFailureClass::Error(error.to_string())
    }
}

/// The failure class for [`StatusInRangeAsFailures`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusInRangeFailureClass {
    /// A response was classified as a failure with the corresponding status.
    StatusCode(u16),
    /// A response was classified as an error with the corresponding error description.
    Error(String),
}

impl fmt::Display for StatusInRangeFailureClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::StatusCode(code) => {
                write!(f, "Status code: {code}")?;
                if let Some(reason) = StatusCode::from_u16(*code)
                    .ok()
                    .and_then(|status| status.canonical_reason())
                {
                    write!(f, " {reason}")?;
                }
                Ok(())
            }
            Self::Error(error) => write!(f, "Error: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_and_server_errors_fail() {
        let classifier = StatusInRangeAsFailures::new_for_client_and_server_errors();

        assert!(classifier.classify_status(200).is_ok());
        assert!(classifier.classify_status(302).is_ok());
        assert!(classifier.classify_status(399).is_ok());
        assert_eq!(
            classifier.classify_status(404),
            Err(StatusInRangeFailureClass::StatusCode(404))
        );
        assert!(classifier.classify_status(503).is_err());
        assert_eq!(
            classifier.classify_status(600),
            Err(StatusInRangeFailureClass::StatusCode(600))
        );
        assert!(classifier.classify_status(999).is_err());
    }

    #[test]
    fn default_fails_everything_from_400() {
        let classifier = StatusInRangeAsFailures::default();

        assert!(classifier.classify_status(399).is_ok());
        assert!((400..=999).all(|status| classifier.classify_status(status).is_err()));
    }

    #[test]
    fn server_errors_only() {
        let classifier = StatusInRangeAsFailures::new_for_server_errors();

        assert!(classifier.classify_status(404).is_ok());
        assert!(classifier.classify_status(500).is_err());
    }

    #[test]
    fn failure_message_carries_the_code() {
        let class = StatusInRangeFailureClass::StatusCode(503);
        assert_eq!(class.to_string(), "Status code: 503 Service Unavailable");

        let class = StatusInRangeFailureClass::StatusCode(599);
        assert_eq!(class.to_string(), "Status code: 599");
    }
}
