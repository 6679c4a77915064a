//! Result and error types for Buildstorm.

use std::fmt;

use thiserror::Error;

/// Result type for Buildstorm operations
pub type StressResult<T> = Result<T, StressError>;

/// Step of the stimulus recipe that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StimulusStep {
    /// Checking whether the working branch exists
    CheckBranch,
    /// Deleting the stale working branch
    DeleteBranch,
    /// Creating the working branch from the base branch
    CreateBranch,
    /// Reading the build-number baseline
    Baseline,
    /// Pushing one commit onto the working branch
    Commit,
}

impl fmt::Display for StimulusStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CheckBranch => write!(f, "check branch"),
            Self::DeleteBranch => write!(f, "delete branch"),
            Self::CreateBranch => write!(f, "create branch"),
            Self::Baseline => write!(f, "baseline"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

/// Errors that can occur while stimulating or watching a CI server
#[derive(Debug, Error)]
pub enum StressError {
    /// Network or connection failure
    #[error("Transport error: {message}")]
    Transport {
        /// Error message
        message: String,
    },

    /// Server payload was not the expected shape
    #[error("Decode error: {message}")]
    Decode {
        /// Error message
        message: String,
    },

    /// Server answered with a non-success status
    #[error("API error {status}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Work is queued but nothing is running to pick it up
    #[error("Policy violation: {pending} build(s) still pending with none running")]
    PolicyViolation {
        /// Number of pending builds seen in the final snapshot
        pending: usize,
    },

    /// The watch loop did not drain before its deadline or poll budget
    #[error("Deadline exceeded after {polls} poll(s) ({elapsed_ms}ms)")]
    DeadlineExceeded {
        /// Polls performed before giving up
        polls: u32,
        /// Elapsed wall time in milliseconds
        elapsed_ms: u64,
    },

    /// Branch reset or commit creation failed
    #[error("Stimulus failed during {step}: {message}")]
    Stimulus {
        /// Failed step
        step: StimulusStep,
        /// Error message
        message: String,
    },

    /// Repository slug is not `org/name`
    #[error("Could not properly parse repository {repo:?}")]
    InvalidRepo {
        /// Raw slug
        repo: String,
    },

    /// Explicit build range is empty or reversed
    #[error("Invalid build range: start {start}, last {last}")]
    InvalidRange {
        /// First build number (exclusive)
        start: u64,
        /// Last build number (inclusive)
        last: u64,
    },

    /// Operation was cancelled from outside
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation timed out
    #[error("Operation timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },
}

impl StressError {
    /// Create a transport error
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a decode error
    #[must_use]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an API status error
    #[must_use]
    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            body: body.into(),
        }
    }

    /// Wrap any error as a stimulus failure at `step`
    #[must_use]
    pub fn stimulus(step: StimulusStep, source: impl fmt::Display) -> Self {
        Self::Stimulus {
            step,
            message: source.to_string(),
        }
    }

    /// Whether this error terminates a watch because of server state rather than I/O
    #[must_use]
    pub const fn is_policy(&self) -> bool {
        matches!(
            self,
            Self::PolicyViolation { .. } | Self::DeadlineExceeded { .. }
        )
    }
}

impl From<reqwest::Error> for StressError {
    fn from(err: reqwest::Error) -> Self {
        let message = redact_token(&err.to_string());
        if err.is_decode() {
            Self::decode(message)
        } else {
            Self::transport(message)
        }
    }
}

impl From<serde_json::Error> for StressError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for StressError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::transport(redact_token(&err.to_string()))
    }
}

/// Mask the value of any `access_token` query parameter in `text`
#[must_use]
pub fn redact_token(text: &str) -> String {
    const KEY: &str = "access_token=";
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find(KEY) {
        let (head, tail) = rest.split_at(pos + KEY.len());
        out.push_str(head);
        out.push_str("***");
        let end = tail
            .find(|c: char| c == '&' || c == ')' || c == ' ' || c == '"')
            .unwrap_or(tail.len());
        rest = &tail[end..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_message() {
        let err = StressError::transport("connection refused");
        assert!(err.to_string().contains("Transport"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_policy_violation_message() {
        let err = StressError::PolicyViolation { pending: 3 };
        assert!(err.to_string().contains("3 build(s) still pending"));
        assert!(err.is_policy());
    }

    #[test]
    fn test_deadline_is_policy_but_distinct() {
        let err = StressError::DeadlineExceeded {
            polls: 7,
            elapsed_ms: 14_000,
        };
        assert!(err.is_policy());
        assert!(!matches!(err, StressError::PolicyViolation { .. }));
        assert!(err.to_string().contains("7 poll(s)"));
    }

    #[test]
    fn test_stimulus_error_names_step() {
        let err = StressError::stimulus(StimulusStep::DeleteBranch, "404 Not Found");
        assert_eq!(
            err.to_string(),
            "Stimulus failed during delete branch: 404 Not Found"
        );
        assert!(!err.is_policy());
    }

    #[test]
    fn test_json_error_is_decode() {
        let json_err = serde_json::from_str::<Vec<u32>>("{").unwrap_err();
        let err: StressError = json_err.into();
        assert!(matches!(err, StressError::Decode { .. }));
    }

    mod redact_tests {
        use super::*;

        #[test]
        fn test_redacts_query_token() {
            let url = "http://ci/api/builds?access_token=s3cret";
            assert_eq!(redact_token(url), "http://ci/api/builds?access_token=***");
        }

        #[test]
        fn test_redacts_token_before_other_params() {
            let url = "http://ci/x?access_token=abc&fork=true";
            assert_eq!(redact_token(url), "http://ci/x?access_token=***&fork=true");
        }

        #[test]
        fn test_redacts_every_occurrence() {
            let text = "error sending request for url (http://a?access_token=one) and http://b?access_token=two";
            let redacted = redact_token(text);
            assert!(!redacted.contains("one"));
            assert!(!redacted.contains("two"));
            assert_eq!(redacted.matches("***").count(), 2);
        }

        #[test]
        fn test_leaves_plain_text_alone() {
            assert_eq!(redact_token("no secrets here"), "no secrets here");
        }
    }
}
