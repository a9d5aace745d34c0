/// A feed read failed.  The source is skipped for this run.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} returned {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("cannot decode response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl UpstreamError {
    /// Timeouts, connection errors, 429 and 5xx are worth another try later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => retryable_status(*status),
            Self::Decode { .. } => false,
        }
    }
}

/// A message could not be delivered.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("sending to thread {thread_id} failed: {message}")]
    Transport { thread_id: i64, message: String },

    #[error("thread {thread_id} rejected message with {status}: {body}")]
    Status {
        thread_id: i64,
        status: u16,
        body: String,
    },
}

impl NotifyError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } => true,
            Self::Status { status, .. } => retryable_status(*status),
        }
    }
}

fn retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        let status = |status| UpstreamError::Status {
            url: "u".into(),
            status,
            body: String::new(),
        };
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!UpstreamError::Decode { url: "u".into(), message: "m".into() }.is_retryable());

        let notify = NotifyError::Status { thread_id: 1, status: 403, body: String::new() };
        assert!(!notify.is_retryable());
        let notify = NotifyError::Transport { thread_id: 1, message: "timeout".into() };
        assert!(notify.is_retryable());
    }
}
