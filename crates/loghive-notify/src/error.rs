/// Errors that can occur within the notification subsystem.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// The channel has no endpoint configured.
    #[error("notify: no endpoint configured for {0}")]
    NoEndpoint(&'static str),

    /// An HTTP request to the notification endpoint failed.
    #[error("notify: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The external API returned a non-success response.
    #[error("notify: API error from {service}: status={status}, body={body}")]
    Api {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// The external API accepted the request but rejected it in the body.
    #[error("notify: {service} rejected the message: errcode={errcode}, errmsg={errmsg}")]
    Rejected {
        service: &'static str,
        errcode: i64,
        errmsg: String,
    },
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;
