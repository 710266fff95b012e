use actix_web::{
    error,
    http::{
        header::{self, ContentType},
        StatusCode,
    },
    HttpResponse,
};
use derive_more::Display;
use serde_json::json;

/// The key has used up its allowance for now. This is the normal "deny"
/// outcome of an admission check, not a failure of the limiter.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[display(fmt = "not enough tokens, retry in {}s", retry_after_secs)]
pub struct InsufficientTokens {
    retry_after_secs: u64,
}

impl InsufficientTokens {
    pub(crate) fn new(retry_after_secs: u64) -> Self {
        Self { retry_after_secs }
    }

    /// Whole seconds until the bucket holds enough tokens for one admission.
    pub fn retry_after_secs(&self) -> u64 {
        self.retry_after_secs
    }
}

impl std::error::Error for InsufficientTokens {}

#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[display(fmt = "quota must be greater than zero")]
    ZeroQuota,

    #[display(fmt = "interval must be greater than zero")]
    ZeroInterval,

    #[display(fmt = "an interval of {} seconds is too large", _0)]
    IntervalTooLarge(u64),

    #[display(
        fmt = "a quota of {} exceeds the {} tokens a bucket can hold",
        quota,
        capacity
    )]
    QuotaTooLarge { quota: u64, capacity: u64 },

    #[display(fmt = "{} must be a positive integer, got {:?}", name, value)]
    Unparseable { name: &'static str, value: String },
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Display)]
pub enum ApiError {
    #[display(fmt = "rate limit exceeded, try again later")]
    RateLimited { retry_after_secs: u64 },

    #[display(fmt = "could not determine the client address")]
    MissingClientAddress,
}

impl error::ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());
        response.insert_header(ContentType::json());
        if let ApiError::RateLimited { retry_after_secs } = self {
            response.insert_header((header::RETRY_AFTER, retry_after_secs.to_string()));
        }
        response.json(json!({
            "error": self.to_string()
        }))
    }

    fn status_code(&self) -> StatusCode {
        match *self {
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::MissingClientAddress => StatusCode::BAD_REQUEST,
        }
    }
}
