use crate::supabase::SupabaseError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl From<SupabaseError> for AppError {
    fn from(err: SupabaseError) -> Self {
        match err {
            SupabaseError::Request(err) => AppError::Reqwest(err),
            err => AppError::Upstream(err.to_string()),
        }
    }
}
