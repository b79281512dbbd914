use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {message}")]
    BadRequest {
        code: &'static str,
        message: &'static str,
    },
    #[error("memory store error: {message}")]
    Upstream { code: &'static str, message: String },
}

impl AppError {
    pub fn bad_request(code: &'static str, message: &'static str) -> Self {
        Self::BadRequest { code, message }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            code: "memory_store_error",
            message: message.into(),
        }
    }
}
