use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(&'static str),
    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),
}

impl Error {
    /// The errno a verbs provider would report for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Error::InvalidArgument(_) => libc::EINVAL,
            Error::ResourceExhausted(_) => libc::ENOMEM,
            Error::NotImplemented(_) => libc::ENOSYS,
        }
    }
}

/// Failure of a batched `post_recv`.
///
/// `index` names the first request of the batch that was not enqueued. All
/// requests before it remain in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("post_recv failed at request {index}: {error}")]
pub struct PostError {
    pub index: usize,
    #[source]
    pub error: Error,
}

impl PostError {
    #[inline]
    pub(crate) fn new(index: usize, error: Error) -> Self {
        PostError { index, error }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
