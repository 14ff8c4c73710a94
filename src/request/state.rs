//! Observable request state.

use crate::error::RequestError;

/// Snapshot published to observers on every change.
#[derive(Debug, Clone)]
pub struct RequestState<P, T> {
    pub loading: bool,
    pub loading_more: bool,
    pub data: Option<T>,
    pub error: Option<RequestError>,
    pub params: Option<P>,
    /// Fetches started so far. Never reset.
    pub request_count: u64,
    pub has_more: Option<bool>,
}

impl<P, T> Default for RequestState<P, T> {
    fn default() -> Self {
        Self {
            loading: false,
            loading_more: false,
            data: None,
            error: None,
            params: None,
            request_count: 0,
            has_more: None,
        }
    }
}

impl<P, T> RequestState<P, T> {
    /// Neither loading nor loading more.
    pub fn is_idle(&self) -> bool {
        !self.loading && !self.loading_more
    }
}
