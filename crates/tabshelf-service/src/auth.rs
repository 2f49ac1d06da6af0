use http::HeaderMap;
pub use tabshelf_api::USER_HEADER;
use tabshelf_core::UserId;

/// Resolves the calling user from request metadata.
pub trait Authenticator: Send + Sync {
    fn current_user(&self, headers: &HeaderMap) -> Option<UserId>;
}

/// Trusts an identity header set by a fronting proxy.
#[derive(Debug, Clone)]
pub struct HeaderAuthenticator {
    header: &'static str,
}

impl HeaderAuthenticator {
    #[must_use]
    pub fn new(header: &'static str) -> Self {
        Self { header }
    }
}

impl Default for HeaderAuthenticator {
    fn default() -> Self {
        Self::new(USER_HEADER)
    }
}

impl Authenticator for HeaderAuthenticator {
    fn current_user(&self, headers: &HeaderMap) -> Option<UserId> {
        let raw = headers.get(self.header)?.to_str().ok()?;
        UserId::parse(raw).ok()
    }
}
