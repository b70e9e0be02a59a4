//! # Credentials
//!
//! The engine needs two things from whoever signed the seller in: the
//! seller's id (stamped on every listing created here) and an optional bearer
//! token for the API. Both come through [`CredentialSource`] so the sign-in
//! flow stays outside this crate.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Source of the signed-in seller's identity.
pub trait CredentialSource: Send + Sync {
    /// Id of the signed-in seller, `None` when signed out.
    fn seller_id(&self) -> Option<String>;

    /// Bearer token for API calls, `None` for anonymous calls.
    fn access_token(&self) -> Option<String>;
}

/// Credentials held in memory.
///
/// The daemon fills it from `REMARKET_SELLER_ID` / `REMARKET_API_TOKEN`;
/// tests and embedders set it directly.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    inner: RwLock<Credentials>,
}

#[derive(Debug, Default, Clone)]
struct Credentials {
    seller_id: Option<String>,
    access_token: Option<String>,
}

impl StaticCredentials {
    pub fn new(seller_id: Option<String>, access_token: Option<String>) -> Self {
        StaticCredentials {
            inner: RwLock::new(Credentials {
                seller_id,
                access_token,
            }),
        }
    }

    /// Signed in as `seller_id`, no token.
    pub fn seller(seller_id: impl Into<String>) -> Self {
        Self::new(Some(seller_id.into()), None)
    }

    /// Reads `REMARKET_SELLER_ID` and `REMARKET_API_TOKEN`. Blank values
    /// count as absent.
    pub fn from_env() -> Self {
        let read = |key: &str| std::env::var(key).ok().filter(|v| !v.trim().is_empty());
        Self::new(read("REMARKET_SELLER_ID"), read("REMARKET_API_TOKEN"))
    }

    /// Replaces both values (sign-in).
    pub fn sign_in(&self, seller_id: impl Into<String>, access_token: Option<String>) {
        let mut inner = self.write();
        inner.seller_id = Some(seller_id.into());
        inner.access_token = access_token;
    }

    /// Clears both values.
    pub fn sign_out(&self) {
        *self.write() = Credentials::default();
    }

    // A writer that panicked cannot leave the pair half-written, so a
    // poisoned lock still holds usable values.
    fn read(&self) -> RwLockReadGuard<'_, Credentials> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Credentials> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn snapshot(&self) -> Credentials {
        self.read().clone()
    }
}

impl CredentialSource for StaticCredentials {
    fn seller_id(&self) -> Option<String> {
        self.snapshot().seller_id
    }

    fn access_token(&self) -> Option<String> {
        self.snapshot().access_token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_and_out() {
        let creds = StaticCredentials::default();
        assert_eq!(creds.seller_id(), None);

        creds.sign_in("seller-9", Some("tok".into()));
        assert_eq!(creds.seller_id().as_deref(), Some("seller-9"));
        assert_eq!(creds.access_token().as_deref(), Some("tok"));

        creds.sign_out();
        assert_eq!(creds.seller_id(), None);
        assert_eq!(creds.access_token(), None);
    }

    #[test]
    fn test_sign_in_after_poisoned_lock() {
        let creds = std::sync::Arc::new(StaticCredentials::seller("seller-1"));

        let holder = creds.clone();
        let crashed = std::thread::spawn(move || {
            let _guard = holder.inner.write().unwrap();
            panic!("crash while holding credentials");
        })
        .join();
        assert!(crashed.is_err());
        assert!(creds.inner.is_poisoned());

        assert_eq!(creds.seller_id().as_deref(), Some("seller-1"));

        creds.sign_in("seller-2", Some("tok".into()));
        assert_eq!(creds.seller_id().as_deref(), Some("seller-2"));
        assert_eq!(creds.access_token().as_deref(), Some("tok"));

        creds.sign_out();
        assert_eq!(creds.seller_id(), None);
    }
}
