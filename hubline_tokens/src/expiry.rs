//! Inspection of the `exp` claim of issued access tokens
//!
//! Tokens are only ever inspected after being received directly from the
//! token authority, so signatures are not verified here.

use aliri::{
    jwt::{BasicClaims, CoreClaims},
    JwtRef,
};
use aliri_base64::Base64Url;
use aliri_clock::{DurationSecs, UnixTime};
use serde::de::IgnoredAny;
use thiserror::Error;

use crate::AccessTokenRef;

/// An error while reading the expiry from an access token
#[derive(Debug, Error)]
pub enum ExpiryError {
    /// The token is not a compact JWT with a JSON header and payload
    #[error("access token is not a well-formed JWT")]
    Malformed(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    /// The token payload has no `exp` claim
    #[error("access token does not carry an expiration claim")]
    MissingExpiry,
}

fn malformed<E: std::error::Error + Send + Sync + 'static>(err: E) -> ExpiryError {
    ExpiryError::Malformed(Box::new(err))
}

/// Reads the expiration time of an access token
///
/// The header must be JSON but is otherwise ignored, so tokens signed with
/// any algorithm can be inspected.
pub fn expiry_of(token: &AccessTokenRef) -> Result<UnixTime, ExpiryError> {
    let jwt = JwtRef::from_str(token.as_str());
    let decomposed = jwt.decompose::<IgnoredAny>().map_err(malformed)?;

    let payload = Base64Url::from_encoded(decomposed.untrusted_payload()).map_err(malformed)?;
    let claims: BasicClaims = serde_json::from_slice(payload.as_slice()).map_err(malformed)?;

    claims.exp().ok_or(ExpiryError::MissingExpiry)
}

/// Determines whether a previously issued token may still be used
///
/// A token is usable while its expiry is no earlier than the current time
/// plus the configured clock skew. The boundary is inclusive: a token that
/// expires at exactly the current second is still considered valid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ValidityCheck {
    skew: DurationSecs,
}

impl ValidityCheck {
    /// Constructs a check that treats tokens as expired `skew` early
    pub const fn with_skew(skew: DurationSecs) -> Self {
        Self { skew }
    }

    /// The configured clock skew
    #[inline]
    pub fn skew(&self) -> DurationSecs {
        self.skew
    }

    /// Evaluates whether `token` is still valid at `now`
    ///
    /// Tokens that cannot be inspected are never valid.
    pub fn is_valid_at(&self, token: &AccessTokenRef, now: UnixTime) -> bool {
        match expiry_of(token) {
            Ok(expiry) => expiry >= now + self.skew,
            Err(error) => {
                tracing::debug!(
                    error = (&error as &dyn std::error::Error),
                    "unable to inspect cached token, treating as invalid"
                );
                false
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use color_eyre::Result;

    use super::*;
    use crate::AccessToken;

    #[test]
    fn reads_exp_claim() -> Result<()> {
        let token = test_tokens::expiring_at(UnixTime(1_700_000_000));
        assert_eq!(expiry_of(&token)?, UnixTime(1_700_000_000));
        Ok(())
    }

    #[test]
    fn reads_exp_whatever_the_signing_algorithm() -> Result<()> {
        for alg in ["RS256", "HS256", "PS256", "ES256", "ES384", "EdDSA"] {
            let token = test_tokens::signed_with(alg, r#"{"exp":1700000000}"#);
            assert_eq!(expiry_of(&token)?, UnixTime(1_700_000_000), "alg {}", alg);
        }
        Ok(())
    }

    #[test]
    fn missing_exp_is_reported() {
        let token = test_tokens::with_payload(r#"{"sub":"svc"}"#);
        assert!(matches!(expiry_of(&token), Err(ExpiryError::MissingExpiry)));
    }

    #[test]
    fn garbage_is_malformed() {
        let token = AccessToken::from_static("not-a-jwt");
        assert!(matches!(expiry_of(&token), Err(ExpiryError::Malformed(_))));
    }

    #[test]
    fn expiry_equal_to_now_is_valid() {
        let check = ValidityCheck::default();
        let token = test_tokens::expiring_at(UnixTime(1_000));

        assert!(check.is_valid_at(&token, UnixTime(999)));
        assert!(check.is_valid_at(&token, UnixTime(1_000)));
        assert!(!check.is_valid_at(&token, UnixTime(1_001)));
    }

    #[test]
    fn skew_expires_tokens_early() {
        let check = ValidityCheck::with_skew(DurationSecs(30));
        let token = test_tokens::expiring_at(UnixTime(1_000));

        assert!(check.is_valid_at(&token, UnixTime(970)));
        assert!(!check.is_valid_at(&token, UnixTime(971)));
    }

    #[test]
    fn unparseable_token_is_invalid_not_an_error() {
        let check = ValidityCheck::default();
        assert!(!check.is_valid_at(&AccessToken::from_static("opaque"), UnixTime(0)));
    }
}
