use aliri_braid::braid;
use std::fmt;

macro_rules! limited_reveal {
    ($ty:ty: $hidden:literal, $default:literal) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    f.write_str("\"")?;
                    limited_reveal(&self.0, &mut *f, $default)?;
                    f.write_str("\"")
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                if f.alternate() {
                    limited_reveal(&self.0, &mut *f, usize::MAX)
                } else {
                    f.write_str(concat!("***", $hidden, "***"))
                }
            }
        }
    };
}

fn limited_reveal(unprotected: &str, f: &mut fmt::Formatter, default_len: usize) -> fmt::Result {
    let max_len = f.width().unwrap_or(default_len);
    if max_len <= 1 {
        f.write_str("…")
    } else if max_len > unprotected.len() {
        f.write_str(unprotected)
    } else {
        match unprotected.char_indices().nth(max_len - 2) {
            Some((idx, c)) if idx + c.len_utf8() < unprotected.len() => {
                f.write_str(&unprotected[0..idx + c.len_utf8()])?;
                f.write_str("…")
            }
            _ => f.write_str(unprotected),
        }
    }
}

/// The identifier a service presents to the token authority
#[braid(serde)]
pub struct ClientId;

/// The secret paired with a [`ClientId`]
#[braid(serde, debug = "owned", display = "owned")]
pub struct ClientSecret;

limited_reveal!(ClientSecretRef: "CLIENT SECRET", 5);

/// A bearer access token issued by the token authority
#[braid(serde, debug = "owned", display = "owned")]
pub struct AccessToken;

limited_reveal!(AccessTokenRef: "ACCESS TOKEN", 15);

/// The authority realm that issues tokens for a client
#[braid(serde)]
pub struct Realm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_hidden_by_default() {
        let secret = ClientSecret::from_static("hunter2-but-longer");
        assert_eq!(format!("{}", secret), "***CLIENT SECRET***");
        assert_eq!(format!("{:?}", secret), "***CLIENT SECRET***");
    }

    #[test]
    fn alternate_reveals_a_prefix() {
        let token = AccessToken::from_static("eyJhbGciOiJIUzI1NiJ9.payload.signature");
        assert_eq!(format!("{:#?}", token), "\"eyJhbGciOiJIUz…\"");
        assert_eq!(format!("{:#4}", token), "eyJ…");
    }

    #[test]
    fn short_values_are_revealed_whole() {
        let secret = ClientSecret::from_static("abc");
        assert_eq!(format!("{:#?}", secret), "\"abc\"");
    }
}
