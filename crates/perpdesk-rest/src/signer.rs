//! HMAC-SHA256 request signing.
//!
//! The exchange signs the exact query string (parameters in sent order)
//! and expects the lower-case hex digest as the `signature` parameter.

use crate::error::{RestError, RestResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// API key and secret. The secret is wiped from memory on drop.
#[derive(Clone)]
pub struct ApiCredentials {
    api_key: String,
    api_secret: Zeroizing<String>,
}

impl ApiCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: Zeroizing::new(api_secret.into()),
        }
    }

    /// Read credentials from the named environment variables.
    ///
    /// `None` when either variable is unset or empty.
    pub fn from_env(key_var: &str, secret_var: &str) -> Option<Self> {
        let key = std::env::var(key_var).ok().filter(|k| !k.is_empty())?;
        let secret = std::env::var(secret_var).ok().filter(|s| !s.is_empty())?;
        Some(Self::new(key, secret))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn signer(&self) -> RequestSigner {
        RequestSigner {
            secret: self.api_secret.clone(),
        }
    }
}

impl fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = self.api_key.get(..4).unwrap_or("");
        f.debug_struct("ApiCredentials")
            .field("api_key", &format_args!("{shown}***"))
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// Signs query strings with the account secret.
#[derive(Clone)]
pub struct RequestSigner {
    secret: Zeroizing<String>,
}

impl RequestSigner {
    pub fn sign(&self, query: &str) -> RestResult<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| RestError::Signing(e.to_string()))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Join parameters into a query string in the given order.
pub fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    // Published signing example for the futures REST API.
    const SECRET: &str = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";

    #[test]
    fn test_known_signature() {
        let creds = ApiCredentials::new("key", SECRET);
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            creds.signer().sign(query).unwrap(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_encode_query_keeps_order() {
        let params = vec![
            ("symbol", "BTCUSDT".to_string()),
            ("side", "SELL".to_string()),
            ("timestamp", "1".to_string()),
        ];
        assert_eq!(encode_query(&params), "symbol=BTCUSDT&side=SELL&timestamp=1");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let creds = ApiCredentials::new("abcdef123", SECRET);
        let shown = format!("{creds:?}");
        assert!(shown.contains("abcd***"));
        assert!(!shown.contains(SECRET));
    }
}
