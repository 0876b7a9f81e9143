use crate::error::{PostSignalError, Result};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use sha2::Sha384;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha384 = Hmac<Sha384>;

/// Exchange API credentials, wiped from memory on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ApiCredentials {
    pub api_key: String,
    pub secret: String,
}

impl ApiCredentials {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Signs authenticated Bitfinex v2 requests
pub struct HmacAuth {
    credentials: ApiCredentials,
    last_nonce: AtomicU64,
}

impl HmacAuth {
    pub fn new(credentials: ApiCredentials) -> Self {
        Self {
            credentials,
            last_nonce: AtomicU64::new(0),
        }
    }

    /// Microsecond nonce, strictly increasing for this process
    pub fn next_nonce(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;

        let mut prev = self.last_nonce.load(Ordering::SeqCst);
        loop {
            let next = now.max(prev + 1);
            match self
                .last_nonce
                .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }

    /// Hex HMAC-SHA384 over `/api/{path}{nonce}{body}`
    pub fn sign(&self, path: &str, nonce: u64, body: &str) -> Result<String> {
        let mut mac = HmacSha384::new_from_slice(self.credentials.secret.as_bytes())
            .map_err(|e| PostSignalError::Signature(format!("HMAC init failed: {}", e)))?;

        mac.update(format!("/api/{}{}{}", path.trim_start_matches('/'), nonce, body).as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Authentication headers for a POST to `path` (e.g. `v2/auth/w/order/submit`)
    pub fn build_headers(&self, path: &str, body: &str) -> Result<HeaderMap> {
        let nonce = self.next_nonce();
        let signature = self.sign(path, nonce, body)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "bfx-nonce",
            HeaderValue::from_str(&nonce.to_string())
                .map_err(|e| PostSignalError::Internal(format!("Invalid nonce header: {}", e)))?,
        );
        headers.insert(
            "bfx-apikey",
            HeaderValue::from_str(&self.credentials.api_key)
                .map_err(|e| PostSignalError::Signature(format!("Invalid API key header: {}", e)))?,
        );
        headers.insert(
            "bfx-signature",
            HeaderValue::from_str(&signature)
                .map_err(|e| PostSignalError::Internal(format!("Invalid signature header: {}", e)))?,
        );

        Ok(headers)
    }
}
