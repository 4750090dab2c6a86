//! Request signing for the object-storage API.
//!
//! Key-time based HMAC-SHA256 scheme: a sign key is derived from the secret
//! key and the validity window, then used to sign a digest of the canonical
//! request (method, path, params, signed headers).

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const SIGN_ALGORITHM: &str = "sha256";

/// Signs requests with one key pair.
#[derive(Clone)]
pub struct CosSigner {
    secret_id: String,
    secret_key: String,
    expire_secs: u64,
}

impl std::fmt::Debug for CosSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CosSigner")
            .field("secret_id", &self.secret_id)
            .field("expire_secs", &self.expire_secs)
            .finish_non_exhaustive()
    }
}

impl CosSigner {
    /// Creates a signer; signatures stay valid for `expire_secs`.
    pub fn new(secret_id: &str, secret_key: &str, expire_secs: u64) -> Self {
        Self {
            secret_id: secret_id.to_string(),
            secret_key: secret_key.to_string(),
            expire_secs,
        }
    }

    /// Builds the `Authorization` header value.
    ///
    /// `headers` may contain any header; only `host`, `content-*` and
    /// `x-cos-*` take part in the signature. `now` is unix seconds.
    pub fn authorization(
        &self,
        method: &str,
        path: &str,
        params: &BTreeMap<String, String>,
        headers: &BTreeMap<String, String>,
        now: u64,
    ) -> String {
        let key_time = format!("{};{}", now, now + self.expire_secs);

        let signed_params = canonical_pairs(params.iter());
        let signed_headers = canonical_pairs(
            headers
                .iter()
                .filter(|(k, _)| is_signed_header(k)),
        );

        let http_string = format!(
            "{}\n{}\n{}\n{}\n",
            method.to_lowercase(),
            path,
            join_pairs(&signed_params),
            join_pairs(&signed_headers)
        );
        let string_to_sign = format!(
            "{}\n{}\n{}\n",
            SIGN_ALGORITHM,
            key_time,
            hex::encode(Sha256::digest(http_string.as_bytes()))
        );

        let sign_key = hex::encode(hmac_sha256(self.secret_key.as_bytes(), key_time.as_bytes()));
        let signature = hex::encode(hmac_sha256(sign_key.as_bytes(), string_to_sign.as_bytes()));

        format!(
            "q-sign-algorithm={}&q-ak={}&q-sign-time={}&q-key-time={}&q-header-list={}&q-url-param-list={}&q-signature={}",
            SIGN_ALGORITHM,
            self.secret_id,
            key_time,
            key_time,
            join_keys(&signed_headers),
            join_keys(&signed_params),
            signature
        )
    }
}

fn is_signed_header(name: &str) -> bool {
    let name = name.to_lowercase();
    name == "host" || name.starts_with("content-") || name.starts_with("x-cos-")
}

/// Lowercases and url-encodes keys and values, sorted by key.
fn canonical_pairs<'a, I>(pairs: I) -> Vec<(String, String)>
where
    I: Iterator<Item = (&'a String, &'a String)>,
{
    let mut out: Vec<(String, String)> = pairs
        .map(|(k, v)| {
            (
                urlencoding::encode(&k.to_lowercase()).into_owned(),
                urlencoding::encode(v).into_owned(),
            )
        })
        .collect();
    out.sort();
    out
}

fn join_pairs(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn join_keys(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";")
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers() -> BTreeMap<String, String> {
        let mut h = BTreeMap::new();
        h.insert("Host".to_string(), "b.cos.r.myqcloud.com".to_string());
        h.insert("Content-Length".to_string(), "12".to_string());
        h.insert("User-Agent".to_string(), "depot".to_string());
        h
    }

    fn signature_of(auth: &str) -> &str {
        auth.rsplit("q-signature=").next().unwrap()
    }

    #[test]
    fn test_deterministic() {
        let signer = CosSigner::new("id", "key", 3600);
        let params = BTreeMap::new();
        let a = signer.authorization("PUT", "/a.txt", &params, &headers(), 1_700_000_000);
        let b = signer.authorization("PUT", "/a.txt", &params, &headers(), 1_700_000_000);
        assert_eq!(a, b);
    }

    #[test]
    fn test_changes_with_secret_method_and_path() {
        let params = BTreeMap::new();
        let base = CosSigner::new("id", "key", 3600).authorization("PUT", "/a", &params, &headers(), 1);
        let other_key = CosSigner::new("id", "key2", 3600).authorization("PUT", "/a", &params, &headers(), 1);
        let other_method = CosSigner::new("id", "key", 3600).authorization("GET", "/a", &params, &headers(), 1);
        let other_path = CosSigner::new("id", "key", 3600).authorization("PUT", "/b", &params, &headers(), 1);

        assert_ne!(signature_of(&base), signature_of(&other_key));
        assert_ne!(signature_of(&base), signature_of(&other_method));
        assert_ne!(signature_of(&base), signature_of(&other_path));
    }

    #[test]
    fn test_header_and_param_lists() {
        let signer = CosSigner::new("AKID", "key", 600);
        let mut params = BTreeMap::new();
        params.insert("uploadId".to_string(), "u-1".to_string());
        params.insert("partNumber".to_string(), "2".to_string());

        let auth = signer.authorization("PUT", "/obj", &params, &headers(), 100);
        assert!(auth.starts_with("q-sign-algorithm=sha256&q-ak=AKID&"));
        assert!(auth.contains("q-sign-time=100;700"));
        assert!(auth.contains("q-header-list=content-length;host&"));
        assert!(auth.contains("q-url-param-list=partnumber;uploadid&"));
        assert!(!auth.contains("user-agent"));
        assert_eq!(signature_of(&auth).len(), 64);
    }

    #[test]
    fn test_unsigned_header_does_not_affect_signature() {
        let signer = CosSigner::new("id", "key", 3600);
        let params = BTreeMap::new();
        let mut extra = headers();
        extra.insert("User-Agent".to_string(), "something-else".to_string());
        assert_eq!(
            signer.authorization("GET", "/k", &params, &headers(), 5),
            signer.authorization("GET", "/k", &params, &extra, 5)
        );
    }

    #[test]
    fn test_debug_hides_secret() {
        let signer = CosSigner::new("id", "super-secret", 60);
        assert!(!format!("{:?}", signer).contains("super-secret"));
    }
}
