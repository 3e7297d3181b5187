//! Caller identity parsed from transport-layer credentials
//!
//! The constructor is total: any byte sequence yields *some* identity, so a
//! malformed token still produces a caller the rest of the stack can reason
//! about (and that the store will reject on its own). Claims extracted from
//! tokens are metadata for role-binding matching and display only — they are
//! never an authorization decision by themselves.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Credential scheme a caller presented
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IdentityScheme {
    /// Bearer token (JWT or opaque)
    Bearer,
    /// TLS client certificate
    ClientCert,
    /// No recognizable credential
    Unknown,
}

impl IdentityScheme {
    /// Stable tag mixed into the fingerprint so equal bytes under different
    /// schemes never collide
    fn tag(self) -> &'static [u8] {
        match self {
            Self::Bearer => b"bearer:",
            Self::ClientCert => b"cert:",
            Self::Unknown => b"unknown:",
        }
    }
}

/// A canonical, comparable authorization context for one caller
///
/// Constructed once per inbound request from raw credential bytes, never
/// persisted, immutable. Two identities with equal fingerprints are the same
/// caller for cache purposes.
#[derive(Clone, Debug)]
pub struct Identity {
    scheme: IdentityScheme,
    raw: Vec<u8>,
    name: Option<String>,
}

impl Identity {
    /// Build an identity from a bearer token
    ///
    /// Attempts unverified JWT claim extraction to learn the subject name;
    /// if the token is not a parseable JWT it is kept as an opaque bearer
    /// credential. This never fails.
    pub fn from_token(raw_token: impl Into<String>) -> Self {
        let raw_token = raw_token.into();
        let name = extract_jwt_subject(&raw_token);
        if name.is_none() {
            debug!("credential is not a parseable JWT, treating as opaque bearer token");
        }
        Self {
            scheme: IdentityScheme::Bearer,
            raw: raw_token.into_bytes(),
            name,
        }
    }

    /// Build an identity from TLS client certificate bytes
    ///
    /// Subject extraction is left to the store's own certificate
    /// authentication; this core only fingerprints the bytes.
    pub fn from_client_cert(cert_data: impl Into<Vec<u8>>) -> Self {
        Self {
            scheme: IdentityScheme::ClientCert,
            raw: cert_data.into(),
            name: None,
        }
    }

    /// Build the identity of a caller that presented no credential
    pub fn unauthenticated() -> Self {
        Self {
            scheme: IdentityScheme::Unknown,
            raw: Vec::new(),
            name: None,
        }
    }

    /// The credential scheme this identity was built from
    pub fn scheme(&self) -> IdentityScheme {
        self.scheme
    }

    /// The raw credential bytes (token or certificate data)
    pub fn raw_credential(&self) -> &[u8] {
        &self.raw
    }

    /// Subject name extracted from the credential, when one was present
    ///
    /// Used to match role bindings naming this caller. Not an access grant.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Stable one-way digest of the credential, used as a cache key
    ///
    /// Deterministic and collision-resistant; never reversible to the
    /// credential. Covers the scheme tag so a token and a certificate with
    /// identical bytes are distinct callers.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.scheme.tag());
        hasher.update(&self.raw);
        hex::encode(hasher.finalize())
    }
}

/// Pull the subject out of an unverified JWT, if the bytes form one
///
/// Signature verification is deliberately absent: the store authenticates
/// the token itself on every scoped call. We only read claims for naming.
fn extract_jwt_subject(token: &str) -> Option<String> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let decoded = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;

    claims
        .get("sub")
        .or_else(|| claims.get("user_id"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt_with_claims(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
        format!("{header}.{payload}.fakesignature")
    }

    /// Story: a well-formed JWT yields a named bearer identity
    #[test]
    fn story_jwt_token_parses_subject() {
        let token = jwt_with_claims(serde_json::json!({"sub": "alice@example.com"}));
        let identity = Identity::from_token(token);

        assert_eq!(identity.scheme(), IdentityScheme::Bearer);
        assert_eq!(identity.name(), Some("alice@example.com"));
    }

    /// Story: the legacy user_id claim works when sub is absent
    #[test]
    fn story_user_id_claim_fallback() {
        let token = jwt_with_claims(serde_json::json!({"user_id": "u-123"}));
        assert_eq!(Identity::from_token(token).name(), Some("u-123"));
    }

    /// Story: garbage tokens degrade to an opaque bearer, never an error
    #[test]
    fn story_unparseable_token_becomes_opaque_bearer() {
        for raw in ["not-a-jwt", "a.b", "a.b.c.d", "..", ""] {
            let identity = Identity::from_token(raw);
            assert_eq!(identity.scheme(), IdentityScheme::Bearer);
            assert_eq!(identity.name(), None);
        }
    }

    /// Story: a JWT with an unparseable payload still yields an identity
    #[test]
    fn story_bad_payload_still_yields_identity() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none"}"#);
        let token = format!("{header}.!!!notbase64!!!.sig");
        let identity = Identity::from_token(token.clone());
        assert_eq!(identity.name(), None);
        assert_eq!(identity.raw_credential(), token.as_bytes());
    }

    /// Story: fingerprints are deterministic and distinguish callers
    #[test]
    fn story_fingerprint_is_stable_cache_key() {
        let a1 = Identity::from_token("token-a");
        let a2 = Identity::from_token("token-a");
        let b = Identity::from_token("token-b");

        assert_eq!(a1.fingerprint(), a2.fingerprint());
        assert_ne!(a1.fingerprint(), b.fingerprint());
        // hex sha256
        assert_eq!(a1.fingerprint().len(), 64);
    }

    /// Story: identical bytes under different schemes are different callers
    #[test]
    fn story_scheme_is_part_of_fingerprint() {
        let token = Identity::from_token("same-bytes");
        let cert = Identity::from_client_cert("same-bytes".as_bytes().to_vec());
        assert_ne!(token.fingerprint(), cert.fingerprint());
    }

    /// Story: certificate identities carry no parsed subject
    #[test]
    fn story_cert_identity_has_no_name() {
        let identity = Identity::from_client_cert(b"-----BEGIN CERTIFICATE-----".to_vec());
        assert_eq!(identity.scheme(), IdentityScheme::ClientCert);
        assert_eq!(identity.name(), None);
    }

    /// Story: the unauthenticated identity is still comparable
    #[test]
    fn story_unauthenticated_identity() {
        let identity = Identity::unauthenticated();
        assert_eq!(identity.scheme(), IdentityScheme::Unknown);
        assert_eq!(
            identity.fingerprint(),
            Identity::unauthenticated().fingerprint()
        );
    }
}
