//! Upload session identity and lifecycle.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use time::OffsetDateTime;

/// An opaque, traversal-safe identifier for an in-progress chunked upload.
///
/// Derived as SHA-256 over the caller's security token and the original
/// file name. The digest is the only thing that ever reaches the
/// filesystem; the raw file name never influences a path.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey([u8; 32]);

impl SessionKey {
    /// Derive a session key from a security token and the client-supplied
    /// original file name.
    ///
    /// A zero byte separates the two inputs so that ("ab", "c") and
    /// ("a", "bc") hash differently. Deterministic for equal inputs.
    pub fn derive(security_token: &str, file_name: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(security_token.as_bytes());
        hasher.update([0u8]);
        hasher.update(file_name.as_bytes());
        Self(hasher.finalize().into())
    }

    /// Parse from a 64-character lowercase hex string.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 64 {
            return Err(crate::Error::InvalidSessionKey(format!(
                "expected 64 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            let hex_str = std::str::from_utf8(chunk)
                .map_err(|e| crate::Error::InvalidSessionKey(e.to_string()))?;
            bytes[i] = u8::from_str_radix(hex_str, 16)
                .map_err(|e| crate::Error::InvalidSessionKey(e.to_string()))?;
        }
        Ok(Self(bytes))
    }

    /// Encode as lowercase hex. Contains no path separators.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Get the spool key for this session's accumulating artifact.
    /// Fans out on the first hex byte to keep directories small.
    pub fn to_spool_key(&self) -> String {
        let hex = self.to_hex();
        format!("{}/{}", &hex[..2], hex)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Upload session state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Session is open and accepting chunks.
    Open,
    /// The artifact reached the declared size and was promoted.
    Finalized,
    /// Session failed (overshoot or append corruption).
    Failed,
}

impl SessionState {
    /// Parse from the database representation.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "open" => Ok(Self::Open),
            "finalized" => Ok(Self::Finalized),
            "failed" => Ok(Self::Failed),
            other => Err(crate::Error::Session(format!(
                "unknown session state: {other}"
            ))),
        }
    }

    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Finalized => "finalized",
            Self::Failed => "failed",
        }
    }

    /// Check if the session can receive further chunks.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// An explicit upload session record.
///
/// The artifact's on-disk size stays authoritative for completion checks;
/// `bytes_written` mirrors it for observability and sweep decisions only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadSession {
    /// Derived identity of this upload.
    pub key: SessionKey,
    /// Client-supplied original file name. Display/extension use only.
    pub file_name: String,
    /// Declared total size in bytes.
    pub declared_size: u64,
    /// Bytes appended so far (informational).
    pub bytes_written: u64,
    /// Current session state.
    pub state: SessionState,
    /// When the session was created (first chunk arrival).
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the session was last touched.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// When the session becomes eligible for sweep.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl UploadSession {
    /// Create a new open session expiring after `expires_in`.
    pub fn new(
        key: SessionKey,
        file_name: String,
        declared_size: u64,
        expires_in: time::Duration,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            key,
            file_name,
            declared_size,
            bytes_written: 0,
            state: SessionState::Open,
            created_at: now,
            updated_at: now,
            expires_at: now + expires_in,
        }
    }

    /// Check if the session has expired.
    pub fn is_expired(&self) -> bool {
        OffsetDateTime::now_utc() > self.expires_at
    }
}

/// Result of comparing the artifact's size against the declared total.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Fewer bytes on disk than declared; more chunks expected.
    Incomplete,
    /// Exactly the declared size; ready to finalize.
    Complete,
    /// More bytes on disk than declared; the artifact is corrupt.
    Overshot,
}

impl Completion {
    /// Compare the artifact size on disk against the declared total.
    ///
    /// Equality is strict: overshoot is never "complete".
    pub fn check(actual: u64, declared: u64) -> Self {
        use std::cmp::Ordering;
        match actual.cmp(&declared) {
            Ordering::Less => Self::Incomplete,
            Ordering::Equal => Self::Complete,
            Ordering::Greater => Self::Overshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        let a = SessionKey::derive("token-1", "report.pdf");
        let b = SessionKey::derive("token-1", "report.pdf");
        assert_eq!(a, b);
        assert_eq!(a.to_hex(), b.to_hex());
    }

    #[test]
    fn derive_distinguishes_inputs() {
        let a = SessionKey::derive("token-1", "report.pdf");
        let b = SessionKey::derive("token-2", "report.pdf");
        let c = SessionKey::derive("token-1", "other.pdf");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn derive_separates_token_and_name() {
        // Without a separator these two would collide.
        let a = SessionKey::derive("ab", "c.bin");
        let b = SessionKey::derive("a", "bc.bin");
        assert_ne!(a, b);
    }

    #[test]
    fn key_contains_no_path_separators() {
        // Hostile names full of separators and traversal sequences still
        // produce a plain hex identifier.
        for name in ["../../etc/passwd", "a/b\\c", "..", "/absolute", "nul\0byte"] {
            let key = SessionKey::derive("none", name);
            let hex = key.to_hex();
            assert_eq!(hex.len(), 64);
            assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
            assert!(!hex.contains('/'));
            assert!(!hex.contains('\\'));
        }
    }

    #[test]
    fn hex_roundtrip() {
        let key = SessionKey::derive("tok", "name.zip");
        let parsed = SessionKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key, parsed);
        assert!(SessionKey::from_hex("short").is_err());
        assert!(SessionKey::from_hex(&"g".repeat(64)).is_err());
    }

    #[test]
    fn spool_key_fans_out() {
        let key = SessionKey::derive("tok", "name.zip");
        let spool_key = key.to_spool_key();
        let (prefix, rest) = spool_key.split_once('/').unwrap();
        assert_eq!(prefix.len(), 2);
        assert_eq!(rest, key.to_hex());
    }

    #[test]
    fn completion_is_strict_equality() {
        assert_eq!(Completion::check(5, 10), Completion::Incomplete);
        assert_eq!(Completion::check(10, 10), Completion::Complete);
        assert_eq!(Completion::check(11, 10), Completion::Overshot);
        assert_eq!(Completion::check(0, 0), Completion::Complete);
    }

    #[test]
    fn session_state_roundtrip() {
        for state in [
            SessionState::Open,
            SessionState::Finalized,
            SessionState::Failed,
        ] {
            assert_eq!(SessionState::parse(state.as_str()).unwrap(), state);
        }
        assert!(SessionState::parse("committing").is_err());
        assert!(SessionState::Open.is_active());
        assert!(!SessionState::Finalized.is_active());
    }

    #[test]
    fn session_expiry() {
        let key = SessionKey::derive("tok", "f");
        let session = UploadSession::new(key, "f".into(), 1, time::Duration::seconds(-1));
        assert!(session.is_expired());

        let session = UploadSession::new(key, "f".into(), 1, time::Duration::seconds(60));
        assert!(!session.is_expired());
    }
}
