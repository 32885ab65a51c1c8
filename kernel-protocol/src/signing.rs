//! Keyed message signatures
//!
//! The signature is the lower-case hex HMAC digest of the four serialized
//! payload parts (header, parent header, metadata, content) in that order.
//! An empty key selects the unsigned mode: signatures are empty and every
//! incoming signature is accepted, including forged ones.

use crate::error::{ProtocolError, ProtocolResult};
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use std::fmt;
use std::str::FromStr;

/// Supported HMAC algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    HmacSha256,
    HmacSha512,
}

impl SignatureScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureScheme::HmacSha256 => "hmac-sha256",
            SignatureScheme::HmacSha512 => "hmac-sha512",
        }
    }
}

impl FromStr for SignatureScheme {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hmac-sha256" | "hmacsha256" => Ok(SignatureScheme::HmacSha256),
            "hmac-sha512" | "hmacsha512" => Ok(SignatureScheme::HmacSha512),
            other => Err(ProtocolError::UnsupportedScheme(other.to_string())),
        }
    }
}

impl fmt::Display for SignatureScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
enum Keyed {
    Unsigned,
    Sha256(Hmac<Sha256>),
    Sha512(Hmac<Sha512>),
}

/// Signs and verifies envelope payloads
#[derive(Clone)]
pub struct Signer {
    keyed: Keyed,
}

impl Signer {
    /// Build a signer for `scheme`. An empty `key` yields the unsigned mode
    /// regardless of scheme, but the scheme name must still be valid.
    pub fn new(scheme: &str, key: &str) -> ProtocolResult<Self> {
        let scheme: SignatureScheme = scheme.parse()?;
        if key.is_empty() {
            return Ok(Self::unsigned());
        }

        let keyed = match scheme {
            SignatureScheme::HmacSha256 => Keyed::Sha256(
                Hmac::<Sha256>::new_from_slice(key.as_bytes())
                    .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?,
            ),
            SignatureScheme::HmacSha512 => Keyed::Sha512(
                Hmac::<Sha512>::new_from_slice(key.as_bytes())
                    .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?,
            ),
        };

        Ok(Self { keyed })
    }

    /// Explicit no-signature mode
    pub fn unsigned() -> Self {
        Self {
            keyed: Keyed::Unsigned,
        }
    }

    pub fn is_signing(&self) -> bool {
        !matches!(self.keyed, Keyed::Unsigned)
    }

    /// Hex digest over the four payload parts; empty in unsigned mode
    pub fn sign(&self, parts: [&[u8]; 4]) -> String {
        match &self.keyed {
            Keyed::Unsigned => String::new(),
            Keyed::Sha256(mac) => hex::encode(digest(mac, parts).finalize().into_bytes()),
            Keyed::Sha512(mac) => hex::encode(digest(mac, parts).finalize().into_bytes()),
        }
    }

    /// Constant-time comparison of `signature` against the payload digest.
    /// Always true in unsigned mode.
    pub fn verify(&self, signature: &[u8], parts: [&[u8]; 4]) -> bool {
        let expected = match hex::decode(signature) {
            Ok(bytes) => bytes,
            Err(_) => return !self.is_signing(),
        };

        match &self.keyed {
            Keyed::Unsigned => true,
            Keyed::Sha256(mac) => digest(mac, parts).verify_slice(&expected).is_ok(),
            Keyed::Sha512(mac) => digest(mac, parts).verify_slice(&expected).is_ok(),
        }
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.keyed {
            Keyed::Unsigned => "unsigned",
            Keyed::Sha256(_) => "hmac-sha256",
            Keyed::Sha512(_) => "hmac-sha512",
        };
        f.debug_struct("Signer").field("mode", &mode).finish()
    }
}

fn digest<M: Mac + Clone>(keyed: &M, parts: [&[u8]; 4]) -> M {
    let mut mac = keyed.clone();
    for part in parts {
        mac.update(part);
    }
    mac
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARTS: [&[u8]; 4] = [
        br#"{"msg_id":"1","msg_type":"execute_request"}"#,
        b"{}",
        b"{}",
        br#"{"code":"1+1"}"#,
    ];

    #[test]
    fn test_sign_then_verify() {
        for scheme in ["hmac-sha256", "hmac-sha512"] {
            let signer = Signer::new(scheme, "secret").unwrap();
            let signature = signer.sign(PARTS);
            assert!(!signature.is_empty());
            assert!(signature.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
            assert!(signer.verify(signature.as_bytes(), PARTS));
        }
    }

    #[test]
    fn test_single_byte_mutation_fails() {
        let signer = Signer::new("hmac-sha256", "secret").unwrap();
        let signature = signer.sign(PARTS);

        for index in 0..4 {
            let mut mutated: Vec<Vec<u8>> = PARTS.iter().map(|p| p.to_vec()).collect();
            mutated[index][0] ^= 0x01;
            let parts = [
                mutated[0].as_slice(),
                mutated[1].as_slice(),
                mutated[2].as_slice(),
                mutated[3].as_slice(),
            ];
            assert!(!signer.verify(signature.as_bytes(), parts), "part {} mutated", index);
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let signer = Signer::new("hmac-sha256", "secret").unwrap();
        let other = Signer::new("hmac-sha256", "other").unwrap();
        let signature = other.sign(PARTS);
        assert!(!signer.verify(signature.as_bytes(), PARTS));
        assert!(!signer.verify(b"", PARTS));
        assert!(!signer.verify(b"not-hex", PARTS));
    }

    #[test]
    fn test_unsigned_mode_accepts_forgeries() {
        let signer = Signer::new("hmac-sha256", "").unwrap();
        assert!(!signer.is_signing());
        assert_eq!(signer.sign(PARTS), "");
        assert!(signer.verify(b"", PARTS));
        assert!(signer.verify(b"deadbeef", PARTS));
        assert!(signer.verify(b"definitely not a signature", PARTS));
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        let err = Signer::new("md5", "secret").unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedScheme(_)));
        assert_eq!(
            "HMAC-SHA256".parse::<SignatureScheme>().unwrap(),
            SignatureScheme::HmacSha256
        );
    }
}
