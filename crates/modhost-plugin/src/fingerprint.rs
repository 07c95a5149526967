//! Content fingerprints of module images.

use std::fmt;

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::ImageError;
use crate::image;

/// SHA-256 digest identifying a module image by content.
///
/// Computed over the header-described length of the image, so trailing
/// bytes in the file do not change a module's identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; Fingerprint::LEN]);

impl Fingerprint {
    /// Length of a fingerprint record in bytes.
    pub const LEN: usize = 32;

    /// Hashes `bytes` as-is.
    pub fn digest(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; Self::LEN];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Hashes the header-described prefix of a module image.
    pub fn of_image(bytes: &[u8]) -> Result<Self, ImageError> {
        let len = image::described_len(bytes)?;
        Ok(Self::digest(&bytes[..len]))
    }

    /// Wraps raw digest bytes.
    pub const fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; Self::LEN] {
        &self.0
    }

    /// Upper-case hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }

    /// Parses a 64-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut out = [0u8; Self::LEN];
        hex::decode_to_slice(s, &mut out).ok()?;
        Some(Self(out))
    }

    /// First eight hex digits, for log lines.
    pub fn short(&self) -> String {
        hex::encode_upper(&self.0[..4])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::ImageBuilder;

    #[test]
    fn test_digest_is_sha256() {
        let fp = Fingerprint::digest(b"abc");
        assert_eq!(
            fp.to_hex(),
            "BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD"
        );
        assert_eq!(Fingerprint::from_hex(&fp.to_hex()), Some(fp));
    }

    #[test]
    fn test_trailing_bytes_do_not_change_identity() {
        let image = ImageBuilder::table().payload(b"body".to_vec()).build();
        let mut padded = image.clone();
        padded.extend_from_slice(&[0xAA; 100]);

        let a = Fingerprint::of_image(&image).unwrap();
        let b = Fingerprint::of_image(&padded).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Fingerprint::digest(&padded));
    }

    #[test]
    fn test_serializes_as_hex() {
        let fp = Fingerprint::from_bytes([0xAB; 32]);
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", "AB".repeat(32)));
        assert_eq!(format!("{fp:?}"), "Fingerprint(ABABABAB)");
    }
}
