//! Trust manifest: the fingerprint batch the linker must accept before any
//! module of a session can be linked.
//!
//! Packed little-endian layout:
//!
//! ```text
//! 0   u32  magic "NRR0"
//! 4   u64  owner_id
//! 12  u32  total_size          (page multiple)
//! 16  u32  type                (always 0)
//! 20  u32  table_offset        (28)
//! 24  u32  fingerprint_count
//! 28  ..   fingerprint_count × 32-byte records, then zero padding
//! ```

use bytes::{Buf, BufMut};

use crate::error::{HeapError, PluginError, PluginResult};
use crate::fingerprint::Fingerprint;
use crate::heap::{align_up, BlockRef, HeapBlock, PluginHeap, PAGE_SIZE};

/// `"NRR0"` read as a little-endian `u32`.
pub const MANIFEST_MAGIC: u32 = 0x3052_524E;
/// Length of the packed header.
pub const MANIFEST_HEADER_SIZE: usize = 28;
/// Value of the `type` field.
pub const MANIFEST_TYPE: u32 = 0;

/// A manifest built into plugin heap memory.
#[derive(Debug)]
pub struct TrustManifest {
    block: HeapBlock,
    owner_id: u64,
    count: usize,
}

impl TrustManifest {
    /// Lays out `fingerprints` in order into a zeroed, page-rounded buffer.
    pub fn build(
        heap: &PluginHeap,
        owner_id: u64,
        fingerprints: &[Fingerprint],
    ) -> Result<Self, HeapError> {
        let table_len = MANIFEST_HEADER_SIZE + fingerprints.len() * Fingerprint::LEN;
        let total = align_up(table_len, PAGE_SIZE);
        let mut block = heap.allocate_zeroed(total, PAGE_SIZE)?;

        {
            let mut bytes = block.bytes_mut()?;
            let mut out: &mut [u8] = &mut bytes;
            out.put_u32_le(MANIFEST_MAGIC);
            out.put_u64_le(owner_id);
            out.put_u32_le(total as u32);
            out.put_u32_le(MANIFEST_TYPE);
            out.put_u32_le(MANIFEST_HEADER_SIZE as u32);
            out.put_u32_le(fingerprints.len() as u32);
            for fp in fingerprints {
                out.put_slice(fp.as_bytes());
            }
        }

        Ok(Self {
            block,
            owner_id,
            count: fingerprints.len(),
        })
    }

    pub fn owner_id(&self) -> u64 {
        self.owner_id
    }

    /// Number of fingerprint records.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Size of the buffer including padding.
    pub fn total_size(&self) -> usize {
        self.block.len()
    }

    /// The encoded buffer.
    pub fn bytes(&self) -> Result<BlockRef<'_>, HeapError> {
        self.block.bytes()
    }

    /// Decodes and validates an encoded manifest.
    pub fn parse(bytes: &[u8]) -> PluginResult<ParsedManifest> {
        if bytes.len() < MANIFEST_HEADER_SIZE {
            return Err(reject(format!(
                "buffer of {} bytes is shorter than the header",
                bytes.len()
            )));
        }

        let mut cur = bytes;
        let magic = cur.get_u32_le();
        if magic != MANIFEST_MAGIC {
            return Err(reject(format!("bad magic {magic:#010x}")));
        }
        let owner_id = cur.get_u64_le();
        let total_size = cur.get_u32_le() as usize;
        let kind = cur.get_u32_le();
        let table_offset = cur.get_u32_le() as usize;
        let count = cur.get_u32_le() as usize;

        if kind != MANIFEST_TYPE {
            return Err(reject(format!("unsupported manifest type {kind}")));
        }
        if total_size > bytes.len() || total_size % PAGE_SIZE != 0 {
            return Err(reject(format!(
                "total size {total_size} is not a page multiple within {} bytes",
                bytes.len()
            )));
        }
        let table_end = table_offset
            .checked_add(count.saturating_mul(Fingerprint::LEN))
            .filter(|end| table_offset >= MANIFEST_HEADER_SIZE && *end <= total_size)
            .ok_or_else(|| reject(format!("fingerprint table of {count} records does not fit")))?;

        let fingerprints = bytes[table_offset..table_end]
            .chunks_exact(Fingerprint::LEN)
            .map(|chunk| {
                let mut record = [0u8; Fingerprint::LEN];
                record.copy_from_slice(chunk);
                Fingerprint::from_bytes(record)
            })
            .collect();

        Ok(ParsedManifest {
            owner_id,
            total_size,
            fingerprints,
        })
    }
}

fn reject(reason: String) -> PluginError {
    PluginError::ManifestRegistration(reason)
}

/// Decoded view of a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedManifest {
    pub owner_id: u64,
    pub total_size: usize,
    pub fingerprints: Vec<Fingerprint>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fps(n: u8) -> Vec<Fingerprint> {
        (1..=n).map(|i| Fingerprint::from_bytes([i; 32])).collect()
    }

    #[test]
    fn test_layout_is_bit_exact() {
        let heap = PluginHeap::root("test", 64 * 1024).unwrap();
        let manifest = TrustManifest::build(&heap, 0x0100_0000_0000_0001, &fps(2)).unwrap();
        let bytes = manifest.bytes().unwrap();

        assert_eq!(bytes.len(), PAGE_SIZE);
        assert_eq!(&bytes[0..4], b"NRR0");
        assert_eq!(&bytes[4..12], &0x0100_0000_0000_0001u64.to_le_bytes());
        assert_eq!(&bytes[12..16], &(PAGE_SIZE as u32).to_le_bytes());
        assert_eq!(&bytes[16..20], &0u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &28u32.to_le_bytes());
        assert_eq!(&bytes[24..28], &2u32.to_le_bytes());
        assert_eq!(&bytes[28..60], &[1u8; 32]);
        assert_eq!(&bytes[60..92], &[2u8; 32]);
        assert!(bytes[92..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_parse_preserves_order() {
        let heap = PluginHeap::root("test", 64 * 1024).unwrap();
        let input = fps(5);
        let manifest = TrustManifest::build(&heap, 7, &input).unwrap();
        let parsed = TrustManifest::parse(&manifest.bytes().unwrap()).unwrap();
        assert_eq!(parsed.owner_id, 7);
        assert_eq!(parsed.fingerprints, input);
    }

    #[test]
    fn test_large_batches_span_pages() {
        let heap = PluginHeap::root("test", 64 * 1024).unwrap();
        let many: Vec<_> = (0..200u16)
            .map(|i| Fingerprint::digest(&i.to_le_bytes()))
            .collect();
        let manifest = TrustManifest::build(&heap, 1, &many).unwrap();
        assert_eq!(manifest.total_size(), 2 * PAGE_SIZE);
        assert_eq!(manifest.count(), 200);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            TrustManifest::parse(&[0u8; 8]),
            Err(PluginError::ManifestRegistration(_))
        ));

        let mut bytes = vec![0u8; PAGE_SIZE];
        bytes[..4].copy_from_slice(&MANIFEST_MAGIC.to_le_bytes());
        bytes[12..16].copy_from_slice(&(PAGE_SIZE as u32).to_le_bytes());
        bytes[20..24].copy_from_slice(&28u32.to_le_bytes());
        bytes[24..28].copy_from_slice(&1000u32.to_le_bytes());
        assert!(TrustManifest::parse(&bytes).is_err());
    }
}
