//! Module image format.
//!
//! ```text
//! offset  size  field
//! 0       4     magic "PMOD"
//! 4       4     version (1)
//! 8       4     image_size      header-described length of the image
//! 12      4     bss_size        zero-initialised scratch the module needs
//! 16      4     kind            0 = table, 1 = native
//! 20      4     export_count
//! 24      4     import_count
//! 28      4     payload_offset
//! 32      ..    exports: (symbol, target) string pairs
//!         ..    imports: symbol strings
//!         ..    payload up to image_size
//! ```
//!
//! All integers are little-endian; strings are a `u16` length followed by
//! UTF-8 bytes.

use bytes::{Buf, BufMut};
use serde::Serialize;

use crate::error::ImageError;

/// `"PMOD"` read as a little-endian `u32`.
pub const IMAGE_MAGIC: u32 = 0x444F_4D50;
/// Current format version.
pub const IMAGE_VERSION: u32 = 1;
/// Fixed header length.
pub const HEADER_SIZE: usize = 32;

/// How the payload of an image is linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageKind {
    /// Exports resolve against a compiled-in code table.
    Table,
    /// Payload is a native shared object.
    Native,
}

impl ImageKind {
    fn from_raw(raw: u32) -> Result<Self, ImageError> {
        match raw {
            0 => Ok(Self::Table),
            1 => Ok(Self::Native),
            other => Err(ImageError::UnknownKind(other)),
        }
    }

    fn as_raw(self) -> u32 {
        match self {
            Self::Table => 0,
            Self::Native => 1,
        }
    }
}

/// Decoded fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageHeader {
    pub version: u32,
    pub image_size: u32,
    pub bss_size: u32,
    pub kind: ImageKind,
    pub export_count: u32,
    pub import_count: u32,
    pub payload_offset: u32,
}

impl ImageHeader {
    /// Decodes and range-checks the header against the buffer it came from.
    pub fn parse(bytes: &[u8]) -> Result<Self, ImageError> {
        ensure(bytes, HEADER_SIZE)?;
        let mut cur = bytes;

        let magic = cur.get_u32_le();
        if magic != IMAGE_MAGIC {
            return Err(ImageError::BadMagic(magic));
        }
        let version = cur.get_u32_le();
        if version != IMAGE_VERSION {
            return Err(ImageError::UnsupportedVersion(version));
        }
        let image_size = cur.get_u32_le();
        let bss_size = cur.get_u32_le();
        let kind = ImageKind::from_raw(cur.get_u32_le())?;
        let export_count = cur.get_u32_le();
        let import_count = cur.get_u32_le();
        let payload_offset = cur.get_u32_le();

        let declared = image_size as usize;
        if declared < HEADER_SIZE || declared > bytes.len() {
            return Err(ImageError::SizeOutOfRange {
                declared,
                minimum: HEADER_SIZE,
                available: bytes.len(),
            });
        }
        let payload = payload_offset as usize;
        if payload < HEADER_SIZE || payload > declared {
            return Err(ImageError::SizeOutOfRange {
                declared: payload,
                minimum: HEADER_SIZE,
                available: declared,
            });
        }

        Ok(Self {
            version,
            image_size,
            bss_size,
            kind,
            export_count,
            import_count,
            payload_offset,
        })
    }
}

/// One exported symbol and the code it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportEntry {
    pub symbol: String,
    pub target: String,
}

/// A fully decoded image borrowing its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedImage<'a> {
    pub header: ImageHeader,
    pub exports: Vec<ExportEntry>,
    pub imports: Vec<String>,
    pub payload: &'a [u8],
}

impl ParsedImage<'_> {
    /// Scratch bytes the table linker needs: bss plus one 8-byte slot per import.
    pub fn scratch_size(&self) -> usize {
        self.header.bss_size as usize + self.imports.len() * IMPORT_SLOT_SIZE
    }
}

/// Width of one resolved import slot in the scratch buffer.
pub const IMPORT_SLOT_SIZE: usize = 8;

/// Length of the image as declared by its header.
pub fn described_len(bytes: &[u8]) -> Result<usize, ImageError> {
    Ok(ImageHeader::parse(bytes)?.image_size as usize)
}

/// Decodes a complete image.
pub fn parse(bytes: &[u8]) -> Result<ParsedImage<'_>, ImageError> {
    let header = ImageHeader::parse(bytes)?;
    let payload_offset = header.payload_offset as usize;
    let mut cur = &bytes[HEADER_SIZE..payload_offset];

    let mut exports = Vec::with_capacity(header.export_count as usize);
    for _ in 0..header.export_count {
        let symbol = read_string(&mut cur)?;
        let target = read_string(&mut cur)?;
        exports.push(ExportEntry { symbol, target });
    }

    let mut imports = Vec::with_capacity(header.import_count as usize);
    for _ in 0..header.import_count {
        imports.push(read_string(&mut cur)?);
    }

    Ok(ParsedImage {
        header,
        exports,
        imports,
        payload: &bytes[payload_offset..header.image_size as usize],
    })
}

fn ensure(cur: &[u8], needed: usize) -> Result<(), ImageError> {
    if cur.remaining() < needed {
        return Err(ImageError::Truncated {
            needed,
            available: cur.remaining(),
        });
    }
    Ok(())
}

fn read_string(cur: &mut &[u8]) -> Result<String, ImageError> {
    ensure(cur, 2)?;
    let len = cur.get_u16_le() as usize;
    ensure(cur, len)?;
    let raw = &cur[..len];
    let s = std::str::from_utf8(raw)
        .map_err(|e| ImageError::InvalidString(e.to_string()))?
        .to_string();
    cur.advance(len);
    Ok(s)
}

/// Assembles module images.
///
/// ```rust,ignore
/// let image = ImageBuilder::table()
///     .export("plugin_main", "greeter::main")
///     .import("host_version")
///     .bss(64)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    kind: ImageKind,
    bss_size: u32,
    exports: Vec<ExportEntry>,
    imports: Vec<String>,
    payload: Vec<u8>,
}

impl ImageBuilder {
    pub fn new(kind: ImageKind) -> Self {
        Self {
            kind,
            bss_size: 0,
            exports: Vec::new(),
            imports: Vec::new(),
            payload: Vec::new(),
        }
    }

    /// Image linked against the in-process code table.
    pub fn table() -> Self {
        Self::new(ImageKind::Table)
    }

    /// Image carrying a native shared object.
    pub fn native(shared_object: Vec<u8>) -> Self {
        Self::new(ImageKind::Native).payload(shared_object)
    }

    pub fn export(mut self, symbol: impl Into<String>, target: impl Into<String>) -> Self {
        self.exports.push(ExportEntry {
            symbol: symbol.into(),
            target: target.into(),
        });
        self
    }

    pub fn import(mut self, symbol: impl Into<String>) -> Self {
        self.imports.push(symbol.into());
        self
    }

    pub fn bss(mut self, size: u32) -> Self {
        self.bss_size = size;
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Encodes the image. Strings longer than `u16::MAX` bytes are truncated.
    pub fn build(&self) -> Vec<u8> {
        let mut tables = Vec::new();
        for export in &self.exports {
            put_string(&mut tables, &export.symbol);
            put_string(&mut tables, &export.target);
        }
        for import in &self.imports {
            put_string(&mut tables, import);
        }

        let payload_offset = HEADER_SIZE + tables.len();
        let image_size = payload_offset + self.payload.len();

        let mut out = Vec::with_capacity(image_size);
        out.put_u32_le(IMAGE_MAGIC);
        out.put_u32_le(IMAGE_VERSION);
        out.put_u32_le(image_size as u32);
        out.put_u32_le(self.bss_size);
        out.put_u32_le(self.kind.as_raw());
        out.put_u32_le(self.exports.len() as u32);
        out.put_u32_le(self.imports.len() as u32);
        out.put_u32_le(payload_offset as u32);
        out.put_slice(&tables);
        out.put_slice(&self.payload);
        out
    }
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    let bytes = s.as_bytes();
    let len = bytes.len().min(u16::MAX as usize);
    out.put_u16_le(len as u16);
    out.put_slice(&bytes[..len]);
}
