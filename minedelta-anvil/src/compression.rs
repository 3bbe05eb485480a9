//! Chunk compression types used in the Anvil format.
//!
//! Same ids as vanilla Minecraft and Pumpkin. The high bit of the stored type
//! byte marks a payload kept outside the region in a `c.<x>.<z>.mcc` file.

use std::fmt;
use std::io::{Read, Write};

use flate2::Compression as Level;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};

use crate::error::{AnvilError, Result};

/// Flag bit in the type byte for payloads stored in an external `.mcc` file.
pub const EXTERNAL_FLAG: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Gzip,
    Zlib,
    Uncompressed,
    /// LZ4 block stream. Needs the `lz4` feature.
    Lz4,
}

impl Codec {
    pub const fn id(self) -> u8 {
        match self {
            Codec::Gzip => 1,
            Codec::Zlib => 2,
            Codec::Uncompressed => 3,
            Codec::Lz4 => 4,
        }
    }

    /// Look up a compression type id (without the external flag).
    /// Returns None for ids the format does not define, including 127 (custom).
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Codec::Gzip),
            2 => Some(Codec::Zlib),
            3 => Some(Codec::Uncompressed),
            4 => Some(Codec::Lz4),
            _ => None,
        }
    }

    /// Whether this build can read and write payloads of this type.
    pub const fn is_available(self) -> bool {
        match self {
            Codec::Lz4 => cfg!(feature = "lz4"),
            _ => true,
        }
    }

    pub fn compress(self, raw: &[u8]) -> Result<Vec<u8>> {
        let wrap = |source| AnvilError::Compression { codec: self, source };
        match self {
            Codec::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), Level::default());
                encoder.write_all(raw).map_err(wrap)?;
                encoder.finish().map_err(wrap)
            }
            Codec::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Level::default());
                encoder.write_all(raw).map_err(wrap)?;
                encoder.finish().map_err(wrap)
            }
            Codec::Uncompressed => Ok(raw.to_vec()),
            #[cfg(feature = "lz4")]
            Codec::Lz4 => {
                let mut compressed = Vec::new();
                {
                    let mut output = lz4_java_wrc::Lz4BlockOutput::new(&mut compressed);
                    output.write_all(raw).map_err(wrap)?;
                    output.flush().map_err(wrap)?;
                }
                Ok(compressed)
            }
            #[cfg(not(feature = "lz4"))]
            Codec::Lz4 => Err(AnvilError::UnsupportedCodec {
                id: self.id(),
                path: None,
            }),
        }
    }

    pub fn decompress(self, compressed: &[u8]) -> Result<Vec<u8>> {
        let wrap = |source| AnvilError::Compression { codec: self, source };
        let mut decompressed = Vec::new();
        match self {
            Codec::Zlib => {
                ZlibDecoder::new(compressed)
                    .read_to_end(&mut decompressed)
                    .map_err(wrap)?;
            }
            Codec::Gzip => {
                GzDecoder::new(compressed)
                    .read_to_end(&mut decompressed)
                    .map_err(wrap)?;
            }
            Codec::Uncompressed => decompressed.extend_from_slice(compressed),
            #[cfg(feature = "lz4")]
            Codec::Lz4 => {
                lz4_java_wrc::Lz4BlockInput::new(compressed)
                    .read_to_end(&mut decompressed)
                    .map_err(wrap)?;
            }
            #[cfg(not(feature = "lz4"))]
            Codec::Lz4 => {
                return Err(AnvilError::UnsupportedCodec {
                    id: self.id(),
                    path: None,
                });
            }
        }
        Ok(decompressed)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Codec::Gzip => "gzip",
            Codec::Zlib => "zlib",
            Codec::Uncompressed => "uncompressed",
            Codec::Lz4 => "lz4",
        })
    }
}

/// Raw contents of a chunk slot: the compression type and the bytes exactly as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPayload {
    pub codec: Codec,
    /// The data lives in `c.<x>.<z>.mcc` next to the region; `data` is then usually empty.
    pub external: bool,
    pub data: Vec<u8>,
}

impl ChunkPayload {
    pub fn new(codec: Codec, data: Vec<u8>) -> Self {
        Self {
            codec,
            external: false,
            data,
        }
    }

    /// Compress raw NBT into a payload.
    pub fn compress(codec: Codec, nbt: &[u8]) -> Result<Self> {
        Ok(Self::new(codec, codec.compress(nbt)?))
    }

    /// Decompress the stored bytes. External payloads have to be read from their `.mcc` file.
    pub fn decompress(&self) -> Result<Vec<u8>> {
        self.codec.decompress(&self.data)
    }

    /// The type byte as written in front of the payload.
    pub fn tag(&self) -> u8 {
        if self.external {
            self.codec.id() | EXTERNAL_FLAG
        } else {
            self.codec.id()
        }
    }
}
