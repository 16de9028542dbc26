use std::fmt;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{FsError, Result};

/// Codecs a finalized file may be stored with. The file name carries the
/// codec as a suffix (`name.gz`, `name.bz2`, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Compression {
    #[serde(rename = "gz")]
    Gzip,
    #[serde(rename = "bz2")]
    Bzip2,
    #[serde(rename = "xz")]
    Xz,
    #[serde(rename = "zst")]
    Zstd,
}

impl Compression {
    /// Every codec, in the order `load` probes suffixes.
    pub const ALL: [Compression; 4] = [Self::Gzip, Self::Bzip2, Self::Xz, Self::Zstd];

    pub fn extension(self) -> &'static str {
        match self {
            Self::Gzip => "gz",
            Self::Bzip2 => "bz2",
            Self::Xz => "xz",
            Self::Zstd => "zst",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.extension() == ext)
    }

    /// Split a known codec suffix off `file_name`.
    pub fn strip_suffix(file_name: &str) -> (&str, Option<Self>) {
        if let Some((stem, ext)) = file_name.rsplit_once('.') {
            if let Some(compression) = Self::from_extension(ext) {
                return (stem, Some(compression));
            }
        }
        (file_name, None)
    }

    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        let result = match self {
            Self::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::best());
                encoder.write_all(data).and_then(|()| encoder.finish())
            }
            Self::Bzip2 => {
                let mut encoder =
                    bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
                encoder.write_all(data).and_then(|()| encoder.finish())
            }
            Self::Xz => {
                let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
                encoder.write_all(data).and_then(|()| encoder.finish())
            }
            Self::Zstd => zstd::encode_all(data, 19),
        };
        result.map_err(|e| self.error(e))
    }

    pub fn decompress(self, data: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let result = match self {
            Self::Gzip => flate2::read::GzDecoder::new(data).read_to_end(&mut out),
            Self::Bzip2 => bzip2::read::BzDecoder::new(data).read_to_end(&mut out),
            Self::Xz => xz2::read::XzDecoder::new(data).read_to_end(&mut out),
            Self::Zstd => zstd::stream::read::Decoder::new(data)
                .and_then(|mut decoder| decoder.read_to_end(&mut out)),
        };
        result.map_err(|e| self.error(e))?;
        Ok(out)
    }

    fn error(self, err: std::io::Error) -> FsError {
        FsError::Compression {
            compression: self,
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        b"00000000000000000042-state.bin ".repeat(64)
    }

    #[test]
    fn every_codec_roundtrips_and_shrinks_repetitive_data() {
        let data = sample();
        for compression in Compression::ALL {
            let packed = compression.compress(&data).unwrap();
            assert!(packed.len() < data.len(), "{compression} did not shrink");
            assert_eq!(compression.decompress(&packed).unwrap(), data);
        }
    }

    #[test]
    fn corrupt_input_is_a_codec_error() {
        for compression in Compression::ALL {
            let err = compression.decompress(b"definitely not compressed").unwrap_err();
            assert!(matches!(err, FsError::Compression { compression: c, .. } if c == compression));
        }
    }

    #[test]
    fn suffix_parsing() {
        assert_eq!(
            Compression::strip_suffix("a-chunk.bin.xz"),
            ("a-chunk.bin", Some(Compression::Xz))
        );
        assert_eq!(Compression::strip_suffix("a-chunk.bin"), ("a-chunk.bin", None));
        assert_eq!(Compression::strip_suffix("plain"), ("plain", None));
    }
}
