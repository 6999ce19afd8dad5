//! Reading through (and, for fixtures, writing) a compression layer.

use crate::Compression;
use crate::error::{ErrorKind, Result};
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use exn::ResultExt;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};
use tracing::instrument;

impl Compression {
    /// Wrap `reader` so reading from the result yields decoded bytes.
    ///
    /// The decoder is `Send` so entry streams can move onto blocking worker
    /// threads. Corrupt input is only noticed once reading starts, as an
    /// `std::io::Error` from the returned reader.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::io::{Cursor, Read};
    /// use tandem_compress::Compression;
    ///
    /// let packed = Compression::Bzip2.encode(b"quarterly figures").unwrap();
    /// let mut text = String::new();
    /// Compression::Bzip2.decoder(Cursor::new(packed)).unwrap().read_to_string(&mut text).unwrap();
    /// assert_eq!(text, "quarterly figures");
    /// ```
    pub fn decoder<'a, R: Read + Send + 'a>(&self, reader: R) -> Result<Box<dyn Read + Send + 'a>> {
        Ok(match self {
            Self::None => Box::new(reader),
            Self::Bzip2 => Box::new(BzDecoder::new(reader)),
            Self::Gzip => Box::new(GzDecoder::new(reader)),
            #[cfg(feature = "xz")]
            Self::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
            #[cfg(feature = "zstd")]
            Self::Zstd => Box::new(
                zstd::stream::read::Decoder::new(reader).or_raise(|| ErrorKind::Codec(self.to_string()))?,
            ),
        })
    }

    /// Decode a whole buffer.
    pub fn decode(&self, input: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.decoder(input)?.read_to_end(&mut output).or_raise(|| ErrorKind::InvalidData)?;
        Ok(output)
    }

    /// Encode a whole buffer at the fastest level.
    #[instrument(level = "debug", skip(input), fields(format = %self, size = input.len()))]
    pub fn encode(&self, input: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::None => Ok(input.to_vec()),
            Self::Bzip2 => finish(BzEncoder::new(Vec::new(), bzip2::Compression::fast()), input, |e| e.finish()),
            Self::Gzip => finish(GzEncoder::new(Vec::new(), flate2::Compression::fast()), input, |e| e.finish()),
            #[cfg(feature = "xz")]
            Self::Xz => finish(xz2::write::XzEncoder::new(Vec::new(), 1), input, |e| e.finish()),
            #[cfg(feature = "zstd")]
            Self::Zstd => {
                let encoder =
                    zstd::stream::write::Encoder::new(Vec::new(), 1).or_raise(|| ErrorKind::Codec(self.to_string()))?;
                finish(encoder, input, |e| e.finish())
            },
        }
    }
}

fn finish<W: Write>(
    mut encoder: W,
    input: &[u8],
    close: impl FnOnce(W) -> std::io::Result<Vec<u8>>,
) -> Result<Vec<u8>> {
    encoder.write_all(input).or_raise(|| ErrorKind::Io)?;
    close(encoder).or_raise(|| ErrorKind::Io)
}

#[cfg(test)]
mod tests {
    use crate::Compression;
    use crate::error::ErrorKind;
    use rstest::rstest;
    use std::io::{Cursor, Read};

    #[rstest]
    #[case(Compression::None)]
    #[case(Compression::Bzip2)]
    #[case(Compression::Gzip)]
    #[cfg_attr(feature = "xz", case(Compression::Xz))]
    #[cfg_attr(feature = "zstd", case(Compression::Zstd))]
    fn test_decoder_reads_what_encode_wrote(#[case] format: Compression) {
        let original = b"Column A,Column B\n1,2\n3,4\n".repeat(20);
        let packed = format.encode(&original).unwrap();
        assert!(format.check_magic_bytes(&packed));
        assert_eq!(format.decode(&packed).unwrap(), original);
    }

    #[rstest]
    #[case(Compression::Bzip2)]
    #[case(Compression::Gzip)]
    fn test_garbage_is_invalid(#[case] format: Compression) {
        let err = format.decode(b"This is not compressed data").unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_stream_fails_on_read() {
        let packed = Compression::Bzip2.encode(&[7u8; 4096]).unwrap();
        let mut reader = Compression::Bzip2.decoder(Cursor::new(packed[..packed.len() / 2].to_vec())).unwrap();
        let mut sink = Vec::new();
        assert!(reader.read_to_end(&mut sink).is_err());
    }
}
