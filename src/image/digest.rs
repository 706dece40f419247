use crate::errors::ImageError;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::{fmt, str, str::FromStr};

/// A digest securely identifies the specific contents of a binary object
///
/// Digests include the hash format, which is `sha256` for everything this
/// crate computes itself. Other formats parse, but cannot be verified.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct ContentDigest {
    serialized: String,
    colon: usize,
}

impl ContentDigest {
    /// Returns a reference to the existing string representation of a
    /// [ContentDigest]
    ///
    /// This string always has a single colon. Before the colon is the format
    /// specifier, lowercase alphanumeric groups joined by single separator
    /// characters. After it are 32 or more lowercase hex digits.
    pub fn as_str(&self) -> &str {
        &self.serialized
    }

    /// Parse a [prim@str] as a [ContentDigest]
    ///
    /// ```
    /// # use blobsocks::ContentDigest;
    /// let digest = ContentDigest::parse("format:00112233445566778899aabbccddeeff").unwrap();
    /// assert_eq!(digest.format_str(), "format");
    /// assert_eq!(digest.hex_str(), "00112233445566778899aabbccddeeff")
    /// ```
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref RE: Regex =
                Regex::new("^[a-z0-9]+(?:[+._-][a-z0-9]+)*:[a-f0-9]{32,}$").unwrap();
        }
        if RE.is_match(s) {
            Ok(ContentDigest {
                colon: s.find(':').expect("matched digests contain a colon"),
                serialized: s.to_owned(),
            })
        } else {
            Err(ImageError::InvalidReferenceFormat(s.to_owned()))
        }
    }

    /// Create a new ContentDigest from content data
    ///
    /// This hashes the content using the `sha256` algorithm.
    ///
    /// ```
    /// # use blobsocks::ContentDigest;
    /// let digest = ContentDigest::from_content(b"cat");
    /// assert_eq!(digest.as_str(), "sha256:77af778b51abd4a3c51c5ddd97204a9c3ae614ebccb75a606c3b6865aed6744e");
    /// ```
    pub fn from_content(content: &[u8]) -> Self {
        ContentDigest {
            serialized: format!("sha256:{:x}", Sha256::digest(content)),
            colon: "sha256".len(),
        }
    }

    /// Return a reference to the format string portion of this digest
    pub fn format_str(&self) -> &str {
        &self.serialized[..self.colon]
    }

    /// Return a reference to the hexadecimal string portion of this digest
    pub fn hex_str(&self) -> &str {
        &self.serialized[self.colon + 1..]
    }
}

impl FromStr for ContentDigest {
    type Err = ImageError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ContentDigest::parse(s)
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

/// Incrementally hashes streamed content, for comparison against the digest
/// that named it once the stream ends
pub struct DigestVerifier {
    expected: ContentDigest,
    hasher: Sha256,
}

impl DigestVerifier {
    /// Start verifying content expected to match `expected`
    ///
    /// Only `sha256` digests can be verified.
    pub fn new(expected: &ContentDigest) -> Result<DigestVerifier, ImageError> {
        if expected.format_str() != "sha256" {
            return Err(ImageError::UnsupportedDigestAlgorithm(
                expected.format_str().to_owned(),
            ));
        }
        Ok(DigestVerifier {
            expected: expected.clone(),
            hasher: Sha256::new(),
        })
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Consume the verifier, erroring unless the content matched
    pub fn finish(self) -> Result<(), ImageError> {
        let found = format!("{:x}", self.hasher.finalize());
        if found == self.expected.hex_str() {
            Ok(())
        } else {
            Err(ImageError::CorruptedBlob(self.expected))
        }
    }
}
