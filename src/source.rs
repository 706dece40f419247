//! Image sources: transport-qualified references and the blob readers the
//! streamers consume

use crate::{
    errors::ImageError,
    image::{ContentDigest, ImageName},
    manifest::media_types,
    registry,
};
use bytes::Bytes;
use serde::Deserialize;
use std::{
    fs::File,
    io,
    io::Read,
    path::PathBuf,
};
use tokio::runtime::Handle;

/// A parsed transport-qualified image reference
///
/// `docker://NAME` names an image on a registry server. `dir:PATH` names a
/// local directory holding `manifest.json` plus blobs stored under the hex
/// portion of their digest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ImageReference {
    Docker(ImageName),
    Dir(PathBuf),
}

impl ImageReference {
    pub fn parse(s: &str) -> Result<Self, ImageError> {
        if let Some(name) = s.strip_prefix("docker://") {
            Ok(ImageReference::Docker(ImageName::parse(name)?))
        } else if let Some(path) = s.strip_prefix("dir:") {
            if path.is_empty() {
                return Err(ImageError::InvalidReferenceFormat(s.to_owned()));
            }
            Ok(ImageReference::Dir(PathBuf::from(path)))
        } else {
            match s.find(':') {
                Some(idx) => Err(ImageError::UnknownTransport(s[..idx].to_owned())),
                None => Err(ImageError::InvalidReferenceFormat(s.to_owned())),
            }
        }
    }
}

/// An open connection to one image's manifest and blobs
pub enum ImageSource {
    Registry { name: ImageName },
    Directory { path: PathBuf },
}

impl ImageSource {
    /// Open a source for `reference` and eagerly fetch its raw manifest
    ///
    /// Returns the source together with the manifest bytes and media type,
    /// so a failed fetch leaves no half-open source behind.
    pub async fn open(
        reference: &ImageReference,
        client: &mut registry::Client,
    ) -> Result<(ImageSource, Vec<u8>, String), ImageError> {
        match reference {
            ImageReference::Docker(name) => {
                let (manifest, media_type) = client.fetch_manifest(name).await?;
                let source = ImageSource::Registry { name: name.clone() };
                Ok((source, manifest, media_type))
            }
            ImageReference::Dir(path) => {
                let manifest = std::fs::read(path.join("manifest.json"))?;
                let media_type = manifest_media_type(&manifest);
                let source = ImageSource::Directory { path: path.clone() };
                Ok((source, manifest, media_type))
            }
        }
    }

    /// Open a reader over one blob
    ///
    /// The reported size is -1 when the source does not know it. Bytes are
    /// not verified here; the streamer owns verification, since the result
    /// is only decidable once the reader is exhausted.
    pub async fn open_blob(
        &self,
        digest: &ContentDigest,
        client: &mut registry::Client,
        handle: &Handle,
    ) -> Result<(BlobReader, i64), ImageError> {
        match self {
            ImageSource::Registry { name } => {
                let (response, size) = client.open_blob(name, digest).await?;
                let reader = BlobReader::Http {
                    handle: handle.clone(),
                    response,
                    chunk: Bytes::new(),
                    offset: 0,
                };
                Ok((reader, size))
            }
            ImageSource::Directory { path } => {
                let file = File::open(path.join(digest.hex_str()))?;
                let size = file.metadata()?.len() as i64;
                Ok((BlobReader::File(file), size))
            }
        }
    }
}

/// Sniff the manifest media type from the document itself
///
/// Directory sources have no HTTP header to consult. OCI manifests commonly
/// omit the field, so that is the default.
fn manifest_media_type(raw: &[u8]) -> String {
    #[derive(Deserialize)]
    struct MediaTypeOnly {
        #[serde(rename = "mediaType")]
        media_type: Option<String>,
    }
    serde_json::from_slice::<MediaTypeOnly>(raw)
        .ok()
        .and_then(|m| m.media_type)
        .unwrap_or_else(|| media_types::OCI_MANIFEST.to_owned())
}

/// Blocking reader over blob content, consumed by a pipe streamer
///
/// Registry blobs arrive as an async byte stream; the streamer runs on a
/// blocking worker, so each chunk is pulled through the runtime handle.
pub enum BlobReader {
    File(File),
    Http {
        handle: Handle,
        response: reqwest::Response,
        chunk: Bytes,
        offset: usize,
    },
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            BlobReader::File(file) => file.read(buf),
            BlobReader::Http {
                handle,
                response,
                chunk,
                offset,
            } => {
                while *offset == chunk.len() {
                    match handle.block_on(response.chunk()) {
                        Ok(Some(next)) => {
                            *chunk = next;
                            *offset = 0;
                        }
                        Ok(None) => return Ok(0),
                        Err(err) => return Err(io::Error::new(io::ErrorKind::Other, err)),
                    }
                }
                let len = buf.len().min(chunk.len() - *offset);
                buf[..len].copy_from_slice(&chunk[*offset..*offset + len]);
                *offset += len;
                Ok(len)
            }
        }
    }
}
