//! The proxy handler: resource tables, method handlers, and the dispatch
//! loop that serves the parent process

use crate::{
    errors::{ImageError, ProxyError},
    image::{ContentDigest, DigestVerifier},
    manifest,
    manifest::media_types,
    pipes::PipePool,
    registry,
    source::{BlobReader, ImageReference, ImageSource},
    transport::{Packet, ProxySocket},
    wire,
    wire::{Reply, Request, MAX_MSG_SIZE, PROTOCOL_VERSION},
};
use serde_json::Value;
use std::{
    collections::HashMap,
    fs::File,
    io::{Read, Write},
    os::fd::{AsFd, OwnedFd},
};
use tokio::runtime::Handle;

/// An opened image: its source plus the eagerly loaded manifest
struct OpenImage {
    source: ImageSource,
    manifest: Vec<u8>,
    manifest_type: String,
}

/// Everything Initialize sets up
struct SystemContext {
    client: registry::Client,
    /// Sizes learned from parsed manifests, consulted when a source cannot
    /// report a blob's size itself
    blob_sizes: HashMap<ContentDigest, u64>,
}

/// Internal result of one handler, before serialization
#[derive(Default)]
struct ReplyBuf {
    /// Converted to the reply's `value` field
    value: Value,
    /// The read half of a pipe, passed back to the parent
    fd: Option<OwnedFd>,
    /// Provided to the parent as `pipeid`, an index into our open pipes
    pipeid: u32,
}

/// State behind the control socket
///
/// The dispatch loop owns this exclusively, so only one handler ever runs
/// at a time and the tables need no further locking. Streamer workers share
/// nothing with it except their own pipe record.
pub struct ProxyHandler {
    runtime: Handle,
    sysctx: Option<SystemContext>,
    /// Counter for open image handles; ids are never reused in a session
    image_serial: u32,
    images: HashMap<u32, OpenImage>,
    pipes: PipePool,
}

impl ProxyHandler {
    pub fn new(runtime: Handle) -> ProxyHandler {
        ProxyHandler {
            sysctx: None,
            image_serial: 0,
            images: HashMap::new(),
            pipes: PipePool::new(runtime.clone()),
            runtime,
        }
    }

    /// Serve requests until Shutdown or EOF
    pub fn serve(&mut self, socket: &ProxySocket) -> Result<(), ProxyError> {
        let mut buf = vec![0u8; MAX_MSG_SIZE];
        loop {
            let len = match socket.recv(&mut buf)? {
                Packet::Eof => return Ok(()),
                Packet::Oversized => {
                    self.send_reply(socket, Err(ProxyError::OversizedPacket(MAX_MSG_SIZE)))?;
                    continue;
                }
                Packet::Data(len) => len,
            };

            let req: Request = match serde_json::from_slice(&buf[..len]) {
                Ok(req) => req,
                Err(err) => {
                    // A packet that does not decode is not fatal; tell the
                    // parent if we can and keep serving
                    let reply = Err(ProxyError::InvalidRequest(err.to_string()));
                    if let Err(send_err) = self.send_reply(socket, reply) {
                        log::warn!("error reply failed: {}", send_err);
                    }
                    continue;
                }
            };

            log::debug!("request {} ({} args)", req.method, req.args.len());
            let (result, terminate) = self.process_request(req);
            if terminate {
                return Ok(());
            }
            self.send_reply(socket, result)?;
        }
    }

    /// Dispatch one request; the bool asks the serve loop to halt
    fn process_request(&mut self, req: Request) -> (Result<ReplyBuf, ProxyError>, bool) {
        match req.method.as_str() {
            "Initialize" => (self.initialize(&req.args), false),
            "OpenImage" => (self.open_image(&req.args), false),
            "CloseImage" => (self.close_image(&req.args), false),
            "GetManifest" => (self.get_manifest(&req.args), false),
            "GetBlob" => (self.get_blob(&req.args), false),
            "FinishPipe" => (self.finish_pipe(&req.args), false),
            // Shutdown gets no reply at all; existing parents depend on it
            "Shutdown" => (Ok(ReplyBuf::default()), true),
            method => (Err(ProxyError::UnknownMethod(method.to_owned())), false),
        }
    }

    fn send_reply(
        &self,
        socket: &ProxySocket,
        result: Result<ReplyBuf, ProxyError>,
    ) -> Result<(), ProxyError> {
        let (reply, fd) = match result {
            Ok(buf) => (
                Reply {
                    success: true,
                    value: buf.value,
                    pipeid: buf.pipeid,
                    error: String::new(),
                },
                buf.fd,
            ),
            Err(err) => {
                log::info!("request failed: {}", err);
                (
                    Reply {
                        success: false,
                        value: Value::Null,
                        pipeid: 0,
                        error: err.to_string(),
                    },
                    None,
                )
            }
        };
        let data = serde_json::to_vec(&reply)?;
        socket.send(&data, fd.as_ref().map(|fd| fd.as_fd()))?;
        // We took ownership of the read end, and the kernel has duplicated
        // it into the parent; our copy drops (and closes) here.
        Ok(())
    }

    /// Performs one-time setup and returns the protocol version
    fn initialize(&mut self, args: &[Value]) -> Result<ReplyBuf, ProxyError> {
        wire::check_args(args, 0)?;
        if self.sysctx.is_some() {
            return Err(ProxyError::AlreadyInitialized);
        }
        self.sysctx = Some(SystemContext {
            client: registry::Client::new()?,
            blob_sizes: HashMap::new(),
        });
        Ok(ReplyBuf {
            value: Value::from(PROTOCOL_VERSION),
            ..Default::default()
        })
    }

    /// Accepts a TRANSPORT:REF image reference; the return value is an
    /// opaque integer handle
    fn open_image(&mut self, args: &[Value]) -> Result<ReplyBuf, ProxyError> {
        if self.sysctx.is_none() {
            return Err(ProxyError::NotInitialized);
        }
        wire::check_args(args, 1)?;
        let reference = ImageReference::parse(wire::parse_string(&args[0], "string imageref")?)?;

        let runtime = self.runtime.clone();
        let ctx = self.sysctx.as_mut().ok_or(ProxyError::NotInitialized)?;
        let (source, raw_manifest, manifest_type) =
            runtime.block_on(ImageSource::open(&reference, &mut ctx.client))?;

        // Remember any sizes this manifest declares, for GetBlob replies
        // against sources that cannot report one
        if let Ok(parsed) = manifest::Manifest::parse(&raw_manifest) {
            for link in parsed.layers.iter().chain(Some(&parsed.config)) {
                if link.size >= 0 {
                    if let Ok(digest) = ContentDigest::parse(&link.digest) {
                        ctx.blob_sizes.insert(digest, link.size as u64);
                    }
                }
            }
        }

        self.image_serial += 1;
        let id = self.image_serial;
        self.images.insert(
            id,
            OpenImage {
                source,
                manifest: raw_manifest,
                manifest_type,
            },
        );
        Ok(ReplyBuf {
            value: Value::from(id),
            ..Default::default()
        })
    }

    fn close_image(&mut self, args: &[Value]) -> Result<ReplyBuf, ProxyError> {
        if self.sysctx.is_none() {
            return Err(ProxyError::NotInitialized);
        }
        wire::check_args(args, 1)?;
        let id = wire::parse_id(&args[0], "integer imageid")?;
        // Dropping the entry closes the underlying source
        match self.images.remove(&id) {
            Some(_) => Ok(ReplyBuf::default()),
            None => Err(ProxyError::UnknownImage(id)),
        }
    }

    /// Returns the original manifest digest, streaming a copy of the
    /// manifest converted to OCI format through an attached pipe
    fn get_manifest(&mut self, args: &[Value]) -> Result<ReplyBuf, ProxyError> {
        if self.sysctx.is_none() {
            return Err(ProxyError::NotInitialized);
        }
        wire::check_args(args, 1)?;
        let id = wire::parse_id(&args[0], "integer imageid")?;
        let image = self.images.get(&id).ok_or(ProxyError::UnknownImage(id))?;

        // Only OCI and docker schema 2 are served; schema 2 converts
        // cheaply to OCI, so parents never need to care about docker MIME
        // types at all
        match image.manifest_type.as_str() {
            media_types::OCI_MANIFEST | media_types::DOCKER_MANIFEST => {}
            media_types::DOCKER_MANIFEST_SCHEMA1 | media_types::DOCKER_MANIFEST_SCHEMA1_SIGNED => {
                return Err(ProxyError::LegacyManifestType(image.manifest_type.clone()));
            }
            other => {
                return Err(ProxyError::UnsupportedManifestType(other.to_owned()));
            }
        }

        // Always the digest of the original bytes: that is what the parent
        // needs for pull-by-digest and image identity, regardless of the
        // conversion below
        let digest = ContentDigest::from_content(&image.manifest);
        let serialized = if image.manifest_type != media_types::OCI_MANIFEST {
            manifest::convert_to_oci(&image.manifest)?
        } else {
            image.manifest.clone()
        };

        let (read_end, pipeid) = self.pipes.spawn(move |pipe| {
            let mut pipe: &File = pipe;
            pipe.write_all(&serialized)?;
            Ok(())
        })?;
        Ok(ReplyBuf {
            value: Value::from(digest.as_str()),
            fd: Some(read_end),
            pipeid,
        })
    }

    /// Streams a blob through an attached pipe, verifying its digest; the
    /// verdict is only available from the matching FinishPipe
    fn get_blob(&mut self, args: &[Value]) -> Result<ReplyBuf, ProxyError> {
        if self.sysctx.is_none() {
            return Err(ProxyError::NotInitialized);
        }
        wire::check_args(args, 3)?;
        let id = wire::parse_id(&args[0], "integer imageid")?;
        let digest = ContentDigest::parse(wire::parse_string(&args[1], "string blobid")?)?;
        let size = wire::parse_integer(&args[2], "numeric blob size")?;

        let runtime = self.runtime.clone();
        let image = self.images.get(&id).ok_or(ProxyError::UnknownImage(id))?;
        let ctx = self.sysctx.as_mut().ok_or(ProxyError::NotInitialized)?;

        let (reader, mut reported_size) =
            runtime.block_on(image.source.open_blob(&digest, &mut ctx.client, &runtime))?;
        if reported_size < 0 {
            if let Some(cached) = ctx.blob_sizes.get(&digest) {
                reported_size = *cached as i64;
            }
        }

        let verifier = DigestVerifier::new(&digest)?;
        let (read_end, pipeid) = self
            .pipes
            .spawn(move |pipe| stream_blob(reader, pipe, verifier, size))?;
        Ok(ReplyBuf {
            value: Value::from(reported_size),
            fd: Some(read_end),
            pipeid,
        })
    }

    /// Waits for the streaming worker, closes the write side of the pipe,
    /// and reports the worker's result
    fn finish_pipe(&mut self, args: &[Value]) -> Result<ReplyBuf, ProxyError> {
        if self.sysctx.is_none() {
            return Err(ProxyError::NotInitialized);
        }
        wire::check_args(args, 1)?;
        let pipeid = wire::parse_id(&args[0], "integer pipeid")?;
        self.pipes.finish(pipeid)?;
        Ok(ReplyBuf::default())
    }
}

/// Copy a blob into a pipe, counting and hashing as we go
///
/// The byte count and digest can only be judged after the source is
/// exhausted; either mismatch becomes the error FinishPipe reports.
fn stream_blob(
    mut reader: BlobReader,
    pipe: &File,
    mut verifier: DigestVerifier,
    expected_size: u64,
) -> Result<(), ImageError> {
    let mut pipe: &File = pipe;
    let mut buf = [0u8; 64 * 1024];
    let mut copied = 0u64;
    loop {
        let len = reader.read(&mut buf)?;
        if len == 0 {
            break;
        }
        verifier.update(&buf[..len]);
        pipe.write_all(&buf[..len])?;
        copied += len as u64;
    }
    if copied != expected_size {
        return Err(ImageError::UnexpectedBlobSize {
            expected: expected_size,
            found: copied,
        });
    }
    verifier.finish()
}
