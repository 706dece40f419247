#[cfg(not(any(target_os = "linux", target_os = "android")))]
compile_error!("blobsocks only works on linux or android");

#[macro_use] extern crate lazy_static;

mod errors;
mod image;
mod manifest;
mod pipes;
mod proxy;
mod registry;
mod source;
mod transport;
mod wire;

pub use crate::{
    errors::{ImageError, ProxyError},
    image::{ContentDigest, DigestVerifier, ImageName},
    proxy::ProxyHandler,
    registry::Client,
    source::ImageReference,
    transport::ProxySocket,
    wire::PROTOCOL_VERSION,
};
