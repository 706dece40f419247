//! Manifest model for the two wire formats we serve
//!
//! The parent only ever sees OCI. Docker schema 2 manifests are close enough
//! that rewriting the media types on the manifest, config, and layers is a
//! complete conversion; everything else passes through untouched.
//!
//! References:
//! <https://github.com/opencontainers/image-spec/blob/main/manifest.md>,
//! <https://docs.docker.com/registry/spec/manifest-v2-2/>

use crate::errors::ImageError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod media_types {
    pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
    pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
    pub const DOCKER_MANIFEST_SCHEMA1: &str =
        "application/vnd.docker.distribution.manifest.v1+json";
    pub const DOCKER_MANIFEST_SCHEMA1_SIGNED: &str =
        "application/vnd.docker.distribution.manifest.v1+prettyjws";

    pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
    pub const DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";

    pub const OCI_LAYER_TAR: &str = "application/vnd.oci.image.layer.v1.tar";
    pub const OCI_LAYER_TAR_GZIP: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
    pub const OCI_LAYER_NONDISTRIBUTABLE_TAR_GZIP: &str =
        "application/vnd.oci.image.layer.nondistributable.v1.tar+gzip";
    pub const DOCKER_LAYER_TAR: &str = "application/vnd.docker.image.rootfs.diff.tar";
    pub const DOCKER_LAYER_TAR_GZIP: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";
    pub const DOCKER_LAYER_FOREIGN_TAR_GZIP: &str =
        "application/vnd.docker.image.rootfs.foreign.diff.tar.gzip";
}

/// Partial model of the v2 manifest schema, shared by OCI and Docker schema 2
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    /// OCI manifests commonly omit this; the wire media type is
    /// authoritative either way
    #[serde(rename = "mediaType", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Link,
    pub layers: Vec<Link>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

/// A content-addressed reference to one blob
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Link {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub size: i64,
    pub digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

impl Manifest {
    pub fn parse(raw: &[u8]) -> Result<Manifest, ImageError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// Rewrite a Docker schema 2 manifest as an OCI image manifest
///
/// The media types on the manifest, config, and layers are the only
/// difference the parent can observe.
pub fn convert_to_oci(raw: &[u8]) -> Result<Vec<u8>, ImageError> {
    let mut manifest = Manifest::parse(raw)?;
    manifest.media_type = Some(media_types::OCI_MANIFEST.to_owned());
    manifest.config.media_type = oci_config_type(&manifest.config.media_type)?;
    for layer in &mut manifest.layers {
        layer.media_type = oci_layer_type(&layer.media_type)?;
    }
    Ok(serde_json::to_vec(&manifest)?)
}

fn oci_config_type(media_type: &str) -> Result<String, ImageError> {
    match media_type {
        media_types::DOCKER_CONFIG | media_types::OCI_CONFIG => {
            Ok(media_types::OCI_CONFIG.to_owned())
        }
        other => Err(ImageError::UnsupportedConfigType(other.to_owned())),
    }
}

fn oci_layer_type(media_type: &str) -> Result<String, ImageError> {
    match media_type {
        media_types::DOCKER_LAYER_TAR_GZIP => Ok(media_types::OCI_LAYER_TAR_GZIP.to_owned()),
        media_types::DOCKER_LAYER_TAR => Ok(media_types::OCI_LAYER_TAR.to_owned()),
        media_types::DOCKER_LAYER_FOREIGN_TAR_GZIP => {
            Ok(media_types::OCI_LAYER_NONDISTRIBUTABLE_TAR_GZIP.to_owned())
        }
        // Layers in an already-OCI manifest pass through unchanged
        other if other.starts_with("application/vnd.oci.image.layer.") => Ok(other.to_owned()),
        other => Err(ImageError::UnsupportedLayerType(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn docker_manifest() -> Value {
        json!({
            "schemaVersion": 2,
            "mediaType": media_types::DOCKER_MANIFEST,
            "config": {
                "mediaType": media_types::DOCKER_CONFIG,
                "size": 321,
                "digest": "sha256:00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff"
            },
            "layers": [
                {
                    "mediaType": media_types::DOCKER_LAYER_TAR_GZIP,
                    "size": 654,
                    "digest": "sha256:ffeeddccbbaa99887766554433221100ffeeddccbbaa99887766554433221100"
                },
                {
                    "mediaType": media_types::DOCKER_LAYER_FOREIGN_TAR_GZIP,
                    "size": 9,
                    "digest": "sha256:aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                    "urls": ["https://example.invalid/layer"]
                }
            ]
        })
    }

    #[test]
    fn docker_converts_to_oci() {
        let raw = serde_json::to_vec(&docker_manifest()).unwrap();
        let converted = convert_to_oci(&raw).unwrap();
        let oci = Manifest::parse(&converted).unwrap();
        assert_eq!(oci.media_type.as_deref(), Some(media_types::OCI_MANIFEST));
        assert_eq!(oci.config.media_type, media_types::OCI_CONFIG);
        assert_eq!(oci.layers[0].media_type, media_types::OCI_LAYER_TAR_GZIP);
        assert_eq!(
            oci.layers[1].media_type,
            media_types::OCI_LAYER_NONDISTRIBUTABLE_TAR_GZIP
        );
        // Everything except the media types survives the rewrite
        assert_eq!(oci.schema_version, 2);
        assert_eq!(oci.config.size, 321);
        assert_eq!(oci.layers[1].urls.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn unknown_layer_type_is_an_error() {
        let mut manifest = docker_manifest();
        manifest["layers"][0]["mediaType"] = json!("application/x-very-special-layer");
        let raw = serde_json::to_vec(&manifest).unwrap();
        let err = convert_to_oci(&raw).unwrap_err();
        assert!(err.to_string().contains("unsupported type for image layer"));
    }

    #[test]
    fn unknown_config_type_is_an_error() {
        let mut manifest = docker_manifest();
        manifest["config"]["mediaType"] = json!("application/x-not-a-config");
        let raw = serde_json::to_vec(&manifest).unwrap();
        assert!(convert_to_oci(&raw).is_err());
    }
}
