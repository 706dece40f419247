//! Support for fetching manifests and blobs from a registry server

use crate::{
    errors::ImageError,
    image::{ContentDigest, ImageName},
    registry::auth::Auth,
};
use reqwest::{header, StatusCode};

/// Every manifest format we can policy-check, preferred formats first
const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
    application/vnd.docker.distribution.manifest.v2+json, \
    application/vnd.docker.distribution.manifest.v1+prettyjws, \
    application/vnd.docker.distribution.manifest.v1+json";

/// Registry clients can download manifests and blobs over the v2 HTTP API
///
/// One client carries the connection pool, stored logins, and fetched pull
/// tokens for any number of registries.
pub struct Client {
    req: reqwest::Client,
    auth: Auth,
}

impl Client {
    /// Construct a new registry client with default options
    pub fn new() -> Result<Client, ImageError> {
        let req = reqwest::Client::builder()
            .user_agent(Client::default_user_agent())
            .build()?;
        Ok(Client {
            req,
            auth: Auth::new(),
        })
    }

    /// Return the default `User-Agent` that we use if no other is set
    pub fn default_user_agent() -> &'static str {
        concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
    }

    /// Store a username and password for a particular registry
    pub fn login(&mut self, registry: &str, username: String, password: String) {
        self.auth.login(registry, username, password);
    }

    /// Fetch the raw manifest for `image`, returning it with its media type
    ///
    /// When the name pins a digest, the downloaded bytes are verified
    /// against it before anything else sees them.
    pub async fn fetch_manifest(&mut self, image: &ImageName) -> Result<(Vec<u8>, String), ImageError> {
        let url = endpoint_url(image, "manifests", image.version_str());
        log::info!("{} downloading manifest...", image);
        let response = self.authorized_get(image, &url, Some(MANIFEST_ACCEPT)).await?;
        let media_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        let body = response.bytes().await?.to_vec();
        log::trace!("raw json manifest, {}", String::from_utf8_lossy(&body));

        if let Some(expected) = image.content_digest() {
            let found = ContentDigest::from_content(&body);
            if &found != expected {
                return Err(ImageError::ContentDigestMismatch {
                    expected: expected.clone(),
                    found,
                });
            }
        }
        Ok((body, media_type))
    }

    /// Open a blob for streaming
    ///
    /// Returns the response and the size the server reports, or -1 when it
    /// does not say. The body has not been read yet; the caller drains it.
    pub async fn open_blob(
        &mut self,
        image: &ImageName,
        digest: &ContentDigest,
    ) -> Result<(reqwest::Response, i64), ImageError> {
        let url = endpoint_url(image, "blobs", digest.as_str());
        log::info!("{} downloading blob {}...", image, digest);
        let response = self.authorized_get(image, &url, None).await?;
        let size = response.content_length().map(|n| n as i64).unwrap_or(-1);
        Ok((response, size))
    }

    /// GET with one retry after answering a Bearer token challenge
    async fn authorized_get(
        &mut self,
        image: &ImageName,
        url: &str,
        accept: Option<&str>,
    ) -> Result<reqwest::Response, ImageError> {
        let (registry, _) = image.resolve_endpoint();
        let mut authenticated = false;
        loop {
            let mut request = self.req.get(url);
            if let Some(accept) = accept {
                request = request.header(header::ACCEPT, accept);
            }
            if let Some(token) = self.auth.token_for(&registry) {
                request = request.bearer_auth(token);
            }
            let response = request.send().await?;

            if response.status() == StatusCode::UNAUTHORIZED && !authenticated {
                let challenge = response
                    .headers()
                    .get(header::WWW_AUTHENTICATE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned);
                if let Some(challenge) = challenge {
                    self.auth
                        .authenticate_for(&registry, &self.req, &challenge)
                        .await?;
                    authenticated = true;
                    continue;
                }
            }
            if !response.status().is_success() {
                return Err(ImageError::RegistryStatus {
                    status: response.status().as_u16(),
                    url: url.to_owned(),
                });
            }
            return Ok(response);
        }
    }
}

fn endpoint_url(image: &ImageName, kind: &str, item: &str) -> String {
    let (registry, repository) = image.resolve_endpoint();
    format!(
        "{}://{}/v2/{}/{}/{}",
        protocol_for(&registry),
        registry,
        repository,
        kind,
        item
    )
}

/// The same heuristic Docker uses for development ergonomics: a registry
/// whose domain has no dots is reached over unencrypted http
fn protocol_for(registry: &str) -> &'static str {
    let domain = registry.split(':').next().unwrap_or(registry);
    if domain.contains('.') {
        "https"
    } else {
        "http"
    }
}
