use crate::errors::ImageError;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

/// Stored logins and fetched pull tokens, keyed by registry host
pub struct Auth {
    logins: HashMap<String, Login>,
    tokens: HashMap<String, String>,
}

#[derive(Clone)]
struct Login {
    username: String,
    password: String,
}

/// Shape of a token server response; servers disagree on the field name
#[derive(Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

impl Auth {
    pub fn new() -> Self {
        Auth {
            logins: HashMap::new(),
            tokens: HashMap::new(),
        }
    }

    pub fn login(&mut self, registry: &str, username: String, password: String) {
        self.logins
            .insert(registry.to_owned(), Login { username, password });
    }

    /// The pull token previously fetched for this registry, if any
    pub fn token_for(&self, registry: &str) -> Option<&str> {
        self.tokens.get(registry).map(String::as_str)
    }

    /// Answer a `WWW-Authenticate` challenge by fetching a pull token
    ///
    /// Reference: <https://docs.docker.com/registry/spec/auth/token/>
    pub async fn authenticate_for(
        &mut self,
        registry: &str,
        req: &reqwest::Client,
        auth_header: &str,
    ) -> Result<(), ImageError> {
        let challenge = BearerChallenge::parse(auth_header)?;
        log::debug!("{} token challenge, realm {}", registry, challenge.realm);

        let mut url = challenge.realm.clone();
        url.query_pairs_mut()
            .append_pair("service", &challenge.service)
            .append_pair("scope", &challenge.scope);

        let mut request = req.get(url.as_str());
        if let Some(login) = self.logins.get(registry) {
            request = request.basic_auth(&login.username, Some(&login.password));
        }
        let response: TokenResponse = request.send().await?.error_for_status()?.json().await?;

        match response.token.or(response.access_token) {
            Some(token) => {
                self.tokens.insert(registry.to_owned(), token);
                Ok(())
            }
            None => Err(ImageError::UnsupportedAuthentication(
                auth_header.to_owned(),
            )),
        }
    }
}

#[derive(Debug, Clone)]
struct BearerChallenge {
    realm: Url,
    service: String,
    scope: String,
}

impl BearerChallenge {
    fn parse(auth_header: &str) -> Result<Self, ImageError> {
        lazy_static! {
            static ref RE: Regex = Regex::new(concat!(
                "^\\s*",
                "(?i:bearer)",   // Case-insensitive challenge type
                "(?:",           // multiple unordered parameters
                /* */ "\\s*",
                /* */ "(?:",     // alternative group for the parameters
                /* -- */ "(?:",  // parameter: service
                /* -- -- */ "service=",
                /* -- -- */ "\"(?P<service>",
                /* -- -- -- */ r"[\x20-\x21\x23-\x5B\x5D-\x7E]*", // allowed chars from RFC 6750
                /* -- -- */ ")\"",
                /* -- */ ")|",
                /* -- */ "(?:",  // parameter: scope
                /* -- -- */ "scope=",
                /* -- -- */ "\"(?P<scope>",
                /* -- -- -- */ r"[\x20-\x21\x23-\x5B\x5D-\x7E]*", // allowed chars from RFC 6750
                /* -- -- */ ")\"",
                /* -- */ ")|",
                /* -- */ "(?:",  // parameter: realm
                /* -- -- */ "realm=",
                /* -- -- */ "\"(?P<realm>", // capture quoted string
                /* -- -- -- */ "https://",  // require auth server to be https
                /* -- -- -- */ "[-_.+a-zA-Z:0-9/]+",
                /* -- -- */ ")\"",
                /* -- */ ")|",
                /* */ ")",
                /* */ ",?",      // to keep the parser regular, commas are all optional *shrug*
                ")*$",
            ))
            .unwrap();
        }
        match RE.captures(auth_header).map(|captures| {
            (
                captures.name("service").map(|m| m.as_str().to_owned()),
                captures.name("scope").map(|m| m.as_str().to_owned()),
                captures.name("realm").map(|m| m.as_str().parse::<Url>()),
            )
        }) {
            Some((Some(service), Some(scope), Some(Ok(realm)))) => Ok(BearerChallenge {
                realm,
                service,
                scope,
            }),
            _ => Err(ImageError::UnsupportedAuthentication(
                auth_header.to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bearer_challenge() {
        let challenge = BearerChallenge::parse(concat!(
            "Bearer realm=\"https://auth.example.invalid/token\",",
            "service=\"registry.example.invalid\",",
            "scope=\"repository:library/busybox:pull\"",
        ))
        .unwrap();
        assert_eq!(challenge.service, "registry.example.invalid");
        assert_eq!(challenge.scope, "repository:library/busybox:pull");
        assert_eq!(challenge.realm.as_str(), "https://auth.example.invalid/token");
    }

    #[test]
    fn challenge_requires_https_realm() {
        assert!(BearerChallenge::parse(concat!(
            "Bearer realm=\"http://auth.example.invalid/token\",",
            "service=\"x\",scope=\"y\"",
        ))
        .is_err());
    }

    #[test]
    fn basic_challenge_is_unsupported() {
        assert!(BearerChallenge::parse("Basic realm=\"registry\"").is_err());
    }
}
