//! HTTP Signatures for ActivityPub
//!
//! Implements signing and verification per:
//! https://docs.joinmastodon.org/spec/security/
//!
//! The signed header order is always an explicit value: the signer emits
//! exactly the order it was given, and the verifier rebuilds the base string
//! in the order declared by the signature itself.

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};

use super::key_signer::{KeyMaterial, KeySigner, SIGNATURE_ALGORITHM};
use crate::error::AppError;

/// Pseudo-header covering method and path
pub const REQUEST_TARGET: &str = "(request-target)";

/// Header set signed on every outbound POST
pub const POST_SIGNED_HEADERS: [&str; 4] = [REQUEST_TARGET, "host", "date", "digest"];

/// Ordered header list with case-insensitive lookup
///
/// Names keep the case they were inserted with; lookups ignore case.
/// Inserting an existing name replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a header
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
        {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<&http::HeaderMap> for HeaderList {
    /// Headers whose values are not visible ASCII are skipped.
    fn from(map: &http::HeaderMap) -> Self {
        let mut headers = HeaderList::new();
        for (name, value) in map {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str(), value);
            }
        }
        headers
    }
}

/// Header values covered by the signature of an outbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningContext {
    pub method: String,
    /// Path including query
    pub path: String,
    pub host: String,
    pub date: String,
    pub digest: Option<String>,
}

impl SigningContext {
    /// Context for a request to `url` sent now
    pub fn for_url(method: &str, url: &url::Url, body: Option<&[u8]>) -> Result<Self, AppError> {
        Ok(Self {
            method: method.to_string(),
            path: path_and_query(url),
            host: host_header_value(url)?,
            date: http_date(Utc::now()),
            digest: body.map(generate_digest),
        })
    }

    /// Header names to sign, in signing order
    pub fn required_headers(&self) -> Vec<&'static str> {
        if self.digest.is_some() {
            POST_SIGNED_HEADERS.to_vec()
        } else {
            POST_SIGNED_HEADERS[..3].to_vec()
        }
    }

    /// Concrete headers, in signing order
    pub fn headers(&self) -> HeaderList {
        let mut headers = HeaderList::new()
            .with("Host", self.host.as_str())
            .with("Date", self.date.as_str());
        if let Some(digest) = &self.digest {
            headers.insert("Digest", digest.as_str());
        }
        headers
    }
}

/// `path?query` of a URL
pub fn path_and_query(url: &url::Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// `Host` header value for a URL: host plus a non-default port
pub fn host_header_value(url: &url::Url) -> Result<String, AppError> {
    let host = url
        .host_str()
        .ok_or_else(|| AppError::Validation(format!("Missing host in URL: {}", url)))?;

    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// RFC 1123 date, always GMT
pub fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Generate SHA-256 digest header value for body
///
/// # Returns
/// `sha-256=base64(hash)`
pub fn generate_digest(body: &[u8]) -> String {
    format!("sha-256={}", BASE64.encode(Sha256::digest(body)))
}

/// Check a received `Digest` header value against the body bytes
pub fn verify_digest(digest_header: &str, body: &[u8]) -> bool {
    let expected = BASE64.encode(Sha256::digest(body));
    digest_header.split(',').any(|entry| {
        entry
            .trim()
            .split_once('=')
            .is_some_and(|(algorithm, value)| {
                algorithm.eq_ignore_ascii_case("sha-256") && value == expected
            })
    })
}

/// Build the signature base string
///
/// One line per required header, in the given order. `(request-target)`
/// becomes `<lowercased method> <path>`; any other header is emitted as
/// `<lowercased name>: <value>` with the value untouched. `host_override`
/// takes precedence over a `host` entry in `headers`.
///
/// # Errors
/// `MissingRequiredHeader` when a required header has no value.
pub fn build_signing_string<S: AsRef<str>>(
    method: &str,
    path: &str,
    headers: &HeaderList,
    required: &[S],
    host_override: Option<&str>,
) -> Result<String, AppError> {
    let mut lines = Vec::with_capacity(required.len());

    for name in required {
        let name = name.as_ref().to_ascii_lowercase();
        if name == REQUEST_TARGET {
            lines.push(format!(
                "{}: {} {}",
                REQUEST_TARGET,
                method.to_lowercase(),
                path
            ));
            continue;
        }

        let value = match (name.as_str(), host_override) {
            ("host", Some(host)) => host,
            _ => headers
                .get(&name)
                .ok_or_else(|| AppError::MissingRequiredHeader(name.clone()))?,
        };
        lines.push(format!("{}: {}", name, value));
    }

    Ok(lines.join("\n"))
}

/// Signs requests on behalf of the bot
pub struct RequestSigner {
    signer: Arc<dyn KeySigner>,
    key: Arc<KeyMaterial>,
}

impl RequestSigner {
    pub fn new(signer: Arc<dyn KeySigner>, key: Arc<KeyMaterial>) -> Self {
        Self { signer, key }
    }

    pub fn key(&self) -> &KeyMaterial {
        &self.key
    }

    /// Produce a `Signature` header value
    ///
    /// The `headers` parameter of the output lists `required` verbatim, in
    /// the same order.
    ///
    /// # Errors
    /// - `Validation` if `required` does not contain `(request-target)`
    /// - `MissingRequiredHeader` if a required header is absent
    /// - `KeyUnavailable` / `Signing` from the key signer
    pub async fn sign<S: AsRef<str>>(
        &self,
        method: &str,
        path: &str,
        headers: &HeaderList,
        required: &[S],
    ) -> Result<String, AppError> {
        if !required.iter().any(|name| name.as_ref() == REQUEST_TARGET) {
            return Err(AppError::Validation(format!(
                "Signed headers must include {}",
                REQUEST_TARGET
            )));
        }

        let signing_string = build_signing_string(method, path, headers, required, None)?;
        let digest = Sha256::digest(signing_string.as_bytes());
        let signature = self.signer.sign(&digest).await?;

        let header_names: Vec<&str> = required.iter().map(AsRef::as_ref).collect();

        Ok(format!(
            "keyId=\"{}\",algorithm=\"{}\",headers=\"{}\",signature=\"{}\"",
            self.key.key_id,
            SIGNATURE_ALGORITHM,
            header_names.join(" "),
            BASE64.encode(signature)
        ))
    }

    /// Sign an outbound request context
    ///
    /// Returns the context headers with `Signature` appended.
    pub async fn sign_context(&self, context: &SigningContext) -> Result<HeaderList, AppError> {
        let mut headers = context.headers();
        let signature = self
            .sign(
                &context.method,
                &context.path,
                &headers,
                &context.required_headers(),
            )
            .await?;
        headers.insert("Signature", signature);
        Ok(headers)
    }
}

/// `Authorization` header value carrying a signature
pub fn authorization_header(signature: &str) -> String {
    format!("Signature {}", signature)
}

/// Signature parameters from a `Signature` or `Authorization` header
///
/// Prefers `Signature`; falls back to `Authorization: Signature ...`.
pub fn signature_value(headers: &HeaderList) -> Option<&str> {
    headers.get("signature").or_else(|| {
        headers
            .get("authorization")
            .and_then(|value| value.strip_prefix("Signature "))
    })
}

/// Parsed Signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Algorithm (usually rsa-sha256)
    pub algorithm: String,
    /// Signed header names, in declared order
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
}

/// Parse Signature header value
///
/// # Format
/// ```text
/// keyId="...",algorithm="...",headers="...",signature="..."
/// ```
pub fn parse_signature_header(header: &str) -> Result<ParsedSignature, AppError> {
    let header = header.strip_prefix("Signature ").unwrap_or(header);

    let mut key_id = None;
    let mut algorithm = None;
    let mut headers = None;
    let mut signature = None;

    for part in split_params(header) {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let key = key.trim();
            // Remove quotes from value
            let value = value.trim().trim_matches('"');

            match key {
                "keyId" => key_id = Some(value.to_string()),
                "algorithm" => algorithm = Some(value.to_string()),
                "headers" => {
                    headers = Some(
                        value
                            .split_whitespace()
                            .map(|s| s.to_ascii_lowercase())
                            .collect(),
                    )
                }
                "signature" => signature = Some(value.to_string()),
                _ => {} // Ignore unknown fields
            }
        }
    }

    Ok(ParsedSignature {
        key_id: key_id.ok_or_else(|| AppError::Validation("Missing keyId".to_string()))?,
        algorithm: algorithm
            .ok_or_else(|| AppError::Validation("Missing algorithm".to_string()))?,
        headers: headers.ok_or_else(|| AppError::Validation("Missing headers".to_string()))?,
        signature: signature
            .ok_or_else(|| AppError::Validation("Missing signature".to_string()))?,
    })
}

/// Split `key="value"` pairs on commas outside quoted values
fn split_params(header: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;

    for (i, c) in header.char_indices() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => {
                parts.push(&header[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&header[start..]);
    parts
}

/// Received request, as seen by the verifier
#[derive(Debug, Clone)]
pub struct VerificationRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    /// Expected host; overrides the `host` header when set
    pub host: Option<&'a str>,
    pub headers: &'a HeaderList,
}

/// Verifies HTTP signatures
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    required: Vec<String>,
}

impl SignatureVerifier {
    /// Verifier that insists on `required` appearing in the declared header list
    pub fn new<S: AsRef<str>>(required: &[S]) -> Self {
        Self {
            required: required
                .iter()
                .map(|name| name.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Verifier for inbound POSTs: `(request-target) host date digest`
    pub fn for_post() -> Self {
        Self::new(&POST_SIGNED_HEADERS)
    }

    /// Verify a signature
    ///
    /// # Returns
    /// `Ok(true)` when the signature matches, `Ok(false)` when it does not.
    ///
    /// # Errors
    /// Structurally malformed input: unparsable parameters, unsupported
    /// algorithm, `MissingRequiredHeader`, undecodable signature, invalid key.
    pub fn verify(
        &self,
        request: &VerificationRequest<'_>,
        signature_header: &str,
        public_key_pem: &str,
    ) -> Result<bool, AppError> {
        let parsed = parse_signature_header(signature_header)?;
        self.verify_parsed(request, &parsed, public_key_pem)
    }

    pub fn verify_parsed(
        &self,
        request: &VerificationRequest<'_>,
        parsed: &ParsedSignature,
        public_key_pem: &str,
    ) -> Result<bool, AppError> {
        if parsed.algorithm != SIGNATURE_ALGORITHM && parsed.algorithm != "hs2019" {
            return Err(AppError::Validation(format!(
                "Unsupported signature algorithm: {}",
                parsed.algorithm
            )));
        }

        for required in &self.required {
            if !parsed.headers.iter().any(|h| h == required) {
                return Err(AppError::MissingRequiredHeader(required.clone()));
            }
        }

        let signing_string = build_signing_string(
            request.method,
            request.path,
            request.headers,
            &parsed.headers,
            request.host,
        )?;

        let signature = BASE64
            .decode(&parsed.signature)
            .map_err(|_| AppError::Validation("Invalid signature encoding".to_string()))?;

        let public_key = RsaPublicKey::from_public_key_pem(public_key_pem)
            .map_err(|e| AppError::Validation(format!("Invalid public key: {}", e)))?;

        let digest = Sha256::digest(signing_string.as_bytes());
        Ok(public_key
            .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature)
            .is_ok())
    }
}

/// Validate that signature keyId points to the same actor as the activity actor.
pub fn key_id_matches_actor(key_id: &str, actor_id: &str) -> bool {
    let key_actor = key_id.split('#').next().unwrap_or(key_id);
    let actor = actor_id.split('#').next().unwrap_or(actor_id);
    key_actor == actor
}
