// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! A TLS-capable, checksum-verifying, cache-backed HTTP client.

Both the RPM and DEB repository clients route every metadata and package
download through this crate so that response caching, gzip transparency and
checksum verification only need to be implemented once.
*/

use kpm_core::RepoId;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio_util::sync::CancellationToken;

pub const USER_AGENT: &str = concat!("kpm/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("error building HTTP client: {0}")]
    ClientBuild(reqwest::Error),

    #[error("error fetching {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} fetching {url}")]
    BadStatus { url: String, status: reqwest::StatusCode },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("error reading TLS material at {path}: {source}")]
    TlsMaterial {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid hex digest '{0}'")]
    BadHex(String),

    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("cancelled while fetching {0}")]
    Cancelled(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A content digest flavor used by either repository protocol.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DigestKind {
    Md5,
    Sha1,
    Sha256,
}

/// A known-good content digest, paired with the bytes it was parsed from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContentDigest {
    kind: DigestKind,
    bytes: Vec<u8>,
}

impl ContentDigest {
    pub fn from_hex(kind: DigestKind, hex_digest: &str) -> Result<Self> {
        let bytes = hex::decode(hex_digest).map_err(|_| Error::BadHex(hex_digest.to_string()))?;
        Ok(Self { kind, bytes })
    }

    pub fn kind(&self) -> DigestKind {
        self.kind
    }

    pub fn hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    fn compute(&self, data: &[u8]) -> Vec<u8> {
        use digest::Digest;
        match self.kind {
            DigestKind::Md5 => md5::Md5::digest(data).to_vec(),
            DigestKind::Sha1 => sha1::Sha1::digest(data).to_vec(),
            DigestKind::Sha256 => sha2::Sha256::digest(data).to_vec(),
        }
    }

    /// Verify `data` hashes to this digest.
    pub fn verify(&self, data: &[u8]) -> bool {
        self.compute(data) == self.bytes
    }
}

/// The bytes of an HTTP response, plus whether they are gzip-compressed.
///
/// `gzipped` is derived from the URL's `.gz` suffix or a `Content-Encoding:
/// gzip` response header that `reqwest`'s transparent decompression did not
/// already strip (we disable that feature so callers can decide).
#[derive(Clone)]
pub struct FetchedData {
    raw: Vec<u8>,
    gzipped: bool,
}

impl FetchedData {
    /// A reader over the decompressed content, re-decompressing on every
    /// call (the struct holds only the raw bytes).
    pub fn reader(&self) -> Result<Box<dyn Read + '_>> {
        if self.gzipped {
            Ok(Box::new(libflate::gzip::Decoder::new(self.raw.as_slice())?))
        } else {
            Ok(Box::new(self.raw.as_slice()))
        }
    }

    /// The fully decompressed content.
    pub fn data(&self) -> Result<Vec<u8>> {
        let mut reader = self.reader()?;
        let mut out = Vec::new();
        reader.read_to_end(&mut out)?;
        Ok(out)
    }

    /// The exact bytes as received over the wire (still compressed, if
    /// `gzipped`).
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn is_gzipped(&self) -> bool {
        self.gzipped
    }
}

type CacheKey = (u64, String);

static RESPONSE_CACHE: Lazy<RwLock<HashMap<CacheKey, FetchedData>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Per-repo TLS configuration.
#[derive(Clone, Debug, Default)]
pub struct TlsOptions {
    pub ssl_verify: bool,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub ca_cert: Option<PathBuf>,
}

impl TlsOptions {
    pub fn verified() -> Self {
        Self {
            ssl_verify: true,
            ..Default::default()
        }
    }
}

/// Caching HTTP client bound to one repository's TLS settings.
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(tls: &TlsOptions) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(!tls.ssl_verify);

        if let Some(ca_path) = &tls.ca_cert {
            let pem = std::fs::read(ca_path).map_err(|e| Error::TlsMaterial {
                path: ca_path.clone(),
                source: e,
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(Error::ClientBuild)?;
            builder = builder.add_root_certificate(cert);
        }

        if let (Some(cert_path), Some(key_path)) = (&tls.client_cert, &tls.client_key) {
            let mut pem = read_tls_file(cert_path)?;
            pem.extend(read_tls_file(key_path)?);
            let identity = reqwest::Identity::from_pem(&pem).map_err(Error::ClientBuild)?;
            builder = builder.identity(identity);
        }

        Ok(Self {
            client: builder.build().map_err(Error::ClientBuild)?,
        })
    }

    /// GET `url`, returning the cached response for `(repo_id, url)` if one
    /// already exists. `cancel` is checked before any network access and
    /// raced against the request itself, so a cancellation takes effect
    /// even mid-flight.
    pub async fn get(&self, repo_id: RepoId, url: &str, cancel: &CancellationToken) -> Result<FetchedData> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(url.to_string()));
        }

        let key = (repo_id.value(), url.to_string());

        if let Some(cached) = RESPONSE_CACHE.read().unwrap().get(&key) {
            return Ok(cached.clone());
        }

        let fetched = tokio::select! {
            result = self.fetch(url) => result?,
            _ = cancel.cancelled() => return Err(Error::Cancelled(url.to_string())),
        };
        RESPONSE_CACHE
            .write()
            .unwrap()
            .insert(key, fetched.clone());
        Ok(fetched)
    }

    /// GET `url` and ensure its decompressed content matches `checksum`,
    /// re-verifying the checksum even when the response is served from
    /// cache.
    pub async fn get_with_checksum(
        &self,
        repo_id: RepoId,
        url: &str,
        checksum: &ContentDigest,
        cancel: &CancellationToken,
    ) -> Result<FetchedData> {
        let fetched = self.get(repo_id, url, cancel).await?;
        let data = fetched.data()?;
        if !checksum.verify(&data) {
            return Err(Error::ChecksumMismatch {
                url: url.to_string(),
                expected: checksum.hex(),
                actual: hex::encode(checksum.compute(&data)),
            });
        }
        Ok(fetched)
    }

    async fn fetch(&self, url: &str) -> Result<FetchedData> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Request {
                url: url.to_string(),
                source: e,
            })?;

        if !response.status().is_success() {
            return Err(Error::BadStatus {
                url: url.to_string(),
                status: response.status(),
            });
        }

        let content_encoding_gzip = response
            .headers()
            .get(reqwest::header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("gzip"))
            .unwrap_or(false);

        let gzipped = url.ends_with(".gz") || content_encoding_gzip;

        let bytes = response.bytes().await.map_err(|e| Error::Request {
            url: url.to_string(),
            source: e,
        })?;

        Ok(FetchedData {
            raw: bytes.to_vec(),
            gzipped,
        })
    }
}

fn read_tls_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| Error::TlsMaterial {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_digest_verifies_matching_content() {
        let digest = ContentDigest::from_hex(
            DigestKind::Sha256,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde",
        )
        .unwrap();
        assert!(digest.verify(b"hello world"));
        assert!(!digest.verify(b"goodbye world"));
    }

    #[test]
    fn bad_hex_digest_is_rejected() {
        assert!(ContentDigest::from_hex(DigestKind::Sha1, "not-hex").is_err());
    }

    #[tokio::test]
    async fn already_cancelled_token_aborts_before_any_request() {
        let client = HttpClient::new(&TlsOptions::verified()).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = client.get(RepoId::next(), "http://127.0.0.1:1/", &cancel).await;
        assert!(matches!(result, Err(Error::Cancelled(_))));
    }

    #[test]
    fn fetched_data_decompresses_gzip_content() {
        use std::io::Write;
        let mut encoder = libflate::gzip::Encoder::new(Vec::new()).unwrap();
        encoder.write_all(b"kernel headers").unwrap();
        let compressed = encoder.finish().into_result().unwrap();

        let fetched = FetchedData {
            raw: compressed,
            gzipped: true,
        };
        assert_eq!(fetched.data().unwrap(), b"kernel headers");
    }
}
