// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Loads OpenPGP keyrings and gates repository content on signature verification.

A [Keyring] is built from a list of key URLs taken straight out of repo
configuration (`gpgkey=` lines, `Signed-By` stanzas, ...). `file://` URLs are
relocated through [kpm_path] before being read; `http://`/`https://` URLs go
through [kpm_http::HttpClient]. One armored file can itself hold more than one
key (distros commonly ship multi-subkey keyrings or concatenate a release key
and a security key in a single `gpgkey` file), so each source is parsed with
`from_armor_many` rather than assuming a single key per URL.
*/

use kpm_core::KpmLogger;
use pgp::types::{KeyTrait, PublicKeyTrait};
use pgp::{Deserializable, SignedPublicKey, StandaloneSignature};
use std::collections::HashSet;
use std::io::Cursor;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error reading key at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error fetching key {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: kpm_http::Error,
    },

    #[error("unsupported key URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("no keys could be loaded from the configured gpgkey URLs")]
    NoKeysLoaded,

    #[error("cleartext signature verification failed: {0}")]
    Verification(#[from] pgp::errors::Error),

    #[error("no cleartext PGP signature found")]
    NoCleartextSignature,
}

pub type Result<T> = std::result::Result<T, Error>;

/// A set of trusted OpenPGP public keys, loaded once per repository.
pub struct Keyring {
    keys: Vec<SignedPublicKey>,
}

impl Keyring {
    /// Load every key reachable from `urls`, skipping (and logging) any
    /// individual source that fails to fetch or parse. Succeeds as long as
    /// at least one key was loaded across all sources; a duplicate URL is
    /// only fetched once.
    pub async fn load(
        urls: &[String],
        http: &kpm_http::HttpClient,
        repo_id: kpm_core::RepoId,
        logger: &dyn KpmLogger,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let mut keys = Vec::new();
        let mut seen = HashSet::new();

        for url in urls {
            if !seen.insert(url.clone()) {
                continue;
            }

            match fetch_armored_text(url, http, repo_id, cancel).await {
                Ok(armored) => match parse_keys(&armored) {
                    Ok(parsed) => {
                        logger.debug(&format!("loaded {} key(s) from {}", parsed.len(), url));
                        keys.extend(parsed);
                    }
                    Err(e) => logger.warn(&format!("ignoring unparseable key at {}: {}", url, e)),
                },
                Err(e) => logger.warn(&format!("ignoring unreachable key at {}: {}", url, e)),
            }
        }

        if keys.is_empty() {
            return Err(Error::NoKeysLoaded);
        }

        Ok(Self { keys })
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Verify a PGP cleartext-framework document (a DEB `InRelease` file)
    /// against every key in this keyring. Returns `true` as soon as any key
    /// produces at least one valid signature.
    pub fn verify_cleartext(&self, data: &[u8]) -> Result<bool> {
        let mut reader = pgp_cleartext::CleartextSignatureReader::new(Cursor::new(data));
        std::io::copy(&mut reader, &mut std::io::sink()).map_err(|e| Error::Io {
            path: "<cleartext signature>".to_string(),
            source: e,
        })?;
        let signatures = reader.finalize();

        if signatures.iter_signatures().next().is_none() {
            return Err(Error::NoCleartextSignature);
        }

        for key in &self.keys {
            if signatures.verify(key).is_ok() {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Verify a detached, non-armored OpenPGP signature packet (the binary
    /// signature RPM embeds in its signature header) over `signed_content`.
    ///
    /// Unlike the cleartext framework, RPM signatures are not wrapped in an
    /// ASCII-armored `-----BEGIN PGP SIGNATURE-----` block, so the packet is
    /// parsed directly from its raw bytes rather than through the armor
    /// reader.
    pub fn verify_detached(&self, signed_content: &[u8], signature_bytes: &[u8]) -> Result<bool> {
        let signature = StandaloneSignature::from_bytes(Cursor::new(signature_bytes))?;

        for key in &self.keys {
            if signature.verify(key, signed_content).is_ok() {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Key IDs of every loaded key, for diagnostic logging.
    pub fn key_ids(&self) -> Vec<String> {
        self.keys
            .iter()
            .map(|k| hex::encode_upper(k.key_id().to_vec()))
            .collect()
    }
}

async fn fetch_armored_text(
    url: &str,
    http: &kpm_http::HttpClient,
    repo_id: kpm_core::RepoId,
    cancel: &CancellationToken,
) -> Result<String> {
    if let Some(path) = url.strip_prefix("file://") {
        let relocated = kpm_path::host_etc_join(&[path]);
        return std::fs::read_to_string(&relocated).map_err(|e| Error::Io {
            path: relocated.display().to_string(),
            source: e,
        });
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        let fetched = http
            .get(repo_id, url, cancel)
            .await
            .map_err(|e| Error::Http { url: url.to_string(), source: e })?;
        let data = fetched
            .data()
            .map_err(|e| Error::Http { url: url.to_string(), source: e })?;
        return Ok(String::from_utf8_lossy(&data).into_owned());
    }

    Err(Error::UnsupportedScheme(url.to_string()))
}

fn parse_keys(armored: &str) -> pgp::errors::Result<Vec<SignedPublicKey>> {
    let (keys, _headers) = SignedPublicKey::from_armor_many(Cursor::new(armored.as_bytes()))?;
    keys.collect::<pgp::errors::Result<Vec<_>>>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pgp::crypto::HashAlgorithm;
    use pgp::types::{CompressionAlgorithm, SecretKeyTrait};
    use pgp::{KeyType, SecretKeyParamsBuilder, SignedSecretKey};
    use smallvec::smallvec;

    /// Generate a throwaway self-signed key pair for a test, the same way
    /// a repository publishing step would mint a signing key.
    fn generate_test_key() -> (SignedSecretKey, SignedPublicKey) {
        let unsigned_secret_key = SecretKeyParamsBuilder::default()
            .key_type(KeyType::Rsa(2048))
            .preferred_compression_algorithms(smallvec![CompressionAlgorithm::ZLIB])
            .can_create_certificates(false)
            .can_sign(true)
            .primary_user_id("Test Key <test@example.org>".to_string())
            .build()
            .unwrap()
            .generate()
            .unwrap();

        let secret_key = unsigned_secret_key.sign(String::new).unwrap();
        let public_key = secret_key.public_key().sign(&secret_key, String::new).unwrap();
        (secret_key, public_key)
    }

    fn armor_public_key(key: &SignedPublicKey) -> String {
        key.to_armored_string(None).unwrap()
    }

    #[test]
    fn parses_a_single_armored_key() {
        let (_, public_key) = generate_test_key();
        let armored = armor_public_key(&public_key);
        let keys = parse_keys(&armored).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_id(), public_key.key_id());
    }

    #[test]
    fn parsing_invalid_armor_fails() {
        assert!(parse_keys("not a key").is_err());
    }

    #[tokio::test]
    async fn loading_from_an_unsupported_scheme_is_skipped_not_fatal() {
        let http = kpm_http::HttpClient::new(&kpm_http::TlsOptions::verified()).unwrap();
        let repo_id = kpm_core::RepoId::next();
        let urls = vec!["ftp://example.org/key.asc".to_string()];
        let cancel = CancellationToken::new();
        let result = Keyring::load(&urls, &http, repo_id, &kpm_core::NullLogger, &cancel).await;
        assert!(matches!(result, Err(Error::NoKeysLoaded)));
    }

    #[tokio::test]
    async fn loading_a_file_url_reads_and_parses_the_key() {
        let (_, public_key) = generate_test_key();
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("key.asc");
        std::fs::write(&key_path, armor_public_key(&public_key)).unwrap();
        let url = format!("file://{}", key_path.display());

        let http = kpm_http::HttpClient::new(&kpm_http::TlsOptions::verified()).unwrap();
        let repo_id = kpm_core::RepoId::next();
        let cancel = CancellationToken::new();
        let keyring = Keyring::load(&[url.clone(), url], &http, repo_id, &kpm_core::NullLogger, &cancel)
            .await
            .unwrap();
        // The duplicate URL is only loaded once.
        assert_eq!(keyring.len(), 1);
    }

    #[test]
    fn cleartext_without_a_signature_is_rejected() {
        let (_, public_key) = generate_test_key();
        let keyring = Keyring { keys: vec![public_key] };
        let err = keyring.verify_cleartext(b"plain text, no framework").unwrap_err();
        assert!(matches!(err, Error::NoCleartextSignature));
    }

    #[test]
    fn cleartext_signed_by_a_loaded_key_verifies() {
        let (secret_key, public_key) = generate_test_key();
        let content = "Origin: test\nLabel: test\n";
        let signed = pgp_cleartext::cleartext_sign(
            &secret_key,
            String::new,
            HashAlgorithm::SHA2_256,
            std::io::Cursor::new(content.as_bytes()),
        )
        .unwrap();

        let keyring = Keyring { keys: vec![public_key] };
        assert!(keyring.verify_cleartext(signed.as_bytes()).unwrap());
    }

    #[test]
    fn cleartext_signed_by_an_unrelated_key_does_not_verify() {
        let (secret_key, _) = generate_test_key();
        let (_, other_public_key) = generate_test_key();
        let content = "Origin: test\n";
        let signed = pgp_cleartext::cleartext_sign(
            &secret_key,
            String::new,
            HashAlgorithm::SHA2_256,
            std::io::Cursor::new(content.as_bytes()),
        )
        .unwrap();

        let keyring = Keyring { keys: vec![other_public_key] };
        assert!(!keyring.verify_cleartext(signed.as_bytes()).unwrap());
    }
}
