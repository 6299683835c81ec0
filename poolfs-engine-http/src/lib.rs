//! S3-compatible [`ObjectStore`] implementation, reached over HTTP with
//! `reqwest` and request signing with `rusty-s3` — the same stack the
//! sibling crate's S3 backend uses, adapted to a blocking facade the
//! engine can call from ordinary threads without requiring its caller to
//! already be inside a tokio runtime.

#![forbid(unsafe_code)]
#![deny(
    arithmetic_overflow,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    trivial_casts,
    unused_crate_dependencies,
    unused_lifetimes,
    unused_qualifications,
    rustdoc::bare_urls,
    rustdoc::broken_intra_doc_links,
    rustdoc::invalid_codeblock_attributes,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::private_intra_doc_links
)]
#![deny(clippy::all)]

use anyhow::Context;
use poolfs_engine::{ObjectKey, ObjectStore, ObjectStoreError, VersionTag};
use rusty_s3::{Bucket, Credentials, S3Action, UrlStyle};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

mod list;
use list::ListBucketResult;

type Result<T> = std::result::Result<T, ObjectStoreError>;

const SIGNED_URL_LIFETIME: Duration = Duration::from_secs(60);

/// A blocking S3 client implementing [`ObjectStore`].
///
/// Owns its own multi-threaded tokio runtime rather than relying on
/// `Handle::current()`, since the File I/O Engine calls into this from
/// plain OS threads with no ambient runtime.
pub struct S3ObjectStore {
    runtime: tokio::runtime::Runtime,
    client: reqwest::Client,
    bucket: Bucket,
    credentials: Credentials,
}

impl S3ObjectStore {
    pub fn new(
        endpoint: impl AsRef<str>,
        region: impl Into<String>,
        bucket_name: impl Into<String>,
        path_style: bool,
        credentials: Credentials,
    ) -> anyhow::Result<Self> {
        let bucket = Bucket::new(
            endpoint.as_ref().parse().context("invalid endpoint URL")?,
            if path_style {
                UrlStyle::Path
            } else {
                UrlStyle::VirtualHost
            },
            bucket_name.into(),
            region.into(),
        )
        .context("failed to construct S3 bucket descriptor")?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start object store runtime")?;

        Ok(Self {
            runtime,
            client: reqwest::Client::new(),
            bucket,
            credentials,
        })
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    fn etag_of(headers: &reqwest::header::HeaderMap) -> VersionTag {
        let raw = headers
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        VersionTag(raw.trim_matches('"').to_string())
    }
}

impl ObjectStore for S3ObjectStore {
    fn list(&self, prefix: &str) -> Result<Vec<ObjectKey>> {
        self.block_on(async {
            let mut action = self.bucket.list_objects_v2(Some(&self.credentials));
            action.with_prefix(prefix);
            let url = action.sign(SIGNED_URL_LIFETIME);

            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| ObjectStoreError::Transient { source: e.into() })?;

            let status = resp.status();
            let body = resp
                .text()
                .await
                .map_err(|e| ObjectStoreError::Other { source: e.into() })?;

            if !status.is_success() {
                return Err(ObjectStoreError::Other {
                    source: anyhow::anyhow!("list failed with status {status}: {body}"),
                });
            }

            let parsed: ListBucketResult =
                quick_xml::de::from_str(&body).context("malformed ListBucketResult body")?;
            Ok(parsed
                .contents
                .into_iter()
                .map(|entry| ObjectKey::new(entry.key))
                .collect())
        })
    }

    fn lookup(&self, key: &ObjectKey) -> Result<VersionTag> {
        self.block_on(async {
            let url = self
                .bucket
                .head_object(Some(&self.credentials), key.as_str())
                .sign(SIGNED_URL_LIFETIME);

            let resp = self
                .client
                .head(url)
                .send()
                .await
                .map_err(|e| ObjectStoreError::Transient { source: e.into() })?;

            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(ObjectStoreError::NotFound { key: key.clone() });
            }
            if !resp.status().is_success() {
                return Err(ObjectStoreError::Other {
                    source: anyhow::anyhow!("HEAD {key} failed with status {}", resp.status()),
                });
            }

            Ok(Self::etag_of(resp.headers()))
        })
    }

    fn fetch_to_file(&self, key: &ObjectKey, path: &Path) -> Result<VersionTag> {
        self.block_on(async {
            let url = self
                .bucket
                .get_object(Some(&self.credentials), key.as_str())
                .sign(SIGNED_URL_LIFETIME);

            let resp = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| ObjectStoreError::Transient { source: e.into() })?;

            if resp.status() == reqwest::StatusCode::NOT_FOUND {
                return Err(ObjectStoreError::NotFound { key: key.clone() });
            }
            if !resp.status().is_success() {
                return Err(ObjectStoreError::Other {
                    source: anyhow::anyhow!("GET {key} failed with status {}", resp.status()),
                });
            }

            let tag = Self::etag_of(resp.headers());
            let body = resp
                .bytes()
                .await
                .map_err(|e| ObjectStoreError::Other { source: e.into() })?;
            tokio::fs::write(path, &body)
                .await
                .map_err(ObjectStoreError::from)?;
            Ok(tag)
        })
    }

    fn store_from_file(&self, key: &ObjectKey, path: &Path) -> Result<VersionTag> {
        self.block_on(async {
            let body = tokio::fs::read(path).await.map_err(ObjectStoreError::from)?;

            let url = self
                .bucket
                .put_object(Some(&self.credentials), key.as_str())
                .sign(SIGNED_URL_LIFETIME);

            let resp = self
                .client
                .put(url)
                .body(body)
                .send()
                .await
                .map_err(|e| ObjectStoreError::Transient { source: e.into() })?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(ObjectStoreError::Other {
                    source: anyhow::anyhow!("PUT {key} failed with status {status}: {body}"),
                });
            }

            Ok(Self::etag_of(resp.headers()))
        })
    }

    fn delete(&self, key: &ObjectKey) -> Result<()> {
        self.block_on(async {
            let url = self
                .bucket
                .delete_object(Some(&self.credentials), key.as_str())
                .sign(SIGNED_URL_LIFETIME);

            let resp = self
                .client
                .delete(url)
                .send()
                .await
                .map_err(|e| ObjectStoreError::Transient { source: e.into() })?;

            if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
                warn!(%key, status = %resp.status(), "delete returned an unexpected status");
            }
            Ok(())
        })
    }
}
