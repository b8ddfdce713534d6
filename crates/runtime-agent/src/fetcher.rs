// Package fetching: pulls the action archive out of a blob store into the
// workspace.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use agent_common::AwsSettings;

use crate::error::AgentError;
use crate::workspace::Workspace;

/// Location of one object in a blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobCoordinate {
    pub bucket: String,
    pub key: String,
}

impl BlobCoordinate {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for BlobCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Source of action packages.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Stream the whole object into `destination`.
    ///
    /// Resolves only once the local file is completely written and synced,
    /// returning the number of bytes written.
    async fn fetch(&self, coordinate: &BlobCoordinate, destination: &Path) -> Result<u64>;
}

// ---------------------------------------------------------------------------
// S3
// ---------------------------------------------------------------------------

/// Blob store backed by Amazon S3 (or an S3-compatible endpoint).
#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
}

impl S3BlobStore {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// Build a client from the configured region and credentials, falling
    /// back to the default AWS provider chains for anything left unset.
    pub async fn from_settings(settings: &AwsSettings) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &settings.region {
            loader = loader.region(aws_sdk_s3::config::Region::new(region.clone()));
        }

        if !settings.has_static_credentials() {
            tracing::debug!("No static AWS credentials configured, using the default chain");
        }
        if let (Some(access_key_id), Some(secret_access_key)) =
            (&settings.access_key_id, &settings.secret_access_key)
        {
            loader = loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                access_key_id.clone(),
                secret_access_key.clone(),
                settings.session_token.clone(),
                None,
                "runtime-agent",
            ));
        }

        if let Some(endpoint_url) = &settings.endpoint_url {
            loader = loader.endpoint_url(endpoint_url.clone());
        }

        let shared = loader.load().await;
        let mut config = aws_sdk_s3::config::Builder::from(&shared);
        if settings.endpoint_url.is_some() {
            // S3-compatible stores rarely support virtual-hosted buckets.
            config = config.force_path_style(true);
        }

        Self::new(aws_sdk_s3::Client::from_conf(config.build()))
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn fetch(&self, coordinate: &BlobCoordinate, destination: &Path) -> Result<u64> {
        let output = self
            .client
            .get_object()
            .bucket(&coordinate.bucket)
            .key(&coordinate.key)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("{}", DisplayErrorContext(&e)))
            .context("GetObject request failed")?;

        let mut file = File::create(destination)
            .await
            .with_context(|| format!("Failed to create '{}'", destination.display()))?;

        let mut body = output.body;
        let mut written: u64 = 0;
        while let Some(chunk) = body
            .try_next()
            .await
            .context("Failed to read object body")?
        {
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write '{}'", destination.display()))?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        file.sync_all()
            .await
            .with_context(|| format!("Failed to sync '{}'", destination.display()))?;

        Ok(written)
    }
}

// ---------------------------------------------------------------------------
// Local directory
// ---------------------------------------------------------------------------

/// Blob store backed by a directory: `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// File backing the given coordinate. Keys may contain `/` but must not
    /// climb out of the bucket.
    pub fn object_path(&self, coordinate: &BlobCoordinate) -> Result<PathBuf> {
        let escapes = |p: &str| {
            Path::new(p)
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        };
        if coordinate.bucket.is_empty() || escapes(&coordinate.bucket) || escapes(&coordinate.key) {
            anyhow::bail!("Invalid object coordinate '{coordinate}'");
        }
        Ok(self.root.join(&coordinate.bucket).join(&coordinate.key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn fetch(&self, coordinate: &BlobCoordinate, destination: &Path) -> Result<u64> {
        let source = self.object_path(coordinate)?;
        let mut input = File::open(&source)
            .await
            .with_context(|| format!("Object '{}' not found", source.display()))?;

        let mut file = File::create(destination)
            .await
            .with_context(|| format!("Failed to create '{}'", destination.display()))?;

        let written = tokio::io::copy(&mut input, &mut file)
            .await
            .with_context(|| format!("Failed to copy '{}'", source.display()))?;

        file.flush().await?;
        file.sync_all()
            .await
            .with_context(|| format!("Failed to sync '{}'", destination.display()))?;

        Ok(written)
    }
}

// ---------------------------------------------------------------------------
// Fetch stage
// ---------------------------------------------------------------------------

/// The package as it sits in the workspace after a fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPackage {
    pub path: PathBuf,
    pub size: u64,
    /// Hex SHA-256 of the archive bytes.
    pub sha256: String,
}

/// Fetch the package at `coordinate` into the workspace's archive path.
pub async fn fetch_package(
    store: &dyn BlobStore,
    coordinate: &BlobCoordinate,
    workspace: &Workspace,
) -> Result<FetchedPackage, AgentError> {
    let destination = workspace.archive_path();
    tracing::info!(store = store.name(), "Downloading action package '{coordinate}'");

    let result: Result<FetchedPackage> = async {
        let size = store.fetch(coordinate, destination).await?;
        let sha256 = digest_file(destination).await?;
        Ok(FetchedPackage {
            path: destination.to_path_buf(),
            size,
            sha256,
        })
    }
    .await;

    let package = result.map_err(|e| AgentError::Fetch {
        bucket: coordinate.bucket.clone(),
        key: coordinate.key.clone(),
        source: e.into(),
    })?;

    tracing::info!(
        size = package.size,
        sha256 = %package.sha256,
        "Downloaded action package to '{}'",
        package.path.display()
    );
    Ok(package)
}

const DIGEST_CHUNK: usize = 64 * 1024;

async fn digest_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .await
        .with_context(|| format!("Failed to read '{}'", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DIGEST_CHUNK];
    loop {
        let n = file
            .read(&mut buf)
            .await
            .with_context(|| format!("Failed to read '{}'", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn store_with(bucket: &str, key: &str, data: &[u8]) -> (tempfile::TempDir, LocalBlobStore) {
        let dir = tempfile::tempdir().unwrap();
        let object = dir.path().join(bucket).join(key);
        fs::create_dir_all(object.parent().unwrap()).unwrap();
        fs::write(&object, data).unwrap();
        let store = LocalBlobStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn local_store_copies_object() {
        let (_dir, store) = store_with("actions", "hello/v1.zip", b"package bytes");
        let out = tempfile::tempdir().unwrap();
        let destination = out.path().join("action");

        let written = store
            .fetch(&BlobCoordinate::new("actions", "hello/v1.zip"), &destination)
            .await
            .unwrap();

        assert_eq!(written, 13);
        assert_eq!(fs::read(&destination).unwrap(), b"package bytes");
    }

    #[tokio::test]
    async fn local_store_missing_object() {
        let (_dir, store) = store_with("actions", "present.zip", b"x");
        let out = tempfile::tempdir().unwrap();

        let err = store
            .fetch(&BlobCoordinate::new("actions", "absent.zip"), &out.path().join("action"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn local_store_rejects_escaping_keys() {
        let store = LocalBlobStore::new("/srv/packages");
        assert!(store
            .object_path(&BlobCoordinate::new("actions", "../../etc/passwd"))
            .is_err());
        assert!(store
            .object_path(&BlobCoordinate::new("actions", "/etc/passwd"))
            .is_err());
        assert!(store.object_path(&BlobCoordinate::new("", "a.zip")).is_err());
        assert_eq!(
            store
                .object_path(&BlobCoordinate::new("actions", "team/a.zip"))
                .unwrap(),
            PathBuf::from("/srv/packages/actions/team/a.zip")
        );
    }

    #[tokio::test]
    async fn fetch_package_records_digest() {
        let (_dir, store) = store_with("actions", "hello.zip", b"hello");
        let scratch = tempfile::tempdir().unwrap();
        let workspace = Workspace::prepare(scratch.path().join("temp")).unwrap();

        let package = fetch_package(&store, &BlobCoordinate::new("actions", "hello.zip"), &workspace)
            .await
            .unwrap();

        assert_eq!(package.path, workspace.archive_path());
        assert_eq!(package.size, 5);
        assert_eq!(
            package.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn digest_spans_multiple_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big");
        let data: Vec<u8> = (0..DIGEST_CHUNK * 3 + 17).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &data).unwrap();

        assert_eq!(digest_file(&path).await.unwrap(), hex::encode(Sha256::digest(&data)));
    }

    #[tokio::test]
    async fn fetch_package_maps_errors() {
        let (_dir, store) = store_with("actions", "hello.zip", b"hello");
        let scratch = tempfile::tempdir().unwrap();
        let workspace = Workspace::prepare(scratch.path().join("temp")).unwrap();

        let err = fetch_package(&store, &BlobCoordinate::new("actions", "nope.zip"), &workspace)
            .await
            .unwrap_err();

        match &err {
            AgentError::Fetch { bucket, key, .. } => {
                assert_eq!(bucket, "actions");
                assert_eq!(key, "nope.zip");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(err.report_message().contains("not found"));
    }

    #[test]
    fn coordinate_display() {
        assert_eq!(
            BlobCoordinate::new("actions", "team/a.zip").to_string(),
            "actions/team/a.zip"
        );
    }
}
