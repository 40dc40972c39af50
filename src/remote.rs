//! Remote destination parsing and the upload collaborator seam.
//!
//! The write engine never writes over the network itself. Remote
//! destinations are staged to a local temp file, and the finished file is
//! handed to a [`RemoteStore`] implementation supplied by the caller.

use std::path::Path;

/// Remote storage schemes recognized in destination URIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteScheme {
    /// Amazon S3 (`s3://`).
    S3,
    /// Google Cloud Storage (`gs://`).
    Gcs,
    /// Azure Blob Storage (`az://`).
    Azure,
    /// Plain HTTPS endpoint (`https://`).
    Https,
}

impl RemoteScheme {
    /// The URI prefix for this scheme, including the separator.
    pub fn prefix(self) -> &'static str {
        match self {
            RemoteScheme::S3 => "s3://",
            RemoteScheme::Gcs => "gs://",
            RemoteScheme::Azure => "az://",
            RemoteScheme::Https => "https://",
        }
    }
}

/// A parsed remote destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    /// The storage scheme.
    pub scheme: RemoteScheme,
    /// The full original URI.
    pub uri: String,
}

impl RemoteTarget {
    /// Parse a destination string, returning `None` for local paths.
    pub fn parse(destination: &str) -> Option<Self> {
        const SCHEMES: [RemoteScheme; 4] = [
            RemoteScheme::S3,
            RemoteScheme::Gcs,
            RemoteScheme::Azure,
            RemoteScheme::Https,
        ];
        let scheme = SCHEMES
            .into_iter()
            .find(|s| destination.starts_with(s.prefix()))?;
        Some(Self {
            scheme,
            uri: destination.to_string(),
        })
    }

    /// The final path component of the URI, used to name the local staging
    /// file.
    pub fn file_name(&self) -> &str {
        self.uri.rsplit('/').next().unwrap_or(&self.uri)
    }
}

/// Error reported by a [`RemoteStore`] upload.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct RemoteError(pub String);

/// Uploader collaborator consuming a finished local file.
///
/// Implementations are supplied by the caller; the crate ships none. On
/// upload failure the write engine keeps the staged local file and reports
/// its path, so implementations need no retry logic of their own.
pub trait RemoteStore {
    /// Upload `local` to `target`, blocking until durable.
    fn upload(&self, local: &Path, target: &RemoteTarget) -> Result<(), RemoteError>;
}
