//! Backend selection from environment variables.

use std::path::PathBuf;

use object_store::aws::{AmazonS3, AmazonS3Builder};

use submission_core::env::{self, bool_var, string_var};

use crate::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    S3,
    Filesystem,
    Memory,
}

impl StorageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageKind::S3 => "s3",
            StorageKind::Filesystem => "filesystem",
            StorageKind::Memory => "memory",
        }
    }
}

/// Settings for an S3-compatible bucket.
#[derive(Clone)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub allow_http: bool,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub virtual_hosted_style: bool,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("allow_http", &self.allow_http)
            .field("credentials_set", &self.access_key_id.is_some())
            .field("virtual_hosted_style", &self.virtual_hosted_style)
            .finish()
    }
}

impl S3Config {
    pub(crate) fn build_store(self) -> Result<AmazonS3, StorageError> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(self.bucket)
            .with_region(self.region)
            .with_allow_http(self.allow_http)
            .with_virtual_hosted_style_request(self.virtual_hosted_style);

        if let Some(endpoint) = self.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        if let (Some(key_id), Some(secret)) = (self.access_key_id, self.secret_access_key) {
            builder = builder
                .with_access_key_id(key_id)
                .with_secret_access_key(secret);
        }
        if let Some(token) = self.session_token {
            builder = builder.with_token(token);
        }

        Ok(builder.build()?)
    }
}

#[derive(Debug, Clone)]
pub enum StorageBackendConfig {
    S3(S3Config),
    Filesystem { root: PathBuf },
    Memory,
}

impl StorageBackendConfig {
    pub fn kind(&self) -> StorageKind {
        match self {
            StorageBackendConfig::S3(_) => StorageKind::S3,
            StorageBackendConfig::Filesystem { .. } => StorageKind::Filesystem,
            StorageBackendConfig::Memory => StorageKind::Memory,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackendConfig,
    /// Optional key prefix applied to all object keys.
    pub prefix: Option<String>,
}

const DEFAULT_FS_ROOT: &str = "./data/object_store";

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackendConfig::Memory,
            prefix: None,
        }
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackendConfig::Filesystem { root: root.into() },
            prefix: None,
        }
    }

    pub fn s3(cfg: S3Config) -> Self {
        Self {
            backend: StorageBackendConfig::S3(cfg),
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Build a config from environment variables.
    ///
    /// Selection rules:
    /// - If `STORAGE_BACKEND` is set: use it (`s3`, `filesystem`, `memory`)
    /// - Otherwise: default to filesystem (`./data/object_store`)
    ///
    /// S3 env vars (S3-compatible):
    /// - `S3_BUCKET` (required when backend is `s3`)
    /// - `AWS_REGION` (default: `us-east-1`)
    /// - `S3_ENDPOINT` (optional, e.g. `http://localhost:9000`)
    /// - `S3_ALLOW_HTTP` (default: true when the endpoint is http://)
    /// - `S3_VIRTUAL_HOSTED_STYLE` (default: false)
    /// - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`, `AWS_SESSION_TOKEN` (optional)
    ///
    /// Filesystem: `STORAGE_FS_ROOT`. Common: `STORAGE_PREFIX`.
    pub fn from_env() -> Result<Self, StorageError> {
        Self::from_lookup(&env::process_env)
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<L>(lookup: &L) -> Result<Self, StorageError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let prefix = string_var(lookup, "STORAGE_PREFIX");
        let fs_root = || {
            string_var(lookup, "STORAGE_FS_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FS_ROOT))
        };

        let cfg = match string_var(lookup, "STORAGE_BACKEND").as_deref() {
            Some("s3") => Self::s3(read_s3_config(lookup)?),
            Some("filesystem") | Some("fs") | None => Self::filesystem(fs_root()),
            Some("memory") | Some("mem") => Self::memory(),
            Some(other) => {
                return Err(StorageError::InvalidConfig(format!(
                    "unsupported STORAGE_BACKEND={other} (expected s3|filesystem|memory)"
                )));
            }
        };

        Ok(Self { prefix, ..cfg })
    }
}

fn read_s3_config<L>(lookup: &L) -> Result<S3Config, StorageError>
where
    L: Fn(&str) -> Option<String>,
{
    let bucket = string_var(lookup, "S3_BUCKET").ok_or_else(|| {
        StorageError::InvalidConfig("S3_BUCKET is required for s3 backend".into())
    })?;

    let region = string_var(lookup, "AWS_REGION").unwrap_or_else(|| "us-east-1".to_string());

    let endpoint = string_var(lookup, "S3_ENDPOINT");
    let allow_http = match bool_var(lookup, "S3_ALLOW_HTTP")? {
        Some(v) => v,
        None => endpoint
            .as_deref()
            .is_some_and(|e| e.to_ascii_lowercase().starts_with("http://")),
    };

    Ok(S3Config {
        bucket,
        region,
        endpoint,
        allow_http,
        access_key_id: string_var(lookup, "AWS_ACCESS_KEY_ID"),
        secret_access_key: string_var(lookup, "AWS_SECRET_ACCESS_KEY"),
        session_token: string_var(lookup, "AWS_SESSION_TOKEN"),
        virtual_hosted_style: bool_var(lookup, "S3_VIRTUAL_HOSTED_STYLE")?.unwrap_or(false),
    })
}
