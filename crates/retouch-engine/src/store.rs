use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use uuid::Uuid;

use crate::codec::WEB_EXTENSION;
use crate::config::StorageSettings;
use crate::derive::DerivedAssets;
use crate::{response_json_or_error, truncate_text};

/// Object storage keyed by path. Uploads must refuse to replace an object
/// that already exists.
pub trait AssetStore: Send + Sync {
    fn name(&self) -> &str;
    fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()>;
    fn public_url(&self, path: &str) -> Result<String>;
}

pub fn store_from_settings(settings: &StorageSettings) -> Result<Box<dyn AssetStore>> {
    match settings {
        StorageSettings::Supabase {
            url,
            service_key,
            bucket,
        } => {
            let Some(bucket) = bucket.clone() else {
                bail!("RETOUCH_STORAGE_BUCKET not set");
            };
            let Some(url) = url.clone() else {
                bail!("SUPABASE_URL not set");
            };
            let Some(service_key) = service_key.clone() else {
                bail!("SUPABASE_SERVICE_ROLE_KEY not set");
            };
            Ok(Box::new(SupabaseStore::new(&url, service_key, bucket)))
        }
        StorageSettings::Local {
            root,
            public_base_url,
        } => {
            let Some(root) = root.clone() else {
                bail!("RETOUCH_LOCAL_STORAGE_DIR not set");
            };
            let Some(public_base_url) = public_base_url.clone() else {
                bail!("RETOUCH_PUBLIC_BASE_URL not set");
            };
            Ok(Box::new(LocalDirStore::new(root, public_base_url)))
        }
        StorageSettings::Unsupported(backend) => {
            bail!("unsupported RETOUCH_STORAGE_BACKEND '{backend}' (expected supabase or local)")
        }
    }
}

/// Unique token scoping one invocation's objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunId(String);

impl RunId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn base_path(&self, prefix: &str) -> String {
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            return self.0.clone();
        }
        format!("{prefix}/{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredAssets {
    pub storage_path: String,
    pub thumbnail_path: String,
    pub public_url: String,
    pub thumbnail_url: String,
    pub mime_type: String,
}

/// Uploads both variants concurrently under `base_path`, then resolves their
/// public URLs. Any failure fails the whole store; an object uploaded before
/// its sibling failed is left in place.
pub fn store_assets(
    store: &dyn AssetStore,
    base_path: &str,
    assets: &DerivedAssets,
) -> Result<StoredAssets> {
    let storage_path = format!("{base_path}/full.{WEB_EXTENSION}");
    let thumbnail_path = format!("{base_path}/thumb.{WEB_EXTENSION}");

    let (full_upload, thumbnail_upload) = thread::scope(|scope| {
        let thumbnail = scope.spawn(|| {
            store.upload(
                &thumbnail_path,
                &assets.thumbnail.bytes,
                assets.thumbnail.mime_type,
            )
        });
        let full = store.upload(&storage_path, &assets.full.bytes, assets.full.mime_type);
        let thumbnail = thumbnail
            .join()
            .unwrap_or_else(|_| Err(anyhow!("thumbnail upload thread panicked")));
        (full, thumbnail)
    });
    full_upload.with_context(|| format!("upload of {storage_path} failed"))?;
    thumbnail_upload.with_context(|| format!("upload of {thumbnail_path} failed"))?;

    Ok(StoredAssets {
        public_url: store.public_url(&storage_path)?,
        thumbnail_url: store.public_url(&thumbnail_path)?,
        storage_path,
        thumbnail_path,
        mime_type: assets.full.mime_type.to_string(),
    })
}

/// Supabase storage REST API.
pub struct SupabaseStore {
    storage_base: String,
    service_key: String,
    bucket: String,
    http: HttpClient,
}

impl SupabaseStore {
    /// `project_url` may be the project root or its `/storage/v1` endpoint.
    pub fn new(project_url: &str, service_key: String, bucket: String) -> Self {
        let trimmed = project_url.trim().trim_end_matches('/');
        let storage_base = if trimmed.ends_with("/storage/v1") {
            trimmed.to_string()
        } else {
            format!("{trimmed}/storage/v1")
        };
        Self {
            storage_base,
            service_key,
            bucket,
            http: HttpClient::new(),
        }
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{}/object/{}/{}",
            self.storage_base,
            self.bucket,
            path.trim_start_matches('/')
        )
    }
}

impl AssetStore for SupabaseStore {
    fn name(&self) -> &str {
        "supabase"
    }

    fn upload(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let endpoint = self.object_url(path);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.service_key)
            .header("apikey", &self.service_key)
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(bytes.to_vec())
            .send()
            .with_context(|| format!("storage upload request failed ({endpoint})"))?;
        response_json_or_error("Supabase storage", response)?;
        Ok(())
    }

    fn public_url(&self, path: &str) -> Result<String> {
        Ok(format!(
            "{}/object/public/{}/{}",
            self.storage_base,
            self.bucket,
            path.trim_start_matches('/')
        ))
    }
}

/// Objects written below a local directory and served from
/// `public_base_url` by whatever fronts that directory.
pub struct LocalDirStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalDirStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn object_path(&self, path: &str) -> Result<PathBuf> {
        let relative = path.trim_start_matches('/');
        if relative.is_empty()
            || relative
                .split('/')
                .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            bail!("invalid object path '{}'", truncate_text(path, 120));
        }
        Ok(self.root.join(relative))
    }
}

impl AssetStore for LocalDirStore {
    fn name(&self) -> &str {
        "local"
    }

    fn upload(&self, path: &str, bytes: &[u8], _content_type: &str) -> Result<()> {
        let target = self.object_path(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        file.write_all(bytes)
            .with_context(|| format!("failed to write {}", target.display()))?;
        Ok(())
    }

    fn public_url(&self, path: &str) -> Result<String> {
        self.object_path(path)?;
        Ok(format!(
            "{}/{}",
            self.public_base_url,
            path.trim_start_matches('/')
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{
        store_assets, store_from_settings, AssetStore, LocalDirStore, RunId, StoredAssets,
        SupabaseStore,
    };
    use crate::config::StorageSettings;
    use crate::derive::{DerivedAsset, DerivedAssets};

    const BUCKET_PATH: &str = "/storage/v1/object/product-images/edits/run-9";

    async fn store_in_supabase(server: &MockServer) -> anyhow::Result<StoredAssets> {
        let project_url = server.uri();
        tokio::task::spawn_blocking(move || {
            let store = SupabaseStore::new(
                &project_url,
                "service-key".to_string(),
                "product-images".to_string(),
            );
            store_assets(&store, "edits/run-9", &assets())
        })
        .await?
    }

    fn upload_mock(object: &str, status: u16) -> Mock {
        Mock::given(method("POST"))
            .and(path(format!("{BUCKET_PATH}/{object}")))
            .and(header("authorization", "Bearer service-key"))
            .and(header("apikey", "service-key"))
            .and(header("x-upsert", "false"))
            .and(header("content-type", "image/jpeg"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "Key": format!("product-images/edits/run-9/{object}"),
            })))
    }

    fn assets() -> DerivedAssets {
        DerivedAssets {
            full: DerivedAsset {
                bytes: b"full-bytes".to_vec(),
                mime_type: "image/jpeg",
                width: 800,
                height: 600,
            },
            thumbnail: DerivedAsset {
                bytes: b"thumb-bytes".to_vec(),
                mime_type: "image/jpeg",
                width: 512,
                height: 384,
            },
        }
    }

    #[test]
    fn run_ids_are_unique_and_scope_paths() {
        let first = RunId::generate();
        let second = RunId::generate();
        assert_ne!(first, second);
        assert_eq!(
            first.base_path("/edits/"),
            format!("edits/{}", first.as_str())
        );
        assert_eq!(first.base_path(""), first.as_str());
    }

    #[test]
    fn local_store_writes_both_variants_and_resolves_urls() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalDirStore::new(temp.path(), "https://media.test/");
        let stored = store_assets(&store, "edits/run-1", &assets())?;

        assert_eq!(stored.storage_path, "edits/run-1/full.jpg");
        assert_eq!(stored.thumbnail_path, "edits/run-1/thumb.jpg");
        assert_eq!(stored.public_url, "https://media.test/edits/run-1/full.jpg");
        assert_eq!(stored.thumbnail_url, "https://media.test/edits/run-1/thumb.jpg");
        assert_eq!(stored.mime_type, "image/jpeg");
        assert_eq!(fs::read(temp.path().join("edits/run-1/full.jpg"))?, b"full-bytes");
        assert_eq!(fs::read(temp.path().join("edits/run-1/thumb.jpg"))?, b"thumb-bytes");
        Ok(())
    }

    #[test]
    fn local_store_refuses_to_overwrite() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalDirStore::new(temp.path(), "https://media.test");
        store.upload("edits/run-2/full.jpg", b"first", "image/jpeg")?;
        assert!(store
            .upload("edits/run-2/full.jpg", b"second", "image/jpeg")
            .is_err());
        assert_eq!(fs::read(temp.path().join("edits/run-2/full.jpg"))?, b"first");

        assert!(store_assets(&store, "edits/run-2", &assets()).is_err());
        // the sibling upload is not rolled back
        assert!(temp.path().join("edits/run-2/thumb.jpg").exists());
        Ok(())
    }

    #[test]
    fn local_store_rejects_escaping_paths() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = LocalDirStore::new(temp.path(), "https://media.test");
        assert!(store.upload("../outside.jpg", b"x", "image/jpeg").is_err());
        assert!(store.upload("edits//full.jpg", b"x", "image/jpeg").is_err());
        assert!(store.public_url("").is_err());
        Ok(())
    }

    #[test]
    fn supabase_urls_target_bucket_objects() -> anyhow::Result<()> {
        let store = SupabaseStore::new(
            "https://project.supabase.co/",
            "service-key".to_string(),
            "product-images".to_string(),
        );
        assert_eq!(
            store.object_url("edits/run/full.jpg"),
            "https://project.supabase.co/storage/v1/object/product-images/edits/run/full.jpg"
        );
        assert_eq!(
            store.public_url("/edits/run/thumb.jpg")?,
            "https://project.supabase.co/storage/v1/object/public/product-images/edits/run/thumb.jpg"
        );

        let explicit = SupabaseStore::new(
            "https://project.supabase.co/storage/v1",
            "service-key".to_string(),
            "b".to_string(),
        );
        assert_eq!(
            explicit.public_url("x.jpg")?,
            "https://project.supabase.co/storage/v1/object/public/b/x.jpg"
        );
        Ok(())
    }

    #[tokio::test]
    async fn supabase_uploads_refuse_upsert_and_resolve_public_urls() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        upload_mock("full.jpg", 200).expect(1).mount(&server).await;
        upload_mock("thumb.jpg", 200).expect(1).mount(&server).await;

        let stored = store_in_supabase(&server).await?;
        assert_eq!(stored.storage_path, "edits/run-9/full.jpg");
        assert_eq!(
            stored.public_url,
            format!(
                "{}/storage/v1/object/public/product-images/edits/run-9/full.jpg",
                server.uri()
            )
        );
        assert!(stored.thumbnail_url.ends_with("/product-images/edits/run-9/thumb.jpg"));
        Ok(())
    }

    #[tokio::test]
    async fn supabase_conflict_fails_the_whole_store() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        upload_mock("full.jpg", 200).expect(1).mount(&server).await;
        Mock::given(method("POST"))
            .and(path(format!("{BUCKET_PATH}/thumb.jpg")))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "statusCode": "409",
                "error": "Duplicate",
                "message": "The resource already exists",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = store_in_supabase(&server)
            .await
            .err()
            .map(|err| format!("{err:#}"))
            .unwrap_or_default();
        assert!(err.contains("upload of edits/run-9/thumb.jpg failed"), "{err}");
        assert!(err.contains("(409)"), "{err}");
        Ok(())
    }

    #[test]
    fn missing_storage_configuration_fails_construction() {
        let err = store_from_settings(&StorageSettings::Supabase {
            url: Some("https://project.supabase.co".to_string()),
            service_key: Some("key".to_string()),
            bucket: None,
        })
        .err()
        .map(|err| err.to_string())
        .unwrap_or_default();
        assert_eq!(err, "RETOUCH_STORAGE_BUCKET not set");

        assert!(store_from_settings(&StorageSettings::Local {
            root: Some(PathBuf::from("/tmp/retouch")),
            public_base_url: None,
        })
        .is_err());

        let store = store_from_settings(&StorageSettings::Local {
            root: Some(PathBuf::from("/tmp/retouch")),
            public_base_url: Some("https://media.test".to_string()),
        });
        assert_eq!(store.map(|store| store.name().to_string()).ok().as_deref(), Some("local"));
    }

    #[test]
    fn unknown_backend_fails_construction() {
        let err = store_from_settings(&StorageSettings::Unsupported("s3".to_string()))
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains("unsupported RETOUCH_STORAGE_BACKEND 's3'"), "{err}");
    }
}
