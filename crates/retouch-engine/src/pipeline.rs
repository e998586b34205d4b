use anyhow::{Context, Result};
use retouch_contracts::edits::EditRequest;
use retouch_contracts::envelope::{EditOutput, EditResponse};
use tracing::{info, warn};

use crate::config::Settings;
use crate::derive::{derive_assets, DeriveSettings, DerivedAssets};
use crate::error_chain_text;
use crate::fetch::{FetchedImage, HttpImageFetcher, ImageFetcher};
use crate::normalize::{normalize, EditOutcome};
use crate::provider::{locate_generated_images, DashScopeProvider, EditProvider};
use crate::store::{store_assets, store_from_settings, AssetStore, RunId, StoredAssets};

#[derive(Debug)]
pub enum DeriveOutcome {
    Decoded(DerivedAssets),
    DecodeFailed { reason: String },
}

#[derive(Debug)]
pub enum StoreOutcome {
    Stored(StoredAssets),
    StoreFailed { reason: String },
}

/// One invocation's collaborators. Built fresh per request; holds no state
/// between runs.
pub struct EditEngine {
    provider: Box<dyn EditProvider>,
    fetcher: Box<dyn ImageFetcher>,
    store: Box<dyn AssetStore>,
    derive: DeriveSettings,
    storage_prefix: String,
}

impl EditEngine {
    pub fn new(
        provider: Box<dyn EditProvider>,
        fetcher: Box<dyn ImageFetcher>,
        store: Box<dyn AssetStore>,
        derive: DeriveSettings,
        storage_prefix: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            fetcher,
            store,
            derive,
            storage_prefix: storage_prefix.into(),
        }
    }

    /// Fails when the generation credential or the storage location is not
    /// configured, before anything is sent upstream.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let provider = DashScopeProvider::new(&settings.generation)?;
        let store = store_from_settings(&settings.storage)?;
        Ok(Self::new(
            Box::new(provider),
            Box::new(HttpImageFetcher::new(settings.fetch_timeout)),
            store,
            settings.derive,
            settings.storage_prefix.clone(),
        ))
    }

    pub fn run(&self, request: &EditRequest) -> Result<EditResponse> {
        let response = self
            .provider
            .edit(request)
            .with_context(|| format!("{} edit call failed", self.provider.name()))?;

        let images = locate_generated_images(&response.payload);
        let outcome = match images.split_first() {
            None => {
                info!(
                    provider = self.provider.name(),
                    edit_type = request.edit_type.as_str(),
                    "generation response carried no image"
                );
                EditOutcome::NoImageFound
            }
            Some((first, rest)) => {
                if !rest.is_empty() {
                    warn!(
                        ignored = rest.len(),
                        "generation response carried several images; keeping the first"
                    );
                }
                let fetched = self
                    .fetcher
                    .fetch(&first.locator)
                    .context("failed to fetch generated image")?;
                self.ingest(fetched)
            }
        };

        info!(outcome = outcome.label(), "image edit finished");
        Ok(EditResponse {
            output: EditOutput {
                results: normalize(outcome),
            },
            usage: response.usage(),
            request_id: response.request_id(),
        })
    }

    /// Everything after a successful fetch degrades instead of failing.
    fn ingest(&self, fetched: FetchedImage) -> EditOutcome {
        let assets = match self.derive(&fetched.bytes) {
            DeriveOutcome::Decoded(assets) => assets,
            DeriveOutcome::DecodeFailed { reason } => {
                warn!(%reason, "returning the generated image unprocessed");
                return EditOutcome::InlineOriginal(fetched);
            }
        };

        let run_id = RunId::generate();
        match self.persist(&run_id, &assets) {
            StoreOutcome::Stored(stored) => {
                info!(
                    run_id = run_id.as_str(),
                    store = self.store.name(),
                    path = %stored.storage_path,
                    "stored edited image"
                );
                EditOutcome::Stored(stored)
            }
            StoreOutcome::StoreFailed { reason } => {
                warn!(
                    run_id = run_id.as_str(),
                    store = self.store.name(),
                    %reason,
                    "returning the processed image inline"
                );
                EditOutcome::InlineProcessed(assets.full)
            }
        }
    }

    pub fn derive(&self, bytes: &[u8]) -> DeriveOutcome {
        match derive_assets(bytes, &self.derive) {
            Ok(assets) => DeriveOutcome::Decoded(assets),
            Err(err) => DeriveOutcome::DecodeFailed {
                reason: error_chain_text(&err, 240),
            },
        }
    }

    pub fn persist(&self, run_id: &RunId, assets: &DerivedAssets) -> StoreOutcome {
        let base_path = run_id.base_path(&self.storage_prefix);
        match store_assets(self.store.as_ref(), &base_path, assets) {
            Ok(stored) => StoreOutcome::Stored(stored),
            Err(err) => StoreOutcome::StoreFailed {
                reason: error_chain_text(&err, 240),
            },
        }
    }
}
