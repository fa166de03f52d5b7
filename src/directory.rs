//! Application directory collaborator
//!
//! Applications are owned elsewhere; the core only resolves ids into a
//! read-only projection and pushes imported candidate rows back through
//! the same collaborator. The in-memory implementation backs tests and
//! embedders that keep their directory in process.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tabular::CandidateRow;

/// Read-only projection of an externally-owned application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppProjection {
    pub id: i64,
    pub name: String,
    pub website: String,
    pub description: String,
    pub image_url: String,
    pub category: String,
    pub blockchain: String,
    pub storage_network: String,
    pub authentication: String,
    pub open_source_url: String,
    pub registration_is_open: bool,
    pub funding_address: Option<String>,
    pub identity_verified: bool,
}

#[async_trait]
pub trait AppDirectory: Send + Sync {
    /// Resolve an application id. `NotFound` if the directory has no such
    /// app; the engine surfaces that as `UnknownApplication` on ranking
    /// rows.
    async fn resolve(&self, app_id: i64) -> Result<AppProjection>;

    /// Find-or-create an application keyed by website and apply the
    /// fields the candidate row carries.
    async fn upsert_by_website(&self, row: CandidateRow) -> Result<AppProjection>;

    /// Every application in the directory, id order.
    async fn all(&self) -> Result<Vec<AppProjection>>;
}

#[derive(Default)]
pub struct InMemoryDirectory {
    apps: Mutex<BTreeMap<i64, AppProjection>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_apps(apps: impl IntoIterator<Item = AppProjection>) -> Self {
        let directory = Self::new();
        {
            let mut map = directory.apps.lock();
            for app in apps {
                map.insert(app.id, app);
            }
        }
        directory
    }

    pub fn insert(&self, app: AppProjection) {
        self.apps.lock().insert(app.id, app);
    }
}

fn apply_row(app: &mut AppProjection, row: CandidateRow) {
    if let Some(name) = row.name {
        app.name = name;
    }
    if let Some(category) = row.category {
        app.category = category;
    }
    if let Some(blockchain) = row.blockchain {
        app.blockchain = blockchain;
    }
    if let Some(website) = row.website {
        app.website = website;
    }
    if let Some(storage_network) = row.storage_network {
        app.storage_network = storage_network;
    }
    if let Some(authentication) = row.authentication {
        app.authentication = authentication;
    }
    if let Some(open_source_url) = row.open_source_url {
        app.open_source_url = open_source_url;
    }
    if let Some(description) = row.description {
        app.description = description;
    }
    if let Some(image_url) = row.image_url {
        app.image_url = image_url;
    }
    app.registration_is_open = row.registration_is_open;
}

#[async_trait]
impl AppDirectory for InMemoryDirectory {
    async fn resolve(&self, app_id: i64) -> Result<AppProjection> {
        self.apps
            .lock()
            .get(&app_id)
            .cloned()
            .ok_or_else(|| Error::not_found("application", app_id))
    }

    async fn upsert_by_website(&self, row: CandidateRow) -> Result<AppProjection> {
        let mut apps = self.apps.lock();
        let website = row.website.clone().unwrap_or_default();
        let existing_id = apps
            .values()
            .find(|app| !website.is_empty() && app.website == website)
            .map(|app| app.id);

        let id = existing_id
            .unwrap_or_else(|| apps.keys().next_back().copied().unwrap_or(0) + 1);
        let app = apps.entry(id).or_insert_with(|| AppProjection {
            id,
            ..AppProjection::default()
        });
        apply_row(app, row);
        Ok(app.clone())
    }

    async fn all(&self) -> Result<Vec<AppProjection>> {
        Ok(self.apps.lock().values().cloned().collect())
    }
}
