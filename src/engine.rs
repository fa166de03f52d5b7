//! Rewards engine - the operation surface exposed to collaborators
//!
//! Transport, authentication, and mail live outside this crate; callers
//! arrive here with already-validated identities and already-parsed
//! rows. The engine wires the store, the aggregator, the period
//! lifecycle, and the tabular codec together.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::{self, CompositePolicy, CompositeRanking};
use crate::config::Config;
use crate::directory::{AppDirectory, AppProjection};
use crate::error::{Error, Result, RowFailure};
use crate::images::ImageResolver;
use crate::lifecycle::{PaymentDetails, PeriodLifecycle};
use crate::store::{AppRanking, RankingStore, ReportingPeriod, ReviewerSubmission};
use crate::tabular;

/// One application's score within a reviewer's batch.
#[derive(Debug, Clone, Deserialize)]
pub struct RankingRow {
    pub app_id: i64,
    pub standard_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewSubmitted {
    pub submission: ReviewerSubmission,
    pub rankings: Vec<AppRanking>,
}

/// A period together with the reviewers who have submitted for it.
#[derive(Debug, Clone, Serialize)]
pub struct PeriodOverview {
    pub period: ReportingPeriod,
    pub reviewers: Vec<ReviewerSubmission>,
}

pub struct RewardsEngine {
    store: Arc<RankingStore>,
    lifecycle: PeriodLifecycle,
    directory: Arc<dyn AppDirectory>,
    images: Arc<dyn ImageResolver>,
    policy: CompositePolicy,
    redirector_hosts: Vec<String>,
}

impl RewardsEngine {
    pub fn new(
        store: Arc<RankingStore>,
        directory: Arc<dyn AppDirectory>,
        images: Arc<dyn ImageResolver>,
    ) -> Self {
        Self {
            lifecycle: PeriodLifecycle::new(store.clone()),
            store,
            directory,
            images,
            policy: CompositePolicy::default(),
            redirector_hosts: vec!["photos.app.goo".to_string()],
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<RankingStore>,
        directory: Arc<dyn AppDirectory>,
        images: Arc<dyn ImageResolver>,
    ) -> Self {
        Self::new(store, directory, images)
            .with_policy(config.composite_policy())
            .with_redirector_hosts(config.import.redirector_hosts.clone())
    }

    pub fn with_policy(mut self, policy: CompositePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_redirector_hosts(mut self, hosts: Vec<String>) -> Self {
        self.redirector_hosts = hosts;
        self
    }

    /// Ingest one reviewer's ranking batch for a period.
    ///
    /// The reviewer submission is upserted first, then every row is
    /// saved independently: each row's application id is resolved before
    /// its write, and a row that fails never drops its siblings. If any
    /// row fails the call returns [`Error::PartialFailure`] naming the
    /// failed application ids; rows that succeeded stay committed.
    pub async fn submit_period_review(
        &self,
        period_id: i64,
        reviewer_name: &str,
        summary: &str,
        rows: &[RankingRow],
    ) -> Result<ReviewSubmitted> {
        let submission = self.store.upsert_submission(period_id, reviewer_name, summary)?;

        let outcomes = join_all(
            rows.iter()
                .map(|row| self.save_ranking(submission.id, period_id, row)),
        )
        .await;

        let mut rankings = Vec::new();
        let mut failures = Vec::new();
        for (row, outcome) in rows.iter().zip(outcomes) {
            match outcome {
                Ok(ranking) => rankings.push(ranking),
                Err(e) => {
                    warn!("Rejected ranking row for app {}: {}", row.app_id, e);
                    failures.push(RowFailure {
                        app_id: row.app_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if !rankings.is_empty() {
            self.lifecycle.mark_ranked(period_id)?;
        }

        info!(
            "Period {} review by {}: {} rows saved, {} rejected",
            period_id,
            reviewer_name,
            rankings.len(),
            failures.len()
        );

        if failures.is_empty() {
            Ok(ReviewSubmitted {
                submission,
                rankings,
            })
        } else {
            Err(Error::PartialFailure {
                succeeded: rankings.len(),
                failures,
            })
        }
    }

    async fn save_ranking(
        &self,
        reviewer_id: i64,
        period_id: i64,
        row: &RankingRow,
    ) -> Result<AppRanking> {
        // Resolve before any write so an unknown app id never half-commits.
        self.directory.resolve(row.app_id).await.map_err(|e| match e {
            Error::NotFound { .. } => Error::UnknownApplication { app_id: row.app_id },
            other => other,
        })?;

        match self
            .store
            .upsert_ranking(row.app_id, reviewer_id, period_id, row.standard_score)
        {
            // A raced uniqueness violation gets one retry with re-fetch.
            Err(e) if e.is_conflict() => {
                self.store
                    .upsert_ranking(row.app_id, reviewer_id, period_id, row.standard_score)
            }
            other => other,
        }
    }

    /// Composite rankings for a period, freshly folded from the raw rows.
    pub fn get_composite_rankings(&self, period_id: i64) -> Result<Vec<CompositeRanking>> {
        self.store.get_period(period_id)?;
        let rankings = self.store.list_rankings(period_id)?;
        Ok(aggregate::composite_rankings(period_id, &rankings, self.policy))
    }

    pub fn record_payment(
        &self,
        period_id: i64,
        details: &PaymentDetails,
    ) -> Result<ReportingPeriod> {
        self.lifecycle.record_payment(period_id, details)
    }

    pub fn place_on_hold(&self, period_id: i64, reason: &str) -> Result<ReportingPeriod> {
        self.lifecycle.place_on_hold(period_id, reason)
    }

    pub fn release_hold(&self, period_id: i64) -> Result<ReportingPeriod> {
        self.lifecycle.release_hold(period_id)
    }

    /// Idempotent: retrying after a lost acknowledgment succeeds.
    pub fn delete_reviewer_submission(&self, id: i64) -> Result<()> {
        self.store.delete_submission(id)
    }

    pub fn period_overview(&self) -> Result<Vec<PeriodOverview>> {
        self.store
            .list_periods()?
            .into_iter()
            .map(|period| {
                let reviewers = self.store.list_submissions(period.id)?;
                Ok(PeriodOverview { period, reviewers })
            })
            .collect()
    }

    // ========================================================================
    // TABULAR IMPORT / EXPORT
    // ========================================================================

    pub async fn export_candidates(&self) -> Result<String> {
        let apps = self.directory.all().await?;
        Ok(tabular::render_candidates(&apps))
    }

    pub async fn export_rankings(&self, period_id: i64) -> Result<String> {
        let composites = self.get_composite_rankings(period_id)?;
        let mut entries = Vec::with_capacity(composites.len());
        for composite in composites {
            let name = match self.directory.resolve(composite.app_id).await {
                Ok(app) => app.name,
                // The app may have left the directory since it was ranked.
                Err(_) => String::new(),
            };
            entries.push((composite, name));
        }
        Ok(tabular::render_rankings(&entries))
    }

    /// Map raw candidate rows into the directory. Rows without a website
    /// have no upsert key and are skipped.
    pub async fn import_candidate_rows(
        &self,
        rows: &[HashMap<String, String>],
    ) -> Result<Vec<AppProjection>> {
        let mut apps = Vec::with_capacity(rows.len());
        for cells in rows {
            let mut row = tabular::parse_candidate_row(cells);
            if row.website.as_deref().map_or(true, str::is_empty) {
                warn!("Skipping candidate row without a website");
                continue;
            }
            tabular::resolve_row_image(&mut row, self.images.as_ref(), &self.redirector_hosts)
                .await;
            apps.push(self.directory.upsert_by_website(row).await?);
        }
        info!("Imported {} candidate rows", apps.len());
        Ok(apps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::lifecycle::PeriodStatus;
    use chrono::Utc;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    }

    struct FixedResolver(&'static str);

    #[async_trait::async_trait]
    impl ImageResolver for FixedResolver {
        async fn canonical_image(&self, _url: &str) -> anyhow::Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn app(id: i64, name: &str) -> AppProjection {
        AppProjection {
            id,
            name: name.to_string(),
            website: format!("https://{}.example.com", name.to_lowercase()),
            ..AppProjection::default()
        }
    }

    fn engine_with_apps(apps: Vec<AppProjection>) -> (Arc<RankingStore>, RewardsEngine) {
        let store = Arc::new(RankingStore::in_memory().unwrap());
        let directory = Arc::new(InMemoryDirectory::with_apps(apps));
        let engine = RewardsEngine::new(
            store.clone(),
            directory,
            Arc::new(FixedResolver("https://cdn.example.com/canonical.png")),
        );
        (store, engine)
    }

    fn rows(pairs: &[(i64, f64)]) -> Vec<RankingRow> {
        pairs
            .iter()
            .map(|(app_id, standard_score)| RankingRow {
                app_id: *app_id,
                standard_score: *standard_score,
            })
            .collect()
    }

    #[tokio::test]
    async fn two_reviewers_mean_scenario() {
        init_tracing();
        let (store, engine) = engine_with_apps(vec![app(1, "One"), app(2, "Two")]);
        let period = store.create_period("2026-07").unwrap();

        engine
            .submit_period_review(period.id, "Alice", "solid month", &rows(&[(1, 8.0), (2, 6.0)]))
            .await
            .unwrap();
        engine
            .submit_period_review(period.id, "Bob", "", &rows(&[(1, 4.0), (2, 9.0)]))
            .await
            .unwrap();

        let composites = engine.get_composite_rankings(period.id).unwrap();
        assert_eq!(composites[0].app_id, 2);
        assert_eq!(composites[0].composite_score, 7.5);
        assert_eq!(composites[1].app_id, 1);
        assert_eq!(composites[1].composite_score, 6.0);

        // First saved batch advanced the period.
        let period = store.get_period(period.id).unwrap();
        assert_eq!(period.status, PeriodStatus::Ranked);
    }

    #[tokio::test]
    async fn unknown_app_rows_fail_without_dropping_siblings() {
        let (store, engine) = engine_with_apps(vec![app(1, "One")]);
        let period = store.create_period("2026-07").unwrap();

        let err = engine
            .submit_period_review(
                period.id,
                "Alice",
                "one bad id",
                &rows(&[(1, 8.0), (99, 5.0)]),
            )
            .await
            .unwrap_err();

        match err {
            Error::PartialFailure { succeeded, failures } => {
                assert_eq!(succeeded, 1);
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].app_id, 99);
                assert!(failures[0].reason.contains("unknown application"));
            }
            other => panic!("expected PartialFailure, got {other:?}"),
        }

        // The valid sibling stayed committed, and no row exists for app 99.
        let saved = store.list_rankings(period.id).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].app_id, 1);
    }

    #[tokio::test]
    async fn resubmission_updates_in_place() {
        let (store, engine) = engine_with_apps(vec![app(1, "One")]);
        let period = store.create_period("2026-07").unwrap();

        engine
            .submit_period_review(period.id, "Alice", "draft", &rows(&[(1, 8.0)]))
            .await
            .unwrap();
        let second = engine
            .submit_period_review(period.id, "Alice", "final", &rows(&[(1, 9.5)]))
            .await
            .unwrap();

        assert_eq!(second.submission.summary, "final");
        assert_eq!(store.list_submissions(period.id).unwrap().len(), 1);

        let rankings = store.list_rankings(period.id).unwrap();
        assert_eq!(rankings.len(), 1);
        assert_eq!(rankings[0].standard_score, 9.5);
    }

    #[tokio::test]
    async fn submission_to_unknown_period_is_not_found() {
        let (_store, engine) = engine_with_apps(vec![app(1, "One")]);
        let err = engine
            .submit_period_review(404, "Alice", "", &rows(&[(1, 8.0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_is_idempotent_through_the_engine() {
        let (store, engine) = engine_with_apps(vec![app(1, "One")]);
        let period = store.create_period("2026-07").unwrap();
        let submitted = engine
            .submit_period_review(period.id, "Alice", "", &rows(&[(1, 8.0)]))
            .await
            .unwrap();

        engine.delete_reviewer_submission(submitted.submission.id).unwrap();
        engine.delete_reviewer_submission(submitted.submission.id).unwrap();
        assert!(store.list_rankings(period.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn exported_rankings_round_trip_the_score_cell() {
        let (store, engine) = engine_with_apps(vec![app(1, "One"), app(2, "Two")]);
        let period = store.create_period("2026-07").unwrap();
        engine
            .submit_period_review(period.id, "Alice", "", &rows(&[(1, 8.0), (2, 6.0)]))
            .await
            .unwrap();
        engine
            .submit_period_review(period.id, "Bob", "", &rows(&[(1, 4.0), (2, 9.0)]))
            .await
            .unwrap();

        let rendered = engine.export_rankings(period.id).await.unwrap();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 3);

        // Winner first: app 2 with scores [6, 9].
        let winner = tabular::parse_line(lines[1]);
        assert_eq!(winner[0], "2");
        assert_eq!(winner[1], "Two");
        assert_eq!(tabular::parse_scores(&winner[3]), vec![6.0, 9.0]);
        assert_eq!(winner[4], "1");
    }

    #[tokio::test]
    async fn import_maps_rows_and_follows_redirectors() {
        let (_store, engine) = engine_with_apps(vec![]);

        let mut sheet_row = HashMap::new();
        sheet_row.insert("Name".to_string(), "Graphite".to_string());
        sheet_row.insert("Website".to_string(), "https://graphite.app".to_string());
        sheet_row.insert("Registration Open?".to_string(), "YES".to_string());
        sheet_row.insert(
            "Image".to_string(),
            "https://photos.app.goo.gl/abc".to_string(),
        );
        sheet_row.insert("Launch Year".to_string(), "2018".to_string());

        let mut keyless_row = HashMap::new();
        keyless_row.insert("Name".to_string(), "No Website".to_string());

        let apps = engine
            .import_candidate_rows(&[sheet_row, keyless_row])
            .await
            .unwrap();

        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name, "Graphite");
        assert!(apps[0].registration_is_open);
        assert_eq!(apps[0].image_url, "https://cdn.example.com/canonical.png");
    }

    #[tokio::test]
    async fn invalid_payment_leaves_the_period_alone() {
        let (store, engine) = engine_with_apps(vec![app(1, "One")]);
        let period = store.create_period("2026-07").unwrap();

        let err = engine
            .record_payment(
                period.id,
                &PaymentDetails {
                    exchange_name: "Binance".to_string(),
                    conversion_rate: 0.0001,
                    transaction_id: "  ".to_string(),
                    purchased_at: Utc::now(),
                },
            )
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPayment(_)));
        assert_eq!(store.get_period(period.id).unwrap().status, PeriodStatus::Draft);
    }

    #[tokio::test]
    async fn overview_pairs_periods_with_their_reviewers() {
        let (store, engine) = engine_with_apps(vec![app(1, "One")]);
        let july = store.create_period("2026-07").unwrap();
        store.create_period("2026-08").unwrap();
        engine
            .submit_period_review(july.id, "Alice", "", &rows(&[(1, 8.0)]))
            .await
            .unwrap();

        let overview = engine.period_overview().unwrap();
        assert_eq!(overview.len(), 2);
        assert_eq!(overview[0].reviewers.len(), 1);
        assert_eq!(overview[0].reviewers[0].reviewer_name, "Alice");
        assert!(overview[1].reviewers.is_empty());
    }
}
