//! Mining Rewards - Monthly reconciliation of reviewer rankings
//!
//! Each month, a panel of reviewers scores the applications competing
//! for mining rewards. This crate ingests those per-reviewer ranking
//! submissions, stores them idempotently, folds them into one composite
//! ranking per application, and tracks the payment lifecycle of each
//! reporting period.
//!
//! # How it works
//!
//! 1. A reporting period is created for the calendar month
//! 2. Reviewers submit a summary plus one score per application; each
//!    batch is upserted, so resubmission corrects in place
//! 3. Composite rankings are folded from the raw rows on every read
//!    (mean by default; sum, median, or a caller-supplied formula)
//! 4. The reward purchase is recorded against the period, moving it
//!    `draft -> ranked -> paid`
//! 5. Candidate apps are imported from flat spreadsheet rows; rankings
//!    and candidates export as CSV text
//!
//! HTTP routing, authentication, and outbound mail live outside this
//! crate; callers arrive with validated identities and parsed rows.

pub mod aggregate;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod images;
pub mod lifecycle;
pub mod store;
pub mod tabular;

pub use aggregate::{composite_rankings, CompositePolicy, CompositeRanking};
pub use config::Config;
pub use directory::{AppDirectory, AppProjection, InMemoryDirectory};
pub use engine::{PeriodOverview, RankingRow, ReviewSubmitted, RewardsEngine};
pub use error::{Error, Result, RowFailure};
pub use images::{HttpImageResolver, ImageResolver};
pub use lifecycle::{PaymentDetails, PeriodLifecycle, PeriodStatus};
pub use store::{
    AppRanking, CacheInvalidator, NoopCache, RankingStore, ReportingPeriod, ReviewerSubmission,
};
