//! Shared domain enumerations aligned with persisted database enums.

use serde::{Deserialize, Serialize};

/// Kind of catalog entity tracked for sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Product,
    Tag,
    Category,
    Attribute,
    AttributeTerm,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Product => "product",
            EntityKind::Tag => "tag",
            EntityKind::Category => "category",
            EntityKind::Attribute => "attribute",
            EntityKind::AttributeTerm => "attribute_term",
        }
    }
}

/// Taxonomy term kinds a product can be associated with.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "term_kind", rename_all = "snake_case")]
pub enum TermKind {
    Tag,
    Category,
    AttributeTerm,
}

impl TermKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TermKind::Tag => "tag",
            TermKind::Category => "category",
            TermKind::AttributeTerm => "attribute_term",
        }
    }
}

impl From<TermKind> for EntityKind {
    fn from(kind: TermKind) -> Self {
        match kind {
            TermKind::Tag => EntityKind::Tag,
            TermKind::Category => EntityKind::Category,
            TermKind::AttributeTerm => EntityKind::AttributeTerm,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "product_status", rename_all = "snake_case")]
pub enum ProductStatus {
    Draft,
    Published,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "stock_status", rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    OutOfStock,
    OnBackorder,
}

impl StockStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StockStatus::InStock => "in_stock",
            StockStatus::OutOfStock => "out_of_stock",
            StockStatus::OnBackorder => "on_backorder",
        }
    }
}

/// Freshness ledger dimensions: the granularity at which "last touched"
/// timestamps are tracked.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Tag,
    Category,
    Attribute,
    AttributeTerm,
    /// Reserved dimension keyed by request fingerprint, used to force-expire
    /// an individual computed response.
    Hashes,
}

impl Dimension {
    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Tag => "tag",
            Dimension::Category => "category",
            Dimension::Attribute => "attribute",
            Dimension::AttributeTerm => "attribute_term",
            Dimension::Hashes => "hashes",
        }
    }

    pub const ALL: [Dimension; 5] = [
        Dimension::Tag,
        Dimension::Category,
        Dimension::Attribute,
        Dimension::AttributeTerm,
        Dimension::Hashes,
    ];
}

impl From<TermKind> for Dimension {
    fn from(kind: TermKind) -> Self {
        match kind {
            TermKind::Tag => Dimension::Tag,
            TermKind::Category => Dimension::Category,
            TermKind::AttributeTerm => Dimension::AttributeTerm,
        }
    }
}

impl TryFrom<&str> for Dimension {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "tag" => Ok(Dimension::Tag),
            "category" => Ok(Dimension::Category),
            "attribute" => Ok(Dimension::Attribute),
            "attribute_term" => Ok(Dimension::AttributeTerm),
            "hashes" => Ok(Dimension::Hashes),
            _ => Err(()),
        }
    }
}

/// Batch scheduler progress states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Idle,
    Scheduled,
    Running,
    Complete,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Idle => "idle",
            BatchStatus::Scheduled => "scheduled",
            BatchStatus::Running => "running",
            BatchStatus::Complete => "complete",
        }
    }
}

impl TryFrom<&str> for BatchStatus {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "idle" => Ok(BatchStatus::Idle),
            "scheduled" => Ok(BatchStatus::Scheduled),
            "running" => Ok(BatchStatus::Running),
            "complete" => Ok(BatchStatus::Complete),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    FingerprintBatch,
    TaxonomySweep,
    DeliverFeed,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            JobType::FingerprintBatch => "fingerprint_batch",
            JobType::TaxonomySweep => "taxonomy_sweep",
            JobType::DeliverFeed => "deliver_feed",
        }
    }
}

impl TryFrom<&str> for JobType {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "fingerprint_batch" => Ok(JobType::FingerprintBatch),
            "taxonomy_sweep" => Ok(JobType::TaxonomySweep),
            "deliver_feed" => Ok(JobType::DeliverFeed),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Scheduled,
    Running,
    Done,
    Failed,
    Killed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "Pending",
            JobState::Scheduled => "Scheduled",
            JobState::Running => "Running",
            JobState::Done => "Done",
            JobState::Failed => "Failed",
            JobState::Killed => "Killed",
        }
    }
}

impl TryFrom<&str> for JobState {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "Pending" | "Latest" => Ok(JobState::Pending),
            "Scheduled" => Ok(JobState::Scheduled),
            "Running" => Ok(JobState::Running),
            "Done" => Ok(JobState::Done),
            "Failed" => Ok(JobState::Failed),
            "Killed" => Ok(JobState::Killed),
            _ => Err(()),
        }
    }
}
