use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::plan::{ExecutionPlan, Fallback};
use crate::detection::DetectionRecord;
use crate::error::ItemFailure;

/// Detection records of one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemDetections {
    pub image_name: String,
    pub detections: Vec<DetectionRecord>,
}

/// Outcome of processing one image on a worker
///
/// Item failures travel as data so that a single bad image never fails the
/// whole batch.
#[derive(Debug, Clone)]
pub(crate) struct ItemOutcome {
    pub image_name: String,
    pub result: Result<Vec<DetectionRecord>, String>,
}

/// Result of a folder detection run
#[derive(Debug, Clone, Serialize)]
pub struct FolderReport {
    /// One group per successfully processed image
    pub items: Vec<ItemDetections>,
    pub items_attempted: usize,
    pub failures: Vec<ItemFailure>,
    /// Plan actually used to produce `items`
    pub plan: ExecutionPlan,
    pub fallback: Option<Fallback>,
    /// Where the consolidated JSON was written, if it was
    pub consolidated_path: Option<PathBuf>,
}

impl FolderReport {
    pub(crate) fn aggregate(
        outcomes: Vec<ItemOutcome>,
        items_attempted: usize,
        plan: ExecutionPlan,
        fallback: Option<Fallback>,
    ) -> Self {
        let mut items = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();

        for outcome in outcomes {
            match outcome.result {
                Ok(detections) => items.push(ItemDetections {
                    image_name: outcome.image_name,
                    detections,
                }),
                Err(error) => failures.push(ItemFailure {
                    item: outcome.image_name,
                    error,
                }),
            }
        }

        Self {
            items,
            items_attempted,
            failures,
            plan,
            fallback,
            consolidated_path: None,
        }
    }

    /// All records, flattened across images
    pub fn records(&self) -> Vec<DetectionRecord> {
        self.items
            .iter()
            .flat_map(|item| item.detections.iter().cloned())
            .collect()
    }

    pub fn total_detections(&self) -> usize {
        self.items.iter().map(|item| item.detections.len()).sum()
    }

    /// Names of the images that produced a result group
    pub fn item_tags(&self) -> BTreeSet<String> {
        self.items.iter().map(|item| item.image_name.clone()).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.items.len() == self.items_attempted
    }
}
