use serde::Serialize;
use std::fmt;

use crate::parallel::ExecutionStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

/// How one folder run is executed; fixed for the duration of the call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    pub mode: ExecutionMode,
    /// Worker threads (0 when sequential)
    pub worker_count: usize,
    pub preserve_order: bool,
}

/// Why a run did not use the execution mode that was asked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fallback {
    /// The model cannot run on several workers
    ParallelUnsafeModel { model: String },
    /// The pool failed and the batch was re-run sequentially
    PoolFailure { error: String },
}

impl fmt::Display for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::ParallelUnsafeModel { model } => write!(
                f,
                "{model} does not work reliably with parallel workers; using sequential processing"
            ),
            Fallback::PoolFailure { error } => write!(
                f,
                "parallel processing failed ({error}); re-ran sequentially"
            ),
        }
    }
}

impl ExecutionPlan {
    pub fn sequential() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            worker_count: 0,
            preserve_order: true,
        }
    }

    pub fn parallel(workers: usize) -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            worker_count: workers.max(1),
            preserve_order: false,
        }
    }

    /// Choose the execution mode of a folder run
    ///
    /// - parallel-unsafe model with no worker count or more than one ⇒ sequential, with a fallback
    /// - 0 or 1 workers ⇒ sequential
    /// - no worker count ⇒ parallel with `optimal_workers`
    /// - otherwise parallel with the requested count
    pub fn select(
        model: &str,
        requested_workers: Option<usize>,
        parallel_unsafe: bool,
        optimal_workers: usize,
    ) -> (Self, Option<Fallback>) {
        if parallel_unsafe && requested_workers.is_none_or(|workers| workers > 1) {
            let fallback = Fallback::ParallelUnsafeModel {
                model: model.to_string(),
            };
            return (Self::sequential(), Some(fallback));
        }

        match requested_workers {
            Some(0) | Some(1) => (Self::sequential(), None),
            None => (Self::parallel(optimal_workers), None),
            Some(workers) => (Self::parallel(workers), None),
        }
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        match self.mode {
            ExecutionMode::Sequential => ExecutionStrategy::Sequential,
            ExecutionMode::Parallel => ExecutionStrategy::Parallel {
                workers: self.worker_count,
            },
        }
    }

    pub fn is_parallel(&self) -> bool {
        self.mode == ExecutionMode::Parallel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parallel_unsafe_model_forces_sequential() {
        for requested in [None, Some(2), Some(8)] {
            let (plan, fallback) = ExecutionPlan::select("mediapipe", requested, true, 4);
            assert_eq!(plan, ExecutionPlan::sequential());
            assert_eq!(
                fallback,
                Some(Fallback::ParallelUnsafeModel {
                    model: "mediapipe".into()
                })
            );
        }
    }

    #[test]
    fn test_parallel_unsafe_model_without_parallelism_is_not_a_fallback() {
        for requested in [Some(0), Some(1)] {
            let (plan, fallback) = ExecutionPlan::select("mediapipe", requested, true, 4);
            assert_eq!(plan, ExecutionPlan::sequential());
            assert!(fallback.is_none());
        }
    }

    #[test]
    fn test_worker_count_selection() {
        let (plan, _) = ExecutionPlan::select("blazeface", Some(0), false, 4);
        assert!(!plan.is_parallel());
        assert_eq!(plan.strategy(), ExecutionStrategy::Sequential);

        let (plan, _) = ExecutionPlan::select("blazeface", Some(1), false, 4);
        assert!(!plan.is_parallel());

        let (plan, fallback) = ExecutionPlan::select("blazeface", None, false, 4);
        assert_eq!(plan.strategy(), ExecutionStrategy::Parallel { workers: 4 });
        assert!(!plan.preserve_order);
        assert!(fallback.is_none());

        let (plan, _) = ExecutionPlan::select("blazeface", Some(3), false, 4);
        assert_eq!(plan.worker_count, 3);
    }

    #[test]
    fn test_fallback_serialization() {
        let fallback = Fallback::PoolFailure {
            error: "worker 0 panicked".into(),
        };
        assert_eq!(
            serde_json::to_value(&fallback).unwrap(),
            serde_json::json!({"kind": "pool_failure", "error": "worker 0 panicked"})
        );
    }
}
