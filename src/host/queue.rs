use super::HostError;
use crate::config::PlatformConfig;
use crate::semantic_model::SemanticModel;
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildJob {
    pub model: String,
    pub pre_aggregation: String,
}

impl BuildJob {
    /// One job per pre-aggregation declared on the model.
    pub fn for_model(model: &SemanticModel) -> Vec<BuildJob> {
        model
            .pre_aggregations
            .keys()
            .map(|name| BuildJob {
                model: model.name.clone(),
                pre_aggregation: name.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub job: BuildJob,
    pub rows: u64,
}

#[async_trait]
pub trait PreAggregationBuilder: Send + Sync {
    async fn build(&self, job: BuildJob) -> Result<BuildOutcome, HostError>;
}

/// Runs pre-aggregation builds with a fixed bound on how many are in
/// flight at once.
#[derive(Clone)]
pub struct PreAggregationQueue {
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl PreAggregationQueue {
    pub fn new(concurrency: usize) -> Result<Self, HostError> {
        if concurrency == 0 {
            return Err(HostError::InvalidConcurrency);
        }
        Ok(PreAggregationQueue {
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        })
    }

    pub fn from_config(config: &PlatformConfig) -> Result<Self, HostError> {
        Self::new(config.pre_aggregations_concurrency())
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Builds every job, returning results in job order. A failed build does
    /// not cancel the others.
    pub async fn run_all<B>(
        &self,
        builder: &B,
        jobs: Vec<BuildJob>,
    ) -> Vec<Result<BuildOutcome, HostError>>
    where
        B: PreAggregationBuilder + ?Sized,
    {
        info!(
            "Building {} pre-aggregations, {} at a time",
            jobs.len(),
            self.concurrency
        );
        let builds = jobs.into_iter().map(|job| async move {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| HostError::QueueClosed)?;
            debug!("Building {}.{}", job.model, job.pre_aggregation);
            builder.build(job).await
        });
        join_all(builds).await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::test::db_config;
    use crate::config::{PlatformConfig, Settings};
    use crate::semantic_model::dim_date::dim_date;
    use crate::semantic_model::PreAggregation;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Records how many builds overlap.
    #[derive(Default)]
    struct CountingBuilder {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl PreAggregationBuilder for CountingBuilder {
        async fn build(&self, job: BuildJob) -> Result<BuildOutcome, HostError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if job.pre_aggregation == "broken" {
                return Err(HostError::Build(job.pre_aggregation));
            }
            Ok(BuildOutcome { job, rows: 1 })
        }
    }

    fn jobs(names: &[&str]) -> Vec<BuildJob> {
        names
            .iter()
            .map(|name| BuildJob {
                model: "DimDate".to_string(),
                pre_aggregation: name.to_string(),
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn configured_concurrency_bounds_builds() {
        let config = PlatformConfig::builder(db_config()).build().unwrap();
        let queue = PreAggregationQueue::from_config(&config).unwrap();
        assert_eq!(queue.concurrency(), 2);

        let builder = CountingBuilder::default();
        let results = queue
            .run_all(&builder, jobs(&["a", "b", "c", "d", "e", "f"]))
            .await;

        assert_eq!(results.len(), 6);
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(builder.max_in_flight.load(Ordering::SeqCst), 2);
        assert_eq!(builder.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wider_queue_runs_more_builds_at_once() {
        let settings = Settings {
            pre_aggregations_concurrency: 4,
            ..Settings::default()
        };
        let config = PlatformConfig::builder(db_config())
            .settings(settings)
            .build()
            .unwrap();
        let queue = PreAggregationQueue::from_config(&config).unwrap();
        let builder = CountingBuilder::default();
        queue.run_all(&builder, jobs(&["a", "b", "c", "d", "e", "f"])).await;
        assert_eq!(builder.max_in_flight.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_reported_per_job() {
        let queue = PreAggregationQueue::new(2).unwrap();
        let builder = CountingBuilder::default();
        let results = queue
            .run_all(&builder, jobs(&["a", "broken", "c"]))
            .await;

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(HostError::Build(_))));
        assert_eq!(results[2].as_ref().unwrap().job.pre_aggregation, "c");
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        assert!(matches!(
            PreAggregationQueue::new(0),
            Err(HostError::InvalidConcurrency)
        ));
    }

    #[test]
    fn jobs_follow_declared_pre_aggregations() {
        let mut model = dim_date();
        assert!(BuildJob::for_model(&model).is_empty());

        model.pre_aggregations.insert(
            "main".to_string(),
            PreAggregation {
                measures: vec!["count".to_string()],
                dimensions: vec!["year".to_string(), "quarter".to_string()],
                time_dimension: Some("date".to_string()),
                granularity: None,
                refresh_every: Some("24 hour".to_string()),
            },
        );
        assert_eq!(BuildJob::for_model(&model), jobs(&["main"]));
    }
}
