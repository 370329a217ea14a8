use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use qs_threshold::{PrfKey, ThresholdScheme};

use crate::cancellation::CancellationToken;

use super::pipeline::BundlePipeline;

/// Ticks `CreateBundle`/`SignBundleAsync` every `interval` (spec.md §4.4,
/// "BundleRunner"). Stop is cooperative: the runner finishes its current
/// tick boundary and exits once its [`CancellationToken`] fires.
pub struct BundleRunner<T: ThresholdScheme> {
    pipeline: Arc<BundlePipeline<T>>,
    interval: Duration,
    prf_key: PrfKey,
    session_counter: AtomicU64,
    cancellation: CancellationToken,
}

impl<T: ThresholdScheme> BundleRunner<T> {
    pub fn new(pipeline: Arc<BundlePipeline<T>>, interval: Duration, prf_key: PrfKey, cancellation: CancellationToken) -> Self {
        Self { pipeline, interval, prf_key, session_counter: AtomicU64::new(0), cancellation }
    }

    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut cancellation = self.cancellation.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.tick().await,
                    _ = cancellation.cancelled() => {
                        info!("bundle runner stopping");
                        break;
                    }
                }
            }
        })
    }

    async fn tick(&self) {
        if self.cancellation.is_cancelled() {
            return;
        }
        let Some(bundle) = self.pipeline.create_bundle().await else {
            return;
        };

        let config = self.pipeline.grouped_config_snapshot().await;
        let mut signers_by_group = BTreeMap::new();
        for group in &config.groups {
            signers_by_group.insert(group.index, group.validators.clone());
        }

        let session_id = self.session_counter.fetch_add(1, Ordering::Relaxed);
        self.pipeline.sign_bundle_async(
            bundle,
            session_id,
            self.prf_key.clone(),
            signers_by_group,
            self.cancellation.clone(),
        );
    }
}
