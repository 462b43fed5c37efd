//! Reconciliation sweep
//!
//! Webhook delivery is at-least-once but not guaranteed: a crashed
//! process or a dropped delivery leaves predictions processing
//! forever. The sweep periodically re-polls stale rows against the
//! provider and finalizes them through the same compare-and-set path
//! webhooks use, so a webhook landing mid-sweep is still safe.

use crate::services::completion::{self, FinalizeOutcome};
use crate::AppState;
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};
use visualneurons_common::{
    metrics,
    providers::RemoteStatus,
    Repository,
};

pub async fn run_sweeper(state: AppState) {
    let interval = Duration::from_secs(state.config.video.reconcile_interval_secs);
    info!(interval_secs = interval.as_secs(), "Reconciliation sweep started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it so startup is quiet
    ticker.tick().await;

    loop {
        ticker.tick().await;
        if let Err(e) = sweep_once(&state).await {
            warn!(error = %e, "Reconciliation sweep failed");
        }
    }
}

pub async fn sweep_once(state: &AppState) -> visualneurons_common::Result<()> {
    let repo = Repository::new(state.db.clone());
    let video = state.gateway.video_backend()?;

    let stale_after = ChronoDuration::seconds(state.config.video.stale_after_secs as i64);
    let give_up_after = ChronoDuration::seconds(
        (state.config.video.stale_after_secs + state.config.video.timeout_secs) as i64,
    );
    let now = Utc::now();

    let stale = repo
        .list_stale_processing_predictions(now - stale_after)
        .await?;

    if stale.is_empty() {
        return Ok(());
    }

    debug!(count = stale.len(), "Reconciling stale predictions");

    for prediction in stale {
        let external_id = prediction.external_id.clone();

        let poll = match video.poll(&external_id).await {
            Ok(poll) => poll,
            Err(e) => {
                warn!(external_id, error = %e, "Reconcile poll failed");
                continue;
            }
        };

        let result = match (poll.status, poll.output_url) {
            (RemoteStatus::Succeeded, Some(url)) => {
                match completion::finalize_succeeded(&repo, &state.store, video, &external_id, &url)
                    .await
                {
                    Ok(FinalizeOutcome::Finalized(_)) => {
                        metrics::record_reconciled("succeeded");
                        Ok(())
                    }
                    Ok(FinalizeOutcome::AlreadyFinal) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            (RemoteStatus::Succeeded, None) => {
                completion::finalize_failed(&repo, &external_id, "Job succeeded with no output URL")
                    .await
                    .map(|transitioned| {
                        if transitioned {
                            metrics::record_reconciled("failed");
                        }
                    })
            }
            (RemoteStatus::Failed, _) => {
                let error = poll
                    .error
                    .unwrap_or_else(|| "Video generation failed".to_string());
                completion::finalize_failed(&repo, &external_id, &error)
                    .await
                    .map(|transitioned| {
                        if transitioned {
                            metrics::record_reconciled("failed");
                        }
                    })
            }
            (RemoteStatus::Pending, _) => {
                // Still running upstream. Only give up once the full
                // generation budget has also elapsed.
                let created: chrono::DateTime<Utc> = prediction.created_at.into();
                if now - created > give_up_after {
                    completion::finalize_failed(
                        &repo,
                        &external_id,
                        "Timed out waiting for video generation",
                    )
                    .await
                    .map(|transitioned| {
                        if transitioned {
                            metrics::record_reconciled("timeout");
                        }
                    })
                } else {
                    Ok(())
                }
            }
        };

        if let Err(e) = result {
            warn!(external_id, error = %e, "Reconcile finalize failed");
        }
    }

    Ok(())
}
