//! Usage aggregation
//!
//! Usage is derived, not stored: generated asset rows carry their
//! cost in metadata, mask generations live in the audit log, and the
//! aggregator folds both into calendar windows. Weeks start Sunday.

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;
use visualneurons_common::{
    db::models::{Action, ActionKind, MediaAsset},
    errors::Result,
    pricing, Repository,
};

/// Counters and cost for one calendar window
#[derive(Debug, Default, Clone, Serialize)]
pub struct WindowUsage {
    pub images: u64,
    pub videos: u64,
    pub masks: u64,
    pub cost: f64,
}

/// Full usage report for a session
#[derive(Debug, Serialize)]
pub struct UsageReport {
    pub today: WindowUsage,
    pub week: WindowUsage,
    pub month: WindowUsage,
    pub all_time: WindowUsage,
    /// All-time generation counts keyed by provider tag
    pub by_provider: BTreeMap<String, u64>,
    /// Display-formatted all-time cost
    pub total_cost: String,
}

/// Compute the usage report for a session
pub async fn compute_usage(repo: &Repository, owner: Uuid) -> Result<UsageReport> {
    let assets = repo.list_generated_assets(owner).await?;
    let masks = repo
        .list_actions_of_kind(owner, ActionKind::MaskGenerated)
        .await?;

    Ok(aggregate(&assets, &masks, Utc::now()))
}

fn aggregate(assets: &[MediaAsset], masks: &[Action], now: DateTime<Utc>) -> UsageReport {
    let today = day_start(now);
    let week = week_start(now);
    let month = month_start(now);

    let mut report = UsageReport {
        today: WindowUsage::default(),
        week: WindowUsage::default(),
        month: WindowUsage::default(),
        all_time: WindowUsage::default(),
        by_provider: BTreeMap::new(),
        total_cost: String::new(),
    };

    for asset in assets {
        // Mask assets are billed through the audit log, not here
        if asset.metadata.get("mask").and_then(|v| v.as_bool()) == Some(true) {
            continue;
        }

        let created: DateTime<Utc> = asset.created_at.into();
        let cost = asset
            .metadata
            .get("cost")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        let is_video = asset.kind == "video";

        *report.by_provider.entry(asset.provider.clone()).or_default() += 1;

        for (start, window) in [
            (Some(today), &mut report.today),
            (Some(week), &mut report.week),
            (Some(month), &mut report.month),
            (None, &mut report.all_time),
        ] {
            if start.map_or(true, |s| created >= s) {
                if is_video {
                    window.videos += 1;
                } else {
                    window.images += 1;
                }
                window.cost += cost;
            }
        }
    }

    for mask in masks {
        let created: DateTime<Utc> = mask.created_at.into();
        for (start, window) in [
            (Some(today), &mut report.today),
            (Some(week), &mut report.week),
            (Some(month), &mut report.month),
            (None, &mut report.all_time),
        ] {
            if start.map_or(true, |s| created >= s) {
                window.masks += 1;
                window.cost += pricing::MASK_GENERATION_COST;
            }
        }
    }

    report.total_cost = pricing::format_cost(report.all_time.cost);
    report
}

fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
}

fn week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .week(Weekday::Sun)
        .first_day()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
}

fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .unwrap_or_default()
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn asset_at(
        created: DateTime<Utc>,
        kind: &str,
        provider: &str,
        cost: f64,
    ) -> MediaAsset {
        MediaAsset {
            id: Uuid::new_v4(),
            owner: Uuid::new_v4(),
            kind: kind.to_string(),
            provider: provider.to_string(),
            path: "s/1-a.png".to_string(),
            bytes: 1,
            width: None,
            height: None,
            derived_from: None,
            metadata: json!({ "cost": cost }),
            saved: false,
            created_at: created.into(),
        }
    }

    fn mask_at(created: DateTime<Utc>) -> Action {
        Action {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            action: "mask_generated".to_string(),
            asset_id: None,
            detail: json!({}),
            created_at: created.into(),
        }
    }

    #[test]
    fn test_week_starts_sunday() {
        // 2026-08-19 is a Wednesday; the week began Sunday the 16th
        let now = Utc.with_ymd_and_hms(2026, 8, 19, 14, 0, 0).unwrap();
        assert_eq!(
            week_start(now),
            Utc.with_ymd_and_hms(2026, 8, 16, 0, 0, 0).unwrap()
        );

        // A Sunday is its own week start
        let sunday = Utc.with_ymd_and_hms(2026, 8, 16, 3, 0, 0).unwrap();
        assert_eq!(
            week_start(sunday),
            Utc.with_ymd_and_hms(2026, 8, 16, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_windows_are_cumulative() {
        let now = Utc.with_ymd_and_hms(2026, 8, 19, 14, 0, 0).unwrap();

        let assets = vec![
            // Today
            asset_at(
                Utc.with_ymd_and_hms(2026, 8, 19, 9, 0, 0).unwrap(),
                "image",
                "google-imagen4",
                0.06,
            ),
            // Earlier this week (Monday)
            asset_at(
                Utc.with_ymd_and_hms(2026, 8, 17, 9, 0, 0).unwrap(),
                "video",
                "google-veo-3.1",
                0.0,
            ),
            // Earlier this month, before the week
            asset_at(
                Utc.with_ymd_and_hms(2026, 8, 2, 9, 0, 0).unwrap(),
                "image",
                "gemini-nano-banana",
                0.039,
            ),
            // Last year
            asset_at(
                Utc.with_ymd_and_hms(2025, 12, 1, 9, 0, 0).unwrap(),
                "image",
                "google-imagen4",
                0.06,
            ),
        ];

        let report = aggregate(&assets, &[], now);

        assert_eq!(report.today.images, 1);
        assert_eq!(report.today.videos, 0);
        assert_eq!(report.week.images, 1);
        assert_eq!(report.week.videos, 1);
        assert_eq!(report.month.images, 2);
        assert_eq!(report.all_time.images, 3);
        assert_eq!(report.all_time.videos, 1);
        assert_eq!(report.by_provider["google-imagen4"], 2);
        assert!((report.all_time.cost - 0.159).abs() < 1e-9);
        assert_eq!(report.total_cost, "$0.16");
    }

    #[test]
    fn test_masks_billed_from_audit_log() {
        let now = Utc.with_ymd_and_hms(2026, 8, 19, 14, 0, 0).unwrap();
        let masks = vec![
            mask_at(Utc.with_ymd_and_hms(2026, 8, 19, 9, 0, 0).unwrap()),
            mask_at(Utc.with_ymd_and_hms(2026, 7, 1, 9, 0, 0).unwrap()),
        ];

        let report = aggregate(&[], &masks, now);
        assert_eq!(report.today.masks, 1);
        assert_eq!(report.all_time.masks, 2);
        assert!((report.all_time.cost - 2.0 * pricing::MASK_GENERATION_COST).abs() < 1e-9);
    }

    #[test]
    fn test_mask_assets_not_double_counted() {
        let now = Utc.with_ymd_and_hms(2026, 8, 19, 14, 0, 0).unwrap();
        let mut mask_asset = asset_at(now, "image", "grounded-sam", 0.0014);
        mask_asset.metadata = json!({ "mask": true, "cost": 0.0014 });

        let report = aggregate(&[mask_asset], &[], now);
        assert_eq!(report.all_time.images, 0);
        assert_eq!(report.all_time.cost, 0.0);
    }
}
