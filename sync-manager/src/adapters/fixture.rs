//! Fixture adapter: canned payloads for any provider.
//!
//! `demo` mode produces plausible values derived from the calendar date, so
//! two syncs on the same day see identical data. `with_payloads` serves a
//! fixed list. Tests can also inject a fetch delay or a failure.

use crate::types::{RawPayload, RecordContext};
use crate::ProviderAdapter;
use async_trait::async_trait;
use chrono::{Datelike, Duration as DateDuration, NaiveDate, Utc};
use healthsync::{DeviceRecord, MetricType, ProviderAccess, ProviderType, SyncError, SyncResult};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

enum FixtureSource {
    Demo,
    Static(Vec<RawPayload>),
}

pub struct FixtureAdapter {
    provider: ProviderType,
    source: Mutex<FixtureSource>,
    delay: Option<Duration>,
    failure: Mutex<Option<SyncError>>,
    fetches: AtomicUsize,
}

impl FixtureAdapter {
    /// Date-derived demo payloads for `provider`.
    pub fn demo(provider: ProviderType) -> Self {
        Self::with_source(provider, FixtureSource::Demo)
    }

    /// Serves exactly `payloads` on every fetch.
    pub fn with_payloads(provider: ProviderType, payloads: Vec<RawPayload>) -> Self {
        Self::with_source(provider, FixtureSource::Static(payloads))
    }

    fn with_source(provider: ProviderType, source: FixtureSource) -> Self {
        Self {
            provider,
            source: Mutex::new(source),
            delay: None,
            failure: Mutex::new(None),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Every fetch sleeps for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Replaces the payloads served from now on.
    pub fn set_payloads(&self, payloads: Vec<RawPayload>) {
        *lock(&self.source) = FixtureSource::Static(payloads);
    }

    /// Makes every fetch fail with `error` until cleared with `None`.
    pub fn fail_with(&self, error: Option<SyncError>) {
        *lock(&self.failure) = error;
    }

    /// Number of `fetch_raw` calls so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl ProviderAdapter for FixtureAdapter {
    fn provider(&self) -> ProviderType {
        self.provider
    }

    fn display_name(&self) -> &str {
        display_name(self.provider)
    }

    async fn fetch_raw(
        &self,
        _access: &ProviderAccess,
        since: NaiveDate,
    ) -> SyncResult<Vec<RawPayload>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failure = lock(&self.failure).clone();
        if let Some(error) = failure {
            return Err(error);
        }

        let payloads = match &*lock(&self.source) {
            FixtureSource::Demo => demo_payloads(self.provider, Utc::now().date_naive())
                .into_iter()
                .filter(|p| p.date >= since)
                .collect(),
            FixtureSource::Static(payloads) => payloads.clone(),
        };
        Ok(payloads)
    }

    fn normalize(
        &self,
        context: &RecordContext,
        raw: Vec<RawPayload>,
    ) -> SyncResult<Vec<DeviceRecord>> {
        raw.into_iter()
            .map(|payload| {
                if !payload.body.is_object() {
                    return Err(SyncError::Validation(format!(
                        "{} {} payload for {} is not an object",
                        self.provider, payload.metric, payload.date
                    )));
                }
                Ok(context.record(payload.date, payload.metric, payload.body))
            })
            .collect()
    }
}

fn display_name(provider: ProviderType) -> &'static str {
    match provider {
        ProviderType::Ring => "Smart Ring",
        ProviderType::Band => "Fitness Band",
        ProviderType::PhoneHealth => "Phone Health",
        ProviderType::RunApp => "Run Tracker",
        ProviderType::FoodApp => "Food Log",
    }
}

/// Deterministic pseudo-random value in `lo..=hi` for a day and a salt.
fn pick(day: NaiveDate, salt: u64, lo: u64, hi: u64) -> u64 {
    let seed = day.num_days_from_ce() as u64;
    let mixed = seed
        .wrapping_mul(2_654_435_761)
        .wrapping_add(salt.wrapping_mul(40_503))
        .rotate_left(13);
    lo + mixed % (hi - lo + 1)
}

/// Demo payloads for `today`, in canonical shape.
///
/// - ring: sleep (yesterday), readiness (today)
/// - band: heart rate (today), activity (yesterday)
/// - phone-health: activity (today)
/// - run-app: workout (yesterday)
/// - food-app: nutrition (today)
pub fn demo_payloads(provider: ProviderType, today: NaiveDate) -> Vec<RawPayload> {
    let yesterday = today - DateDuration::days(1);

    match provider {
        ProviderType::Ring => vec![
            RawPayload::new(yesterday, MetricType::Sleep, sleep(yesterday)),
            RawPayload::new(
                today,
                MetricType::Readiness,
                json!({
                    "score": pick(today, 1, 55, 95),
                    "temperature_deviation": (pick(today, 2, 0, 10) as f64 - 5.0) / 10.0,
                    "resting_heart_rate": pick(today, 3, 48, 66),
                }),
            ),
        ],
        ProviderType::Band => vec![
            RawPayload::new(
                today,
                MetricType::HeartRate,
                json!({
                    "resting_bpm": pick(today, 4, 50, 68),
                    "average_bpm": pick(today, 5, 64, 82),
                    "max_bpm": pick(today, 6, 120, 180),
                }),
            ),
            RawPayload::new(yesterday, MetricType::Activity, activity(yesterday)),
        ],
        ProviderType::PhoneHealth => {
            vec![RawPayload::new(today, MetricType::Activity, activity(today))]
        }
        ProviderType::RunApp => vec![RawPayload::new(
            yesterday,
            MetricType::Workout,
            json!({
                "kind": "run",
                "duration_minutes": pick(yesterday, 7, 20, 75),
                "distance_meters": pick(yesterday, 8, 3_000, 14_000),
                "average_heart_rate": pick(yesterday, 9, 130, 165),
            }),
        )],
        ProviderType::FoodApp => vec![RawPayload::new(
            today,
            MetricType::Nutrition,
            json!({
                "calories": pick(today, 10, 1_600, 2_900),
                "protein_g": pick(today, 11, 60, 160),
                "carbs_g": pick(today, 12, 150, 350),
                "fat_g": pick(today, 13, 40, 110),
            }),
        )],
    }
}

fn sleep(day: NaiveDate) -> serde_json::Value {
    let deep = pick(day, 20, 45, 110);
    let rem = pick(day, 21, 60, 120);
    let light = pick(day, 22, 180, 280);
    json!({
        "score": pick(day, 23, 55, 95),
        "total_minutes": deep + rem + light,
        "deep_minutes": deep,
        "rem_minutes": rem,
        "light_minutes": light,
        "efficiency": pick(day, 24, 78, 97),
    })
}

fn activity(day: NaiveDate) -> serde_json::Value {
    let steps = pick(day, 30, 2_500, 16_000);
    json!({
        "score": null,
        "steps": steps,
        "active_calories": steps / 25,
        "distance_meters": steps * 3 / 4,
    })
}
