use crate::types::{RawPayload, RecordContext};
use healthsync::{DeviceRecord, MetricType, SyncError, SyncResult};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct RingSleep {
    score: Option<u32>,
    /// Seconds
    total_sleep_duration: u64,
    deep_sleep_duration: Option<u64>,
    rem_sleep_duration: Option<u64>,
    light_sleep_duration: Option<u64>,
    efficiency: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RingReadiness {
    score: u32,
    temperature_deviation: Option<f64>,
    resting_heart_rate: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RingActivity {
    score: Option<u32>,
    steps: u64,
    active_calories: Option<u64>,
    equivalent_walking_distance: Option<u64>,
}

/// Transform ring documents into canonical records.
///
/// Record id: `{device_id}:{day}:{metric}`
pub fn normalize(context: &RecordContext, raw: Vec<RawPayload>) -> SyncResult<Vec<DeviceRecord>> {
    raw.into_iter()
        .map(|payload| {
            let canonical = match payload.metric {
                MetricType::Sleep => sleep(parse(&payload)?),
                MetricType::Readiness => readiness(parse(&payload)?),
                MetricType::Activity => activity(parse(&payload)?),
                other => {
                    return Err(SyncError::Validation(format!(
                        "ring does not report {} data",
                        other
                    )))
                }
            };
            Ok(context.record(payload.date, payload.metric, canonical))
        })
        .collect()
}

fn parse<T: DeserializeOwned>(payload: &RawPayload) -> SyncResult<T> {
    serde_json::from_value(payload.body.clone()).map_err(|e| {
        SyncError::Validation(format!(
            "malformed ring {} payload for {}: {}",
            payload.metric, payload.date, e
        ))
    })
}

fn minutes(seconds: Option<u64>) -> Option<u64> {
    seconds.map(|s| s / 60)
}

fn sleep(doc: RingSleep) -> serde_json::Value {
    json!({
        "score": doc.score,
        "total_minutes": doc.total_sleep_duration / 60,
        "deep_minutes": minutes(doc.deep_sleep_duration),
        "rem_minutes": minutes(doc.rem_sleep_duration),
        "light_minutes": minutes(doc.light_sleep_duration),
        "efficiency": doc.efficiency,
    })
}

fn readiness(doc: RingReadiness) -> serde_json::Value {
    json!({
        "score": doc.score,
        "temperature_deviation": doc.temperature_deviation,
        "resting_heart_rate": doc.resting_heart_rate,
    })
}

fn activity(doc: RingActivity) -> serde_json::Value {
    json!({
        "score": doc.score,
        "steps": doc.steps,
        "active_calories": doc.active_calories,
        "distance_meters": doc.equivalent_walking_distance,
    })
}
