use crate::types::{RawPayload, RecordContext};
use healthsync::{DeviceRecord, MetricType, SyncError, SyncResult};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Default, Deserialize)]
struct BandStages {
    deep: Option<u64>,
    rem: Option<u64>,
    light: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BandSleep {
    duration_minutes: u64,
    efficiency: Option<u32>,
    #[serde(default)]
    stages: BandStages,
}

#[derive(Debug, Deserialize)]
struct BandHeartRate {
    resting: u32,
    average: Option<u32>,
    max: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct BandActivity {
    steps: u64,
    calories: Option<u64>,
    distance_meters: Option<u64>,
}

/// Transform band entries into canonical records.
pub fn normalize(context: &RecordContext, raw: Vec<RawPayload>) -> SyncResult<Vec<DeviceRecord>> {
    raw.into_iter()
        .map(|payload| {
            let canonical = match payload.metric {
                MetricType::Sleep => sleep(parse(&payload)?),
                MetricType::HeartRate => heart_rate(parse(&payload)?),
                MetricType::Activity => activity(parse(&payload)?),
                other => {
                    return Err(SyncError::Validation(format!(
                        "band does not report {} data",
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
            "malformed band {} payload for {}: {}",
            payload.metric, payload.date, e
        ))
    })
}

fn sleep(entry: BandSleep) -> serde_json::Value {
    json!({
        "score": null,
        "total_minutes": entry.duration_minutes,
        "deep_minutes": entry.stages.deep,
        "rem_minutes": entry.stages.rem,
        "light_minutes": entry.stages.light,
        "efficiency": entry.efficiency,
    })
}

fn heart_rate(entry: BandHeartRate) -> serde_json::Value {
    json!({
        "resting_bpm": entry.resting,
        "average_bpm": entry.average,
        "max_bpm": entry.max,
    })
}

fn activity(entry: BandActivity) -> serde_json::Value {
    json!({
        "score": null,
        "steps": entry.steps,
        "active_calories": entry.calories,
        "distance_meters": entry.distance_meters,
    })
}
