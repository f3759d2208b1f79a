use super::*;
use serde_json::json;

fn record(device_id: &str, date: &str, metric: MetricType, score: i64) -> DeviceRecord {
    let date: NaiveDate = date.parse().unwrap();
    let key = RecordKey {
        device_id: device_id.to_string(),
        date,
        metric,
    };
    DeviceRecord {
        id: key.record_id(),
        user_id: "u1".to_string(),
        device_id: device_id.to_string(),
        date,
        metric,
        payload: json!({ "score": score }),
        source: ProviderType::Ring,
    }
}

#[test]
fn test_provider_type_parse() {
    assert_eq!("ring".parse::<ProviderType>().unwrap(), ProviderType::Ring);
    assert_eq!(
        "phone-health".parse::<ProviderType>().unwrap(),
        ProviderType::PhoneHealth
    );

    let err = "smart-fridge".parse::<ProviderType>().unwrap_err();
    assert!(matches!(err, SyncError::Validation(_)));
}

#[test]
fn test_provider_type_serde_matches_as_str() {
    for provider in ProviderType::ALL {
        let json = serde_json::to_string(&provider).unwrap();
        assert_eq!(json, format!("\"{}\"", provider.as_str()));
    }
}

#[test]
fn test_metric_type_parse() {
    assert_eq!(
        "heart_rate".parse::<MetricType>().unwrap(),
        MetricType::HeartRate
    );
    assert!("steps".parse::<MetricType>().is_err());
}

#[test]
fn test_generate_device_id_format() {
    let id = generate_device_id(ProviderType::Ring);
    assert!(id.starts_with("ring-"));
    assert_eq!(id.len(), "ring-".len() + 8);
    assert!(id["ring-".len()..]
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));

    let id = generate_device_id(ProviderType::FoodApp);
    assert!(id.starts_with("food-app-"));
}

#[test]
fn test_new_device_is_connected() {
    let device = ConnectedDevice::new("u1", ProviderType::Band, "Fitness Band", "cred-1".into());
    assert_eq!(device.state, ConnectionState::Connected);
    assert!(device.last_synced.is_none());
    assert!(device.last_error.is_none());
    assert_eq!(device.credential_ref, "cred-1");
}

#[test]
fn test_record_id_is_deterministic() {
    let a = record("ring-aaaa1111", "2026-10-18", MetricType::Sleep, 80);
    let b = record("ring-aaaa1111", "2026-10-18", MetricType::Sleep, 91);
    assert_eq!(a.id, b.id);
    assert_eq!(a.id, "ring-aaaa1111:2026-10-18:sleep");
}

#[test]
fn test_merge_replaces_same_key() {
    let mut existing = vec![record("d1", "2026-10-18", MetricType::Sleep, 70)];

    let stats = merge_records(
        &mut existing,
        vec![
            record("d1", "2026-10-18", MetricType::Sleep, 85),
            record("d1", "2026-10-19", MetricType::Readiness, 60),
        ],
    );

    assert_eq!(stats, MergeStats { inserted: 1, replaced: 1 });
    assert_eq!(existing.len(), 2);
    assert_eq!(existing[0].payload["score"], 85);
}

#[test]
fn test_merge_keeps_other_devices() {
    let mut existing = vec![record("d2", "2026-10-18", MetricType::Sleep, 70)];

    merge_records(&mut existing, vec![record("d1", "2026-10-18", MetricType::Sleep, 85)]);

    assert_eq!(existing.len(), 2);
    assert_eq!(existing[0].payload["score"], 70);
}

#[test]
fn test_merge_collapses_duplicates_in_batch() {
    let mut existing = Vec::new();

    let stats = merge_records(
        &mut existing,
        vec![
            record("d1", "2026-10-18", MetricType::Activity, 1),
            record("d1", "2026-10-18", MetricType::Activity, 2),
        ],
    );

    assert_eq!(existing.len(), 1);
    assert_eq!(existing[0].payload["score"], 2);
    assert_eq!(stats, MergeStats { inserted: 1, replaced: 1 });
}
