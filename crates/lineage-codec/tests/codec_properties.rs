use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use lineage_codec::RecordCodec;
use lineage_core::errors::LineageError;
use lineage_core::model::{Activity, Agent, Entity, EntityRef, Plan};
use lineage_core::{ObjectId, RecordKind};
use proptest::prelude::*;
use serde_json::{json, Value};

fn activity_with(params: BTreeMap<String, String>, extra: BTreeMap<String, Value>) -> Activity {
    let input = Entity::new("data/input.csv", "c1").unwrap();
    let at = Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap();
    Activity {
        id: ObjectId::generate(RecordKind::Activity),
        plan: ObjectId::generate(RecordKind::Plan),
        agent: Agent::Software {
            name: "runner".into(),
            version: None,
        },
        started_at: at,
        ended_at: at,
        parameters: params,
        usages: vec![EntityRef::from(&input)],
        generations: Vec::new(),
        extra,
    }
}

fn extra_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-z ]{0,12}".prop_map(Value::from),
        prop::collection::vec("[a-z]{0,4}", 0..3).prop_map(|items| json!(items)),
    ]
}

proptest! {
    #[test]
    fn activities_round_trip_with_unknown_fields(
        params in prop::collection::btree_map("[a-z]{1,6}", "[ -~]{0,10}", 0..4),
        extra in prop::collection::btree_map("x_[a-z]{1,6}", extra_value(), 0..4),
        compress in any::<bool>(),
    ) {
        let codec = RecordCodec::new(compress);
        let activity = activity_with(params, extra);
        let bytes = codec.encode(&activity).unwrap();
        let decoded: Activity = codec.decode(&bytes).unwrap();
        prop_assert_eq!(&decoded, &activity);
        prop_assert_eq!(codec.encode(&decoded).unwrap(), bytes);
    }
}

#[test]
fn encoding_is_deterministic_across_insertion_order() {
    let codec = RecordCodec::new(true);
    let mut forward = BTreeMap::new();
    forward.insert("x_alpha".to_string(), json!({"b": 1, "a": 2}));
    forward.insert("x_beta".to_string(), json!([3, 2, 1]));
    let activity = activity_with(BTreeMap::new(), forward);
    let mut shuffled = activity.clone();
    shuffled.extra = activity.extra.iter().rev().map(|(k, v)| (k.clone(), v.clone())).collect();
    assert_eq!(codec.encode(&activity).unwrap(), codec.encode(&shuffled).unwrap());
}

#[test]
fn wrong_kind_is_corrupt() {
    let codec = RecordCodec::new(false);
    let entity = Entity::new("a.txt", "c").unwrap();
    let bytes = codec.encode(&entity).unwrap();
    let err = codec.decode::<Plan>(&bytes).unwrap_err();
    assert!(matches!(err, LineageError::CorruptRecord(_)));
    assert_eq!(err.code(), "kind-mismatch");
    assert_eq!(err.info().context["id"], entity.id.as_str());
}

#[test]
fn malformed_payloads_are_corrupt() {
    let codec = RecordCodec::default();
    for (bytes, code) in [
        (b"not json".to_vec(), "record-json"),
        (b"[1,2]".to_vec(), "record-json"),
        (br#"{"@kind":"entity"}"#.to_vec(), "record-id"),
        (br#"{"id":"entity-1"}"#.to_vec(), "record-kind"),
        (br#"{"id":"x","@kind":"bogus"}"#.to_vec(), "record-kind"),
        (vec![0x1f, 0x8b, 0x00, 0x01], "record-gzip"),
    ] {
        let err = codec.decode_any(&bytes).unwrap_err();
        assert!(matches!(err, LineageError::CorruptRecord(_)), "{err}");
        assert_eq!(err.code(), code);
    }
}

#[test]
fn missing_required_fields_are_reported_with_the_id() {
    let codec = RecordCodec::new(false);
    let err = codec
        .decode::<Entity>(br#"{"@kind":"entity","id":"entity-7"}"#)
        .unwrap_err();
    assert_eq!(err.code(), "record-shape");
    assert_eq!(err.info().context["id"], "entity-7");
}
