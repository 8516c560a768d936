//! Property-based tests using proptest
//!
//! Schema coercion, envelope decoding and the authorization gate are checked
//! against randomly generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use action_protocol::core::envelope::{decode_document, Envelope};
use action_protocol::core::schema::{parse_truthy, FieldSchema};
use action_protocol::protocol::{authorize, AccessLevel, AuthDecision, AuthItem, AuthState};
use proptest::prelude::*;
use serde_json::{json, Value};

const TYPED_RULES: &[&str] = &[
    "int", "float", "number", "string", "boolean", "null", "array", "object",
];

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        (-1_000_000i64..1_000_000).prop_map(|k| Value::from(k as f64 / 8.0)),
        "[ a-zA-Z0-9.+-]{0,16}".prop_map(Value::String),
    ]
}

fn value() -> impl Strategy<Value = Value> {
    scalar().prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::hash_map("[a-z]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn level() -> impl Strategy<Value = AccessLevel> {
    prop_oneof![
        Just(AccessLevel::Guest),
        Just(AccessLevel::AuthorizedUser),
        Just(AccessLevel::AuthorizedSystem),
    ]
}

// Property: Coercing an already coerced value changes nothing
proptest! {
    #[test]
    fn prop_coercion_is_idempotent(ty in prop::sample::select(TYPED_RULES), input in value()) {
        let schema = FieldSchema::compile([("f", ty)]).expect("Schema should compile");
        if let Ok(once) = schema.transform_field("f", input) {
            let twice = schema.transform_field("f", once.clone()).expect("Coerced value should stay valid");
            prop_assert_eq!(twice, once);
        }
    }
}

// Property: Null passes every type except when required
proptest! {
    #[test]
    fn prop_null_passes_unless_required(ty in prop::sample::select(TYPED_RULES)) {
        let optional = FieldSchema::compile([("f", ty)]).unwrap();
        prop_assert_eq!(optional.transform_field("f", Value::Null).unwrap(), Value::Null);

        let rules = format!("{ty}|required");
        let required = FieldSchema::compile([("f", rules.as_str())]).unwrap();
        prop_assert!(required.transform_field("f", Value::Null).is_err());
    }
}

// Property: Scalar types never accept composites without a converter
proptest! {
    #[test]
    fn prop_scalars_reject_composites(
        ty in prop::sample::select(&["int", "float", "number", "string", "boolean"][..]),
        items in prop::collection::vec(scalar(), 0..4),
    ) {
        let schema = FieldSchema::compile([("f", ty)]).unwrap();
        prop_assert!(schema.transform_field("f", Value::Array(items)).is_err());
    }
}

// Property: Int coercion of a float truncates toward zero
proptest! {
    #[test]
    fn prop_int_truncates(f in -1.0e9f64..1.0e9) {
        let schema = FieldSchema::compile([("f", "int")]).unwrap();
        let coerced = schema.transform_field("f", json!(f)).unwrap();
        prop_assert_eq!(coerced, json!(f.trunc() as i64));
    }
}

// Property: Numeric strings coerce to the same float as the number
proptest! {
    #[test]
    fn prop_numeric_strings_match_numbers(f in -1.0e9f64..1.0e9) {
        let schema = FieldSchema::compile([("f", "float")]).unwrap();
        let from_string = schema.transform_field("f", json!(f.to_string())).unwrap();
        let from_number = schema.transform_field("f", json!(f)).unwrap();
        prop_assert_eq!(from_string, from_number);
    }
}

// Property: The boolean parser ignores case and surrounding whitespace
proptest! {
    #[test]
    fn prop_truthy_is_case_insensitive(
        word in prop::sample::select(&["true", "false", "yes", "no", "on", "off", "1", "0"][..]),
        upper in any::<bool>(),
        pad in " {0,3}",
    ) {
        let base = parse_truthy(word);
        let cased = if upper { word.to_uppercase() } else { word.to_string() };
        prop_assert_eq!(parse_truthy(&format!("{pad}{cased}{pad}")), base);
        prop_assert!(base.is_some());
    }
}

// Property: Decoding arbitrary bytes never panics
proptest! {
    #[test]
    fn prop_decode_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        if let Ok(document) = decode_document(&bytes) {
            let _ = Envelope::from_document(document);
        }
    }
}

// Property: Any object with a string action yields that envelope
proptest! {
    #[test]
    fn prop_envelope_keeps_action_and_data(action in "[a-z_.]{1,24}", data in value()) {
        let bytes = serde_json::to_vec(&json!({"action": action, "data": data})).unwrap();
        let envelope = Envelope::from_document(decode_document(&bytes).unwrap()).unwrap();
        prop_assert_eq!(envelope.action, action);
        prop_assert_eq!(envelope.data, data);
    }
}

// Property: Access is granted exactly when the session level reaches the requirement
proptest! {
    #[test]
    fn prop_authorization_is_monotonic(required in level(), held in level(), guest in any::<bool>()) {
        let state = if guest {
            AuthState::guest()
        } else {
            AuthState::authorized(AuthItem::new("p", held))
        };
        let decision = authorize(Some(required), &state);

        match (guest, decision) {
            (true, AuthDecision::RequiresAuth) => {}
            (false, AuthDecision::Allowed) => prop_assert!(held.lvl() >= required.lvl()),
            (false, AuthDecision::InsufficientLevel(level)) => {
                prop_assert!(held.lvl() < required.lvl());
                prop_assert_eq!(level, required);
            }
            (guest, other) => prop_assert!(false, "guest={} decision={:?}", guest, other),
        }
        prop_assert!(matches!(authorize(None, &state), AuthDecision::Allowed));
    }
}
