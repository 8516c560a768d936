#![no_main]

use action_protocol::core::schema::FieldSchema;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Rule strings come from host code, values from the wire; neither may panic
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let (rules, raw) = text.split_once('\n').unwrap_or((text, "null"));
    if let Ok(schema) = FieldSchema::compile([("f", rules)]) {
        if let Ok(value) = serde_json::from_str(raw) {
            let _ = schema.transform_field("f", value);
        }
    }
});
