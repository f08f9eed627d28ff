//! Lossless JSON encode/decode for `Msg`, `Entry`, and `Filter`.
//!
//! Enumerated fields use their symbolic name (handled by `serde`'s default
//! unit-variant representation, since `Facility`/`Severity`'s Rust variant
//! names already match the original's enum member names exactly).
//!
//! `data` is carried as the already-JSON-encoded SD payload verbatim, i.e. a
//! JSON *string*, not expanded into a nested object -- matching the
//! original's `msg.data: Optional[str]` and what `msg_to_json` actually
//! puts on the wire.

use serde_json::Value;

use crate::error::CodecResult;
use crate::model::{Entry, Filter, Msg};

pub fn encode_msg_json(msg: &Msg) -> Value {
    let mut value = serde_json::to_value(msg).expect("Msg serialization is infallible");
    stringify_data_field(&mut value);
    value
}

pub fn decode_msg_json(value: &Value) -> CodecResult<Msg> {
    let mut value = value.clone();
    parse_data_field(&mut value)?;
    Ok(serde_json::from_value(value)?)
}

pub fn encode_entry_json(entry: &Entry) -> Value {
    let mut value = serde_json::to_value(entry).expect("Entry serialization is infallible");
    if let Some(msg_value) = value.get_mut("msg") {
        stringify_data_field(msg_value);
    }
    value
}

pub fn decode_entry_json(value: &Value) -> CodecResult<Entry> {
    let mut value = value.clone();
    if let Some(msg_value) = value.get_mut("msg") {
        parse_data_field(msg_value)?;
    }
    Ok(serde_json::from_value(value)?)
}

/// Replaces a `Msg`-shaped object's `data` field (a nested SD object, as
/// `serde` renders `Option<SdData>` by default) with its JSON-string form.
fn stringify_data_field(msg_value: &mut Value) {
    let Some(data) = msg_value.get_mut("data") else {
        return;
    };
    if data.is_null() {
        return;
    }
    let encoded = serde_json::to_string(data).expect("structured data serialization is infallible");
    *data = Value::String(encoded);
}

/// Reverses `stringify_data_field`: parses the `data` field's JSON string
/// back into the nested object `serde` expects to deserialize `SdData` from.
fn parse_data_field(msg_value: &mut Value) -> CodecResult<()> {
    let Some(data) = msg_value.get_mut("data") else {
        return Ok(());
    };
    if let Value::String(encoded) = data {
        *data = serde_json::from_str(encoded)?;
    }
    Ok(())
}

pub fn encode_filter_json(filter: &Filter) -> Value {
    serde_json::to_value(filter).expect("Filter serialization is infallible")
}

pub fn decode_filter_json(value: &Value) -> CodecResult<Filter> {
    Ok(serde_json::from_value(value.clone())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Facility, Severity};
    use chrono::Utc;

    fn sample_msg() -> Msg {
        Msg {
            facility: Facility::LOCAL0,
            severity: Severity::WARNING,
            version: 1,
            timestamp: Some(Utc::now()),
            hostname: Some("h".to_owned()),
            app_name: None,
            procid: None,
            msgid: None,
            data: None,
            msg: Some("hi".to_owned()),
        }
    }

    #[test]
    fn msg_json_round_trips() {
        let msg = sample_msg();
        let value = encode_msg_json(&msg);
        assert_eq!(value["facility"], "LOCAL0");
        assert_eq!(value["severity"], "WARNING");
        let decoded = decode_msg_json(&value).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn msg_json_carries_data_as_a_json_string_not_a_nested_object() {
        let mut sd = std::collections::BTreeMap::new();
        let mut params = std::collections::BTreeMap::new();
        params.insert("iut".to_owned(), "3".to_owned());
        sd.insert("exampleSDID@0".to_owned(), params);
        let msg = Msg {
            data: Some(sd.clone()),
            ..sample_msg()
        };

        let value = encode_msg_json(&msg);
        assert!(value["data"].is_string(), "data should be a JSON string, got {value:?}");
        let reparsed: Value = serde_json::from_str(value["data"].as_str().unwrap()).unwrap();
        assert_eq!(reparsed["exampleSDID@0"]["iut"], "3");

        let decoded = decode_msg_json(&value).unwrap();
        assert_eq!(decoded.data, Some(sd));
    }

    #[test]
    fn entry_json_round_trips() {
        let entry = Entry {
            id: 42,
            timestamp: Utc::now(),
            msg: sample_msg(),
        };
        let value = encode_entry_json(&entry);
        assert_eq!(value["id"], 42);
        let decoded = decode_entry_json(&value).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn filter_json_round_trips() {
        let filter = Filter {
            max_results: Some(50),
            facility: Some(Facility::AUTHORIZATION1),
            msg: Some("boot".to_owned()),
            ..Default::default()
        };
        let value = encode_filter_json(&filter);
        assert_eq!(value["facility"], "AUTHORIZATION1");
        let decoded = decode_filter_json(&value).unwrap();
        assert_eq!(decoded, filter);
    }

    #[test]
    fn empty_filter_round_trips() {
        let filter = Filter::default();
        let decoded = decode_filter_json(&encode_filter_json(&filter)).unwrap();
        assert_eq!(decoded, filter);
    }
}
