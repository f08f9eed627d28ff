//! RFC 5424 wire encode/decode.
//!
//! Grammar and escaping rules are transliterated from the original
//! `hat.syslog.common`/`hat.syslog.encoder` regular expressions so the wire
//! format stays byte-compatible with that implementation's internal log
//! client (including its non-standard literal `BOM` message-body prefix).

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use regex::Regex;

use crate::error::{CodecError, CodecResult};
use crate::model::{Facility, Msg, SdData, Severity};

static MSG_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?xs)
        ^
        < (?P<prival> \d+) >
        (?P<version> \d+)
        \  (?P<timestamp> - | [^ ]+)
        \  (?P<hostname> - | [^ ]+)
        \  (?P<app_name> - | [^ ]+)
        \  (?P<procid> - | [^ ]+)
        \  (?P<msgid> - | [^ ]+)
        \  (?P<data> - | (?:\[ (?:\\(?:\\\\)*\]|[^\]])* \])+)
        (?:\  (?P<msg> .*))?
        $
        "#,
    )
    .expect("static regex")
});

static TIMESTAMP_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?xs)
        ^
        (?P<year>\d{4}) - (?P<month>\d{2}) - (?P<day>\d{2})
        T
        (?P<hour>\d{2}) : (?P<minute>\d{2}) : (?P<second>\d{2})
        (?:\.(?P<fraction>\d+))?
        (?:
            (?P<tz_utc>Z)
            |
            (?P<tz_sign>[+-]) (?P<tz_hour>\d{2}) : (?P<tz_minute>\d{2})
        )
        $
        "#,
    )
    .expect("static regex")
});

static DATA_BLOCK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?xs)
        ^
        \[
            (?P<id> [^ \]]+)
            (?P<param> (?:\\(?:\\\\)*\]|[^\]])*)
        \]
        (?P<rest> .*)
        $
        "#,
    )
    .expect("static regex")
});

static PARAM_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?xs)
        ^
        \  (?P<name> [^=\]]+)
        ="
        (?P<value> (?:\\\\|\\"|\\\]|[^"\]\\])*)
        "
        (?P<rest> .*)
        $
        "#,
    )
    .expect("static regex")
});

static ESCAPE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\\\\|\\"|\\\]"#).expect("static regex"));

/// Encode a message to its RFC 5424 wire string.
pub fn encode_msg_wire(msg: &Msg) -> String {
    let prival = msg.facility.code() as u32 * 8 + msg.severity.code() as u32;
    let mut parts = vec![
        format!("<{prival}>{}", msg.version),
        timestamp_to_str(msg.timestamp),
        msg.hostname.clone().unwrap_or_else(|| "-".to_owned()),
        msg.app_name.clone().unwrap_or_else(|| "-".to_owned()),
        msg.procid.clone().unwrap_or_else(|| "-".to_owned()),
        msg.msgid.clone().unwrap_or_else(|| "-".to_owned()),
        data_to_str(msg.data.as_ref()),
    ];
    if let Some(body) = &msg.msg
        && !body.is_empty()
    {
        parts.push(format!("BOM{body}"));
    }
    parts.join(" ")
}

/// Decode an RFC 5424 wire string into a message.
pub fn decode_msg_wire(s: &str) -> CodecResult<Msg> {
    let caps = MSG_PATTERN
        .captures(s)
        .ok_or_else(|| CodecError::MalformedWire(s.to_owned()))?;

    let prival: u32 = caps["prival"]
        .parse()
        .map_err(|_| CodecError::MalformedWire(s.to_owned()))?;
    let facility = Facility::try_from((prival / 8) as u8)?;
    let severity = Severity::try_from((prival % 8) as u8)?;
    let version: u16 = caps["version"]
        .parse()
        .map_err(|_| CodecError::MalformedWire(s.to_owned()))?;

    let nil_or = |name: &str| -> Option<String> {
        let v = &caps[name];
        if v == "-" { None } else { Some(v.to_owned()) }
    };

    let msg_body = caps.name("msg").map(|m| m.as_str());
    let msg = match msg_body {
        Some(body) if body.len() >= 3 && &body[..3] == "BOM" => Some(body[3..].to_owned()),
        Some(body) => Some(body.to_owned()),
        None => None,
    };

    Ok(Msg {
        facility,
        severity,
        version,
        timestamp: parse_timestamp(&caps["timestamp"])?,
        hostname: nil_or("hostname"),
        app_name: nil_or("app_name"),
        procid: nil_or("procid"),
        msgid: nil_or("msgid"),
        data: parse_data(&caps["data"])?,
        msg,
    })
}

fn timestamp_to_str(ts: Option<DateTime<Utc>>) -> String {
    let Some(dt) = ts else {
        return "-".to_owned();
    };
    if dt.timestamp_subsec_micros() == 0 {
        format!("{}Z", dt.format("%Y-%m-%dT%H:%M:%S"))
    } else {
        format!("{}Z", dt.format("%Y-%m-%dT%H:%M:%S%.6f"))
    }
}

fn parse_timestamp(s: &str) -> CodecResult<Option<DateTime<Utc>>> {
    if s == "-" {
        return Ok(None);
    }
    let caps = TIMESTAMP_PATTERN
        .captures(s)
        .ok_or_else(|| CodecError::MalformedTimestamp(s.to_owned()))?;

    let year: i32 = caps["year"].parse().unwrap();
    let month: u32 = caps["month"].parse().unwrap();
    let day: u32 = caps["day"].parse().unwrap();
    let hour: u32 = caps["hour"].parse().unwrap();
    let minute: u32 = caps["minute"].parse().unwrap();
    let second: u32 = caps["second"].parse().unwrap();
    let micros: u32 = match caps.name("fraction") {
        Some(m) => {
            let digits = m.as_str();
            let scaled: u64 = digits
                .parse()
                .map_err(|_| CodecError::MalformedTimestamp(s.to_owned()))?;
            let factor = 10u64.pow(6u32.saturating_sub(digits.len() as u32));
            (scaled * factor) as u32
        }
        None => 0,
    };

    let naive_date =
        NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| CodecError::MalformedTimestamp(s.to_owned()))?;
    let naive_time = naive_date
        .and_hms_micro_opt(hour, minute, second, micros)
        .ok_or_else(|| CodecError::MalformedTimestamp(s.to_owned()))?;

    let dt_utc = if caps.name("tz_utc").is_some() {
        Utc.from_utc_datetime(&naive_time)
    } else {
        let sign: i64 = if &caps["tz_sign"] == "+" { 1 } else { -1 };
        let tz_hour: i64 = caps["tz_hour"].parse().unwrap();
        let tz_minute: i64 = caps["tz_minute"].parse().unwrap();
        let offset_secs = sign * (tz_hour * 3600 + tz_minute * 60);
        let local = Utc.from_utc_datetime(&naive_time);
        local - chrono::Duration::seconds(offset_secs)
    };

    Ok(Some(dt_utc))
}

fn data_to_str(data: Option<&SdData>) -> String {
    let Some(data) = data else {
        return "-".to_owned();
    };
    if data.is_empty() {
        return "-".to_owned();
    }
    data.iter()
        .map(|(sd_id, params)| format!("[{sd_id}{}]", param_to_str(params)))
        .collect::<Vec<_>>()
        .join("")
}

fn param_to_str(params: &BTreeMap<String, String>) -> String {
    if params.is_empty() {
        return String::new();
    }
    let body = params
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_value(v)))
        .collect::<Vec<_>>()
        .join(" ");
    format!(" {body}")
}

fn parse_data(s: &str) -> CodecResult<Option<SdData>> {
    if s == "-" {
        return Ok(None);
    }
    let mut data = SdData::new();
    let mut rest = s;
    while !rest.is_empty() {
        let caps = DATA_BLOCK_PATTERN
            .captures(rest)
            .ok_or_else(|| CodecError::MalformedStructuredData(s.to_owned()))?;
        let id = caps["id"].to_owned();
        let params = parse_param(&caps["param"])?;
        data.insert(id, params);
        rest = caps.name("rest").map(|m| m.as_str()).unwrap_or("");
    }
    Ok(Some(data))
}

fn parse_param(s: &str) -> CodecResult<BTreeMap<String, String>> {
    let mut param = BTreeMap::new();
    let mut rest = s;
    while !rest.is_empty() {
        let caps = PARAM_PATTERN
            .captures(rest)
            .ok_or_else(|| CodecError::MalformedStructuredData(s.to_owned()))?;
        let name = caps["name"].to_owned();
        let value = unescape_value(&caps["value"]);
        param.insert(name, value);
        rest = caps.name("rest").map(|m| m.as_str()).unwrap_or("");
    }
    Ok(param)
}

fn escape_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace(']', "\\]")
}

fn unescape_value(value: &str) -> String {
    ESCAPE_PATTERN
        .replace_all(value, |caps: &regex::Captures| match &caps[0] {
            "\\\\" => "\\",
            "\\\"" => "\"",
            "\\]" => "]",
            _ => unreachable!(),
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Facility::USER;
    use crate::model::Severity::NOTICE;

    fn sample_msg() -> Msg {
        Msg {
            facility: USER,
            severity: NOTICE,
            version: 1,
            timestamp: None,
            hostname: None,
            app_name: None,
            procid: None,
            msgid: None,
            data: None,
            msg: Some("hello".to_owned()),
        }
    }

    #[test]
    fn encodes_minimal_message_with_bom_prefix() {
        let wire = encode_msg_wire(&sample_msg());
        assert_eq!(wire, "<13>1 - - - - - - BOMhello");
    }

    #[test]
    fn decodes_minimal_message_and_strips_bom() {
        let msg = decode_msg_wire("<13>1 - - - - - - BOMhello").unwrap();
        assert_eq!(msg.facility, USER);
        assert_eq!(msg.severity, NOTICE);
        assert_eq!(msg.msg.as_deref(), Some("hello"));
    }

    #[test]
    fn round_trip_without_optional_fields() {
        let msg = sample_msg();
        let decoded = decode_msg_wire(&encode_msg_wire(&msg)).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trip_with_all_fields_and_structured_data() {
        let mut params = BTreeMap::new();
        params.insert("id".to_owned(), "54\"]\\".to_owned());
        let mut data = SdData::new();
        data.insert("hello@ent".to_owned(), params);

        let msg = Msg {
            facility: Facility::LOCAL3,
            severity: Severity::ERROR,
            version: 1,
            timestamp: Some(Utc.with_ymd_and_hms(2023, 6, 1, 12, 30, 5).unwrap()),
            hostname: Some("host1".to_owned()),
            app_name: Some("myapp".to_owned()),
            procid: Some("123".to_owned()),
            msgid: Some("ID47".to_owned()),
            data: Some(data),
            msg: Some("something happened".to_owned()),
        };
        let wire = encode_msg_wire(&msg);
        let decoded = decode_msg_wire(&wire).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn round_trip_preserves_sub_second_timestamp_precision() {
        let mut msg = sample_msg();
        msg.timestamp = Some(
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0)
                .unwrap()
                .with_nanosecond_unchecked(123456000),
        );
        let decoded = decode_msg_wire(&encode_msg_wire(&msg)).unwrap();
        assert_eq!(decoded.timestamp, msg.timestamp);
    }

    #[test]
    fn empty_message_body_is_not_bom_prefixed() {
        let mut msg = sample_msg();
        msg.msg = Some(String::new());
        let wire = encode_msg_wire(&msg);
        assert!(!wire.contains("BOM"));
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert!(decode_msg_wire("not a syslog message").is_err());
    }

    #[test]
    fn decode_rejects_out_of_range_facility() {
        // prival 999 => facility 124, out of the 0..24 range
        assert!(decode_msg_wire("<999>1 - - - - - -").is_err());
    }

    trait WithNanosecondUnchecked {
        fn with_nanosecond_unchecked(self, nanos: u32) -> DateTime<Utc>;
    }

    impl WithNanosecondUnchecked for DateTime<Utc> {
        fn with_nanosecond_unchecked(self, nanos: u32) -> DateTime<Utc> {
            use chrono::Timelike;
            self.with_nanosecond(nanos).unwrap()
        }
    }
}
