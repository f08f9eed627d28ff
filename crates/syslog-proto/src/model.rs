//! The syslog message model: `Facility`, `Severity`, `Msg`, `Entry`, `Filter`.
//!
//! Facility/severity numeric values and symbolic names match RFC 5424 and the
//! `hat.syslog.common` enums this system's wire format is grounded on.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Structured-data payload: SD-ID -> (param name -> value).
pub type SdData = BTreeMap<String, BTreeMap<String, String>>;

macro_rules! numbered_enum {
    ($name:ident { $($variant:ident = $num:expr),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub const fn code(self) -> u8 {
                match self {
                    $(Self::$variant => $num,)+
                }
            }

            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant),)+
                }
            }
        }

        impl TryFrom<u8> for $name {
            type Error = crate::error::CodecError;

            fn try_from(code: u8) -> Result<Self, Self::Error> {
                match code {
                    $($num => Ok(Self::$variant),)+
                    other => Err(crate::error::CodecError::InvalidEnumValue {
                        kind: stringify!($name),
                        value: other as i64,
                    }),
                }
            }
        }
    };
}

numbered_enum!(Facility {
    KERNEL = 0,
    USER = 1,
    MAIL = 2,
    SYSTEM = 3,
    AUTHORIZATION1 = 4,
    INTERNAL = 5,
    PRINTER = 6,
    NETWORK = 7,
    UUCP = 8,
    CLOCK1 = 9,
    AUTHORIZATION2 = 10,
    FTP = 11,
    NTP = 12,
    AUDIT = 13,
    ALERT = 14,
    CLOCK2 = 15,
    LOCAL0 = 16,
    LOCAL1 = 17,
    LOCAL2 = 18,
    LOCAL3 = 19,
    LOCAL4 = 20,
    LOCAL5 = 21,
    LOCAL6 = 22,
    LOCAL7 = 23,
});

numbered_enum!(Severity {
    EMERGENCY = 0,
    ALERT = 1,
    CRITICAL = 2,
    ERROR = 3,
    WARNING = 4,
    NOTICE = 5,
    INFORMATIONAL = 6,
    DEBUG = 7,
});

/// A single RFC 5424 message, immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Msg {
    pub facility: Facility,
    pub severity: Severity,
    pub version: u16,
    pub timestamp: Option<DateTime<Utc>>,
    pub hostname: Option<String>,
    pub app_name: Option<String>,
    pub procid: Option<String>,
    pub msgid: Option<String>,
    pub data: Option<SdData>,
    pub msg: Option<String>,
}

/// A persisted `Msg` with an assigned monotonic id and arrival timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub msg: Msg,
}

/// A query predicate over stored entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_timestamp_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_timestamp_to: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility: Option<Facility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msgid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

/// Global cap on `Filter::max_results`, enforced by UI sessions only.
pub const MAX_RESULTS_LIMIT: u32 = 200;

impl Filter {
    /// Whether `entry` satisfies every present predicate on this filter.
    pub fn matches(&self, entry: &Entry) -> bool {
        if let Some(last_id) = self.last_id
            && entry.id > last_id
        {
            return false;
        }
        if let Some(from) = self.entry_timestamp_from
            && entry.timestamp < from
        {
            return false;
        }
        if let Some(to) = self.entry_timestamp_to
            && entry.timestamp > to
        {
            return false;
        }
        if let Some(facility) = self.facility
            && entry.msg.facility != facility
        {
            return false;
        }
        if let Some(severity) = self.severity
            && entry.msg.severity != severity
        {
            return false;
        }
        if !str_predicate_matches(self.hostname.as_deref(), entry.msg.hostname.as_deref()) {
            return false;
        }
        if !str_predicate_matches(self.app_name.as_deref(), entry.msg.app_name.as_deref()) {
            return false;
        }
        if !str_predicate_matches(self.procid.as_deref(), entry.msg.procid.as_deref()) {
            return false;
        }
        if !str_predicate_matches(self.msgid.as_deref(), entry.msg.msgid.as_deref()) {
            return false;
        }
        if !str_predicate_matches(self.msg.as_deref(), entry.msg.msg.as_deref()) {
            return false;
        }
        true
    }
}

/// Empty/absent predicate is unconstrained; otherwise a case-sensitive substring match.
fn str_predicate_matches(predicate: Option<&str>, value: Option<&str>) -> bool {
    match predicate {
        None => true,
        Some(p) if p.is_empty() => true,
        Some(p) => value.is_some_and(|v| v.contains(p)),
    }
}
