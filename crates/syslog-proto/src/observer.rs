//! Message types exchanged on the observer WebSocket.
//!
//! A session pushes a `StateSync` document whenever its visible entry set
//! changes, and accepts a `SetFilter` request whenever the observer narrows
//! or widens what it wants to see.

use serde::{Deserialize, Serialize};

use crate::model::{Entry, Filter};

/// Snapshot of what a session currently believes the observer should see.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSync {
    pub filter: Filter,
    pub entries: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_id: Option<i64>,
}

/// Client-to-server request replacing the session's active filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetFilter {
    pub filter: Filter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_sync_round_trips_through_json() {
        let doc = StateSync {
            filter: Filter::default(),
            entries: Vec::new(),
            first_id: Some(1),
            last_id: Some(5),
        };
        let value = serde_json::to_value(&doc).unwrap();
        let decoded: StateSync = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, doc);
    }

    #[test]
    fn set_filter_round_trips_through_json() {
        let req = SetFilter {
            filter: Filter {
                max_results: Some(10),
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&req).unwrap();
        let decoded: SetFilter = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, req);
    }
}
