//! Download progress events, as read by a front-end.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProgressEvent {
    Update { percent: u8 },
    Success,
    Failed { reason: String },
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Update { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_status_tag() {
        let json = serde_json::to_string(&ProgressEvent::Update { percent: 40 }).unwrap();
        assert_eq!(json, r#"{"status":"update","percent":40}"#);
        let json = serde_json::to_string(&ProgressEvent::Success).unwrap();
        assert_eq!(json, r#"{"status":"success"}"#);
        assert!(ProgressEvent::Failed { reason: "x".into() }.is_terminal());
    }
}
