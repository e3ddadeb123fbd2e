use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Sent,
    Delivered,
    Opened,
    Clicked,
    Converted,
    Impression,
    Spend,
}

impl EventKind {
    pub fn as_db(&self) -> &'static str {
        match self {
            EventKind::Sent => "SENT",
            EventKind::Delivered => "DELIVERED",
            EventKind::Opened => "OPENED",
            EventKind::Clicked => "CLICKED",
            EventKind::Converted => "CONVERTED",
            EventKind::Impression => "IMPRESSION",
            EventKind::Spend => "SPEND",
        }
    }
}

/// A delivery/ad event as handed to the engine by webhook handlers. The
/// `external_event_id` is the replay-dedup key; `value_minor` carries spend
/// amounts and conversion values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    pub variant_id: Uuid,
    pub kind: EventKind,
    pub external_event_id: String,
    pub value_minor: Option<i64>,
}
