//! AMI event structure

use crate::headers::AmiHeader;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An asynchronous notification decoded from an AMI frame carrying an
/// `Event` key.
///
/// Events are immutable once decoded. Field lookups never fail: a missing
/// key reads as the empty string.
///
/// ```
/// # use asterisk_ami_tokio::AmiEvent;
/// # use std::collections::HashMap;
/// let fields: HashMap<String, String> = [
///     ("Event".into(), "DeviceStateChange".into()),
///     ("Device".into(), "PJSIP/100".into()),
/// ]
/// .into();
/// let event = AmiEvent::new("DeviceStateChange", fields);
/// assert_eq!(event.field("Device"), "PJSIP/100");
/// assert_eq!(event.field("State"), "");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmiEvent {
    name: String,
    fields: HashMap<String, String>,
}

impl AmiEvent {
    /// Build an event from its name and full field map.
    pub fn new(name: impl Into<String>, fields: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Event name (value of the `Event` key).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Field value, or `""` when the key is absent.
    pub fn field(&self, key: impl AsRef<str>) -> &str {
        self.get(key)
            .unwrap_or("")
    }

    /// Field value, distinguishing absence from an empty value.
    pub fn get(&self, key: impl AsRef<str>) -> Option<&str> {
        self.fields
            .get(key.as_ref())
            .map(|s| s.as_str())
    }

    /// Whether the key is present at all.
    pub fn contains(&self, key: impl AsRef<str>) -> bool {
        self.fields
            .contains_key(key.as_ref())
    }

    /// All fields, including `Event` itself.
    pub fn fields(&self) -> &HashMap<String, String> {
        &self.fields
    }

    /// `ActionID` of the action this event answers, for list actions.
    pub fn action_id(&self) -> Option<&str> {
        self.get(AmiHeader::ActionId)
    }

    /// `true` if this event closes a list action's event series.
    pub fn is_list_complete(&self) -> bool {
        self.field(AmiHeader::EventList)
            .eq_ignore_ascii_case(crate::constants::EVENT_LIST_COMPLETE)
    }
}
