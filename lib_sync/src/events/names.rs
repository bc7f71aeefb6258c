//! Closed event vocabulary and the payload carried by each event.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Every event the bus knows about. Adding one means extending this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventName {
    /// An image was created.
    #[serde(rename = "image:added")]
    ImageAdded,
    /// An image's metadata changed.
    #[serde(rename = "image:updated")]
    ImageUpdated,
    /// An image was removed.
    #[serde(rename = "image:deleted")]
    ImageDeleted,
    /// The image list was re-fetched.
    #[serde(rename = "images:refreshed")]
    ImagesRefreshed,
    /// An upload made progress.
    #[serde(rename = "upload:progress")]
    UploadProgress,
    /// An upload finished.
    #[serde(rename = "upload:completed")]
    UploadCompleted,
    /// An upload failed.
    #[serde(rename = "upload:failed")]
    UploadFailed,
    /// A label was created.
    #[serde(rename = "label:added")]
    LabelAdded,
    /// A label changed.
    #[serde(rename = "label:updated")]
    LabelUpdated,
    /// A label was removed.
    #[serde(rename = "label:deleted")]
    LabelDeleted,
    /// The label list was re-fetched.
    #[serde(rename = "labels:refreshed")]
    LabelsRefreshed,
}

impl EventName {
    /// All names, in declaration order.
    pub const ALL: [EventName; 11] = [
        EventName::ImageAdded,
        EventName::ImageUpdated,
        EventName::ImageDeleted,
        EventName::ImagesRefreshed,
        EventName::UploadProgress,
        EventName::UploadCompleted,
        EventName::UploadFailed,
        EventName::LabelAdded,
        EventName::LabelUpdated,
        EventName::LabelDeleted,
        EventName::LabelsRefreshed,
    ];

    /// Image-related names (the usual trigger set for an image list refresh).
    pub const IMAGES: [EventName; 4] = [
        EventName::ImageAdded,
        EventName::ImageUpdated,
        EventName::ImageDeleted,
        EventName::UploadCompleted,
    ];

    /// Label-related names.
    pub const LABELS: [EventName; 3] = [
        EventName::LabelAdded,
        EventName::LabelUpdated,
        EventName::LabelDeleted,
    ];

    /// Wire name, e.g. `image:added`.
    pub fn as_str(self) -> &'static str {
        match self {
            EventName::ImageAdded => "image:added",
            EventName::ImageUpdated => "image:updated",
            EventName::ImageDeleted => "image:deleted",
            EventName::ImagesRefreshed => "images:refreshed",
            EventName::UploadProgress => "upload:progress",
            EventName::UploadCompleted => "upload:completed",
            EventName::UploadFailed => "upload:failed",
            EventName::LabelAdded => "label:added",
            EventName::LabelUpdated => "label:updated",
            EventName::LabelDeleted => "label:deleted",
            EventName::LabelsRefreshed => "labels:refreshed",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing a name outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event name '{0}'")]
pub struct UnknownEventName(pub String);

impl FromStr for EventName {
    type Err = UnknownEventName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| UnknownEventName(s.to_string()))
    }
}

/// Upload state reported with `upload:progress`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Bytes are being sent.
    Uploading,
    /// The server accepted the file.
    Completed,
    /// The upload gave up.
    Failed,
}

/// An event together with its payload.
///
/// Serialised internally tagged under `event`, with camelCase payload fields
/// (`imageId`, `labelId`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all_fields = "camelCase")]
pub enum BusEvent {
    /// `image:added`
    #[serde(rename = "image:added")]
    ImageAdded {
        /// The created image as returned by the server.
        image: Value,
    },
    /// `image:updated`
    #[serde(rename = "image:updated")]
    ImageUpdated {
        /// The updated image as returned by the server.
        image: Value,
    },
    /// `image:deleted`
    #[serde(rename = "image:deleted")]
    ImageDeleted {
        /// Id of the removed image.
        image_id: String,
    },
    /// `images:refreshed`
    #[serde(rename = "images:refreshed")]
    ImagesRefreshed {
        /// Number of images on the fetched page.
        count: usize,
    },
    /// `upload:progress`
    #[serde(rename = "upload:progress")]
    UploadProgress {
        /// File being uploaded.
        filename: String,
        /// Percentage, 0–100.
        progress: u8,
        /// Current state.
        status: UploadStatus,
    },
    /// `upload:completed`
    #[serde(rename = "upload:completed")]
    UploadCompleted {
        /// File that was uploaded.
        filename: String,
        /// Server record for the upload, if returned.
        image: Option<Value>,
    },
    /// `upload:failed`
    #[serde(rename = "upload:failed")]
    UploadFailed {
        /// File that failed.
        filename: String,
        /// User-presentable reason.
        error: String,
    },
    /// `label:added`
    #[serde(rename = "label:added")]
    LabelAdded {
        /// The created label.
        label: Value,
    },
    /// `label:updated`
    #[serde(rename = "label:updated")]
    LabelUpdated {
        /// The updated label.
        label: Value,
    },
    /// `label:deleted`
    #[serde(rename = "label:deleted")]
    LabelDeleted {
        /// Id of the removed label.
        label_id: String,
    },
    /// `labels:refreshed`
    #[serde(rename = "labels:refreshed")]
    LabelsRefreshed {
        /// Number of labels fetched.
        count: usize,
    },
}

impl BusEvent {
    /// The name this event is delivered under.
    pub fn name(&self) -> EventName {
        match self {
            BusEvent::ImageAdded { .. } => EventName::ImageAdded,
            BusEvent::ImageUpdated { .. } => EventName::ImageUpdated,
            BusEvent::ImageDeleted { .. } => EventName::ImageDeleted,
            BusEvent::ImagesRefreshed { .. } => EventName::ImagesRefreshed,
            BusEvent::UploadProgress { .. } => EventName::UploadProgress,
            BusEvent::UploadCompleted { .. } => EventName::UploadCompleted,
            BusEvent::UploadFailed { .. } => EventName::UploadFailed,
            BusEvent::LabelAdded { .. } => EventName::LabelAdded,
            BusEvent::LabelUpdated { .. } => EventName::LabelUpdated,
            BusEvent::LabelDeleted { .. } => EventName::LabelDeleted,
            BusEvent::LabelsRefreshed { .. } => EventName::LabelsRefreshed,
        }
    }
}
