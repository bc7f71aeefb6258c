//! # Gallery Operations
//!
//! [`GalleryOps`] performs a remote call through the [`ApiClient`] and, once
//! it has succeeded, publishes the matching semantic event on the
//! [`EventBus`]. Failed calls publish nothing, with one exception: a failed
//! upload is announced as `upload:failed` so progress indicators can close.
//!
//! Endpoints:
//!
//! | Operation        | Request                    | Event on success   |
//! |------------------|----------------------------|--------------------|
//! | `list_images`    | `GET /api/images?page=N`   | `images:refreshed` |
//! | `create_image`   | `POST /api/images`         | `image:added`      |
//! | `update_image`   | `PUT /api/images/{id}`     | `image:updated`    |
//! | `delete_image`   | `DELETE /api/images/{id}`  | `image:deleted`    |
//! | `upload_image`   | `POST /api/upload` (form)  | `upload:completed` |
//! | `list_labels`    | `GET /api/labels`          | `labels:refreshed` |
//! | `create_label`   | `POST /api/labels`         | `label:added`      |
//! | `update_label`   | `PUT /api/labels/{id}`     | `label:updated`    |
//! | `delete_label`   | `DELETE /api/labels/{id}`  | `label:deleted`    |

use serde_json::Value;
use tracing::{info, warn};

use crate::events::{BusEvent, EventBus, UploadStatus};
use crate::optimistic::{ApplyError, OptimisticCoordinator};
use crate::retrieve::{ApiClient, ApiResponse, FormPart, NetworkError};

/// Form field carrying the uploaded file.
pub const UPLOAD_FIELD: &str = "image";

/// Remote call first, event second.
#[derive(Debug, Clone)]
pub struct GalleryOps {
    api: ApiClient,
    bus: EventBus,
}

impl GalleryOps {
    /// Facade over `api`, announcing changes on `bus`.
    pub fn new(api: ApiClient, bus: EventBus) -> Self {
        Self { api, bus }
    }

    /// The underlying API client.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// The bus events are published on.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Fetch one page of images.
    pub async fn list_images(&self, page: u32) -> Result<ApiResponse<Vec<Value>>, NetworkError> {
        let res = self
            .api
            .get::<Vec<Value>>(&format!("/api/images?page={page}"))
            .await?;
        let count = res.data.as_ref().map_or(0, Vec::len);
        self.bus.publish(BusEvent::ImagesRefreshed { count });
        Ok(res)
    }

    /// Create an image record.
    pub async fn create_image(&self, image: &Value) -> Result<Value, NetworkError> {
        let created = self
            .api
            .post::<Value, _>("/api/images", image)
            .await?
            .data
            .unwrap_or(Value::Null);
        info!(id = %id_of(&created), "image created");
        self.bus.publish(BusEvent::ImageAdded {
            image: created.clone(),
        });
        Ok(created)
    }

    /// Update an image's metadata.
    pub async fn update_image(&self, id: &str, changes: &Value) -> Result<Value, NetworkError> {
        let updated = self
            .api
            .put::<Value, _>(&format!("/api/images/{id}"), changes)
            .await?
            .data
            .unwrap_or(Value::Null);
        self.bus.publish(BusEvent::ImageUpdated {
            image: updated.clone(),
        });
        Ok(updated)
    }

    /// Delete an image.
    pub async fn delete_image(&self, id: &str) -> Result<(), NetworkError> {
        self.api
            .delete::<Value>(&format!("/api/images/{id}"))
            .await?;
        info!(id, "image deleted");
        self.bus.publish(BusEvent::ImageDeleted {
            image_id: id.to_string(),
        });
        Ok(())
    }

    /// Upload one file as a multipart form.
    ///
    /// Publishes `upload:progress` at 0 before sending. On success publishes
    /// progress 100 and `upload:completed`; on failure `upload:failed` with
    /// the user-friendly message, then returns the error.
    pub async fn upload_image(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        mime: Option<&str>,
    ) -> Result<Option<Value>, NetworkError> {
        self.bus.publish(BusEvent::UploadProgress {
            filename: filename.to_string(),
            progress: 0,
            status: UploadStatus::Uploading,
        });

        let part = FormPart::file(UPLOAD_FIELD, filename, bytes, mime.map(str::to_string));
        match self.api.upload::<Value>("/api/upload", vec![part]).await {
            Ok(res) => {
                self.bus.publish(BusEvent::UploadProgress {
                    filename: filename.to_string(),
                    progress: 100,
                    status: UploadStatus::Completed,
                });
                self.bus.publish(BusEvent::UploadCompleted {
                    filename: filename.to_string(),
                    image: res.data.clone(),
                });
                info!(filename, attempts = res.attempts, "upload completed");
                Ok(res.data)
            }
            Err(e) => {
                warn!(filename, error = %e, "upload failed");
                self.bus.publish(BusEvent::UploadFailed {
                    filename: filename.to_string(),
                    error: e.user_friendly_message.clone(),
                });
                Err(e)
            }
        }
    }

    /// Fetch all labels.
    pub async fn list_labels(&self) -> Result<Vec<Value>, NetworkError> {
        let labels = self
            .api
            .get::<Vec<Value>>("/api/labels")
            .await?
            .data
            .unwrap_or_default();
        self.bus.publish(BusEvent::LabelsRefreshed {
            count: labels.len(),
        });
        Ok(labels)
    }

    /// Create a label.
    pub async fn create_label(&self, label: &Value) -> Result<Value, NetworkError> {
        let created = self
            .api
            .post::<Value, _>("/api/labels", label)
            .await?
            .data
            .unwrap_or(Value::Null);
        self.bus.publish(BusEvent::LabelAdded {
            label: created.clone(),
        });
        Ok(created)
    }

    /// Update a label.
    pub async fn update_label(&self, id: &str, changes: &Value) -> Result<Value, NetworkError> {
        let updated = self
            .api
            .put::<Value, _>(&format!("/api/labels/{id}"), changes)
            .await?
            .data
            .unwrap_or(Value::Null);
        self.bus.publish(BusEvent::LabelUpdated {
            label: updated.clone(),
        });
        Ok(updated)
    }

    /// Delete a label.
    pub async fn delete_label(&self, id: &str) -> Result<(), NetworkError> {
        self.api
            .delete::<Value>(&format!("/api/labels/{id}"))
            .await?;
        self.bus.publish(BusEvent::LabelDeleted {
            label_id: id.to_string(),
        });
        Ok(())
    }

    /// Append `image` to the list held by `coordinator` right away, under
    /// `temp_id`, then create it remotely.
    ///
    /// The placeholder carries `temp_id` as its `id`. On success the server's
    /// record takes the placeholder's place; on failure the list is back to
    /// what it was before the call.
    pub async fn add_image_optimistic(
        &self,
        coordinator: &OptimisticCoordinator<Vec<Value>>,
        temp_id: &str,
        image: Value,
    ) -> Result<Vec<Value>, ApplyError<NetworkError>> {
        let mut placeholder = image.clone();
        if let Value::Object(fields) = &mut placeholder {
            fields.insert("id".to_string(), Value::String(temp_id.to_string()));
        }

        let image = &image;
        coordinator
            .apply(
                temp_id,
                move |list: &Vec<Value>| {
                    let mut next = list.clone();
                    next.push(placeholder);
                    next
                },
                move || async move {
                    let created = self.create_image(image).await?;
                    let mut list = coordinator.current();
                    match list.iter().position(|item| id_of(item) == temp_id) {
                        Some(index) => list[index] = created,
                        None => list.push(created),
                    }
                    Ok::<_, NetworkError>(list)
                },
            )
            .await
    }
}

/// The `id` field of a record as text, or an empty string.
fn id_of(record: &Value) -> String {
    match record.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}
