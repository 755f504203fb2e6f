use crate::error::{Error, Result};
use crate::media::{MediaKind, MediaStore};
use crate::metadata_store::SourceRepository;
use crate::models::{Event, Source};
use crate::normalize::normalize;
use bytes::Bytes;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument};

/// One file from a multipart upload group
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Client-supplied file name, possibly with directory components
    pub file_name: String,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }
}

/// Correlated file groups of one upload request, matched by position
#[derive(Debug, Clone, Default)]
pub struct UploadBundle {
    pub videos: Vec<UploadedFile>,
    pub images: Vec<UploadedFile>,
    pub json: Vec<UploadedFile>,
}

/// Acknowledgement for a fully processed bundle
#[derive(Debug, Clone, Serialize)]
pub struct UploadAck {
    pub message: String,
    /// Ids of the committed sources, in upload order
    pub sources: Vec<String>,
}

/// Turns upload bundles into stored media and committed source records
pub struct UploadCoordinator {
    store: Arc<dyn SourceRepository>,
    media: Arc<MediaStore>,
}

impl UploadCoordinator {
    pub fn new(store: Arc<dyn SourceRepository>, media: Arc<MediaStore>) -> Self {
        Self { store, media }
    }

    /// Ingest every item of `bundle` in order.
    ///
    /// Group sizes are checked before anything is written. Items are then
    /// processed one at a time and the first failure stops the loop; items
    /// committed before it, and their files, are kept.
    #[instrument(skip(self, bundle), fields(
        videos = bundle.videos.len(),
        images = bundle.images.len(),
        json = bundle.json.len()
    ))]
    pub async fn ingest(&self, bundle: UploadBundle) -> Result<UploadAck> {
        validate_groups(&bundle)?;

        let mut committed = Vec::with_capacity(bundle.videos.len());

        for index in 0..bundle.videos.len() {
            match self.ingest_item(&bundle, index).await {
                Ok(source_id) => committed.push(source_id),
                Err(e) => {
                    error!(
                        error = %e,
                        index = index,
                        committed = committed.len(),
                        "Upload aborted"
                    );
                    metrics::counter!("processor.uploads.failed").increment(1);
                    return Err(e);
                }
            }
        }

        info!(sources = committed.len(), "Upload processed");

        Ok(UploadAck {
            message: "Files and data successfully uploaded".to_string(),
            sources: committed,
        })
    }

    async fn ingest_item(&self, bundle: &UploadBundle, index: usize) -> Result<String> {
        let video = &bundle.videos[index];
        let video_key = self
            .media
            .save(MediaKind::Video, &video.file_name, &video.data)
            .await?;

        let thumbnail_key = match bundle.images.get(index) {
            Some(image) => Some(
                self.media
                    .save(MediaKind::Image, &image.file_name, &image.data)
                    .await?,
            ),
            None => None,
        };

        let mut source = decode_source(&bundle.json[index].data)?;

        source.video_key = video_key;
        if let Some(thumbnail_key) = thumbnail_key {
            source.thumbnail_key = thumbnail_key;
        }

        self.store.create_source(&source).await?;

        metrics::counter!("processor.sources.ingested").increment(1);
        info!(source_id = %source.id, index = index, "Source ingested");

        Ok(source.id)
    }
}

/// Check group cardinality of a bundle
pub fn validate_groups(bundle: &UploadBundle) -> Result<()> {
    if bundle.videos.is_empty() || bundle.json.is_empty() {
        return Err(Error::MissingInput(
            "Video files or JSON data not provided".to_string(),
        ));
    }

    if bundle.json.len() != bundle.videos.len() {
        return Err(Error::GroupCountMismatch {
            group: "JSON",
            expected: bundle.videos.len(),
            actual: bundle.json.len(),
        });
    }

    if !bundle.images.is_empty() && bundle.images.len() != bundle.videos.len() {
        return Err(Error::GroupCountMismatch {
            group: "image",
            expected: bundle.videos.len(),
            actual: bundle.images.len(),
        });
    }

    Ok(())
}

/// Decode a telemetry payload into a source after normalizing its timestamps
pub fn decode_source(raw: &[u8]) -> Result<Source> {
    let value: serde_json::Value = serde_json::from_slice(raw)?;
    if !value.is_object() {
        return Err(Error::Validation(
            "Telemetry payload must be a JSON object".to_string(),
        ));
    }

    let source: Source = serde_json::from_value(normalize(value))?;

    if source.id.is_empty() {
        return Err(Error::Validation("Source id must not be empty".to_string()));
    }
    for event in &source.events {
        Event::validate_interval(event.start_time, event.end_time)?;
    }

    Ok(source)
}
