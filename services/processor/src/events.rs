//! Event creation and lookup.
//!
//! An event asserts a tagged interval over an existing source's timeline.
//! Every check runs before the store is touched, so a rejected request
//! writes nothing.

use crate::error::{Error, Result};
use crate::metadata_store::SourceRepository;
use crate::models::{Event, EventTag, NewEvent};
use serde::Deserialize;
use tracing::{info, instrument};

/// Body of an event creation request
#[derive(Debug, Clone, Deserialize)]
pub struct CreateEventRequest {
    #[serde(default)]
    pub source_id: String,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub comment: Option<String>,
}

impl CreateEventRequest {
    /// Check the request and turn it into a storable event
    pub fn validate(&self) -> Result<NewEvent> {
        if self.source_id.trim().is_empty() {
            return Err(Error::Validation("source_id is required".to_string()));
        }

        let tag: EventTag = self
            .tag
            .parse()
            .map_err(|e: crate::models::InvalidTag| Error::Validation(e.to_string()))?;

        Event::validate_interval(self.start_time, self.end_time)?;

        Ok(NewEvent {
            source_id: self.source_id.clone(),
            start_time: self.start_time,
            end_time: self.end_time,
            tag,
            comment: self.comment.clone().filter(|c| !c.is_empty()),
        })
    }
}

/// Validate and persist a new event for an existing source
#[instrument(skip(store, request), fields(source_id = %request.source_id))]
pub async fn create_event(
    store: &dyn SourceRepository,
    request: &CreateEventRequest,
) -> Result<Event> {
    let new_event = request.validate()?;

    if !store.source_exists(&new_event.source_id).await? {
        return Err(Error::NotFound("Source".to_string()));
    }

    let event = store.insert_event(&new_event).await?;

    metrics::counter!("processor.events.created", "tag" => event.tag.as_str()).increment(1);
    info!(event_id = event.id, tag = %event.tag, "Event created");

    Ok(event)
}

/// Fetch one event by id
pub async fn get_event(store: &dyn SourceRepository, id: i64) -> Result<Event> {
    store
        .find_event(id)
        .await?
        .ok_or_else(|| Error::NotFound("Event".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_store::MockSourceRepository;
    use chrono::Utc;

    fn request(start_time: f64, end_time: f64, tag: &str) -> CreateEventRequest {
        CreateEventRequest {
            source_id: "src-1".to_string(),
            start_time,
            end_time,
            tag: tag.to_string(),
            comment: Some("lane change".to_string()),
        }
    }

    fn stored(event: &NewEvent) -> Event {
        Event {
            id: 11,
            source_id: event.source_id.clone(),
            start_time: event.start_time,
            end_time: event.end_time,
            tag: event.tag,
            comment: event.comment.clone(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_inverted_interval_writes_nothing() {
        let mut store = MockSourceRepository::new();
        store.expect_source_exists().times(0);
        store.expect_insert_event().times(0);

        let result = create_event(&store, &request(10.0, 5.0, "danger")).await;

        match result {
            Err(Error::Validation(message)) => {
                assert_eq!(message, "EndTime must be after StartTime")
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_tag_rejected() {
        let mut store = MockSourceRepository::new();
        store.expect_source_exists().times(0);
        store.expect_insert_event().times(0);

        let result = create_event(&store, &request(1.0, 2.0, "risky")).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_missing_source_id_rejected() {
        let store = MockSourceRepository::new();
        let mut req = request(1.0, 2.0, "safe");
        req.source_id = String::new();

        assert!(matches!(
            create_event(&store, &req).await,
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_source_not_found() {
        let mut store = MockSourceRepository::new();
        store
            .expect_source_exists()
            .withf(|id: &str| id == "src-1")
            .times(1)
            .returning(|_| Ok(false));
        store.expect_insert_event().times(0);

        let result = create_event(&store, &request(1.0, 2.0, "safe")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_valid_event_is_stored() {
        let mut store = MockSourceRepository::new();
        store.expect_source_exists().times(1).returning(|_| Ok(true));
        store
            .expect_insert_event()
            .withf(|event: &NewEvent| {
                event.tag == EventTag::Danger
                    && event.start_time == 3.0
                    && event.end_time == 3.0
                    && event.comment.as_deref() == Some("lane change")
            })
            .times(1)
            .returning(|event| Ok(stored(event)));

        let event = create_event(&store, &request(3.0, 3.0, "danger"))
            .await
            .unwrap();

        assert_eq!(event.id, 11);
        assert_eq!(event.source_id, "src-1");
    }

    #[tokio::test]
    async fn test_get_event_missing() {
        let mut store = MockSourceRepository::new();
        store.expect_find_event().returning(|_| Ok(None));

        assert!(matches!(get_event(&store, 5).await, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_empty_comment_dropped() {
        let mut req = request(0.0, 1.0, "safe");
        req.comment = Some(String::new());

        assert_eq!(req.validate().unwrap().comment, None);
    }
}
