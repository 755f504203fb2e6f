use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::models::{AccelerometerData, Event, LocationData, NewEvent, RiskData, Source};
use crate::query::{EventFilter, EventQuery};
use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Persistence operations the pipeline needs from the store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Insert a source and its nested collections in one transaction
    async fn create_source(&self, source: &Source) -> Result<()>;

    /// Load one source with its nested collections
    async fn find_source(&self, id: &str) -> Result<Option<Source>>;

    /// Load every source with its nested collections
    async fn list_sources(&self) -> Result<Vec<Source>>;

    async fn source_exists(&self, id: &str) -> Result<bool>;

    async fn insert_event(&self, event: &NewEvent) -> Result<Event>;

    async fn find_event(&self, id: i64) -> Result<Option<Event>>;

    /// Run a composed event search
    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<Event>>;

    /// Connectivity check backing the readiness endpoint
    async fn ping(&self) -> Result<()>;
}

const SOURCE_COLUMNS: &str = "id, device_id, event_id, event_type, serial_number, message, \
     max_prob, organization_id, hidden, start_time, end_time, incident_time, \
     created_at, updated_at, thumbnail_key, video_key";

const EVENT_COLUMNS: &str =
    "id, source_id, start_time, end_time, tag, comment, created_at, updated_at";

/// PostgreSQL-backed store for sources, telemetry and events
pub struct MetadataStore {
    pool: PgPool,
}

impl MetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    async fn insert_nested(tx: &mut Transaction<'_, Postgres>, source: &Source) -> Result<()> {
        for sample in &source.accelerometer {
            sqlx::query(
                r#"
                INSERT INTO accelerometer_data (event_id, recording_time, x, y, z)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&source.id)
            .bind(sample.recording_time)
            .bind(sample.x)
            .bind(sample.y)
            .bind(sample.z)
            .execute(&mut **tx)
            .await?;
        }

        for sample in &source.location {
            sqlx::query(
                r#"
                INSERT INTO location_data (
                    source_id, recording_time, altitude, latitude, longitude,
                    speed_kmh, speed_knots, speed_mph
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(&source.id)
            .bind(sample.recording_time)
            .bind(sample.altitude)
            .bind(sample.latitude)
            .bind(sample.longitude)
            .bind(sample.speed_kmh)
            .bind(sample.speed_knots)
            .bind(sample.speed_mph)
            .execute(&mut **tx)
            .await?;
        }

        for sample in &source.risk {
            sqlx::query(
                r#"
                INSERT INTO risk_data (event_id, recording_time, prob)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(&source.id)
            .bind(sample.recording_time)
            .bind(sample.prob)
            .execute(&mut **tx)
            .await?;
        }

        for event in &source.events {
            sqlx::query(
                r#"
                INSERT INTO events (source_id, start_time, end_time, tag, comment, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
                "#,
            )
            .bind(&source.id)
            .bind(event.start_time)
            .bind(event.end_time)
            .bind(event.tag.as_str())
            .bind(&event.comment)
            .execute(&mut **tx)
            .await?;
        }

        Ok(())
    }

    /// Attach nested collections to already loaded sources
    async fn load_nested(&self, sources: &mut [Source]) -> Result<()> {
        if sources.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = sources.iter().map(|s| s.id.clone()).collect();

        let accelerometer = sqlx::query_as::<_, AccelerometerData>(
            r#"
            SELECT id, event_id, recording_time, x, y, z
            FROM accelerometer_data
            WHERE event_id = ANY($1)
            ORDER BY recording_time ASC, id ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let location = sqlx::query_as::<_, LocationData>(
            r#"
            SELECT id, source_id, recording_time, altitude, latitude, longitude,
                   speed_kmh, speed_knots, speed_mph
            FROM location_data
            WHERE source_id = ANY($1)
            ORDER BY recording_time ASC, id ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let risk = sqlx::query_as::<_, RiskData>(
            r#"
            SELECT id, event_id, recording_time, prob
            FROM risk_data
            WHERE event_id = ANY($1)
            ORDER BY recording_time ASC, id ASC
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let events = sqlx::query_as::<_, Event>(&format!(
            "SELECT {} FROM events WHERE source_id = ANY($1) ORDER BY start_time ASC, id ASC",
            EVENT_COLUMNS
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut accelerometer = group_by(accelerometer, |row| row.event_id.clone());
        let mut location = group_by(location, |row| row.source_id.clone());
        let mut risk = group_by(risk, |row| row.event_id.clone());
        let mut events = group_by(events, |row| row.source_id.clone());

        for source in sources.iter_mut() {
            source.accelerometer = accelerometer.remove(&source.id).unwrap_or_default();
            source.location = location.remove(&source.id).unwrap_or_default();
            source.risk = risk.remove(&source.id).unwrap_or_default();
            source.events = events.remove(&source.id).unwrap_or_default();
        }

        Ok(())
    }
}

fn group_by<T>(rows: Vec<T>, key: impl Fn(&T) -> String) -> HashMap<String, Vec<T>> {
    let mut grouped: HashMap<String, Vec<T>> = HashMap::new();
    for row in rows {
        grouped.entry(key(&row)).or_default().push(row);
    }
    grouped
}

#[async_trait]
impl SourceRepository for MetadataStore {
    #[instrument(skip(self, source), fields(source_id = %source.id))]
    async fn create_source(&self, source: &Source) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sources (
                id, device_id, event_id, event_type, serial_number,
                message, max_prob, organization_id, hidden, start_time,
                end_time, incident_time, thumbnail_key, video_key,
                created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5,
                $6, $7, $8, $9, $10,
                $11, $12, $13, $14,
                NOW(), NOW()
            )
            "#,
        )
        .bind(&source.id)
        .bind(&source.device_id)
        .bind(&source.event_id)
        .bind(&source.event_type)
        .bind(&source.serial_number)
        .bind(&source.message)
        .bind(source.max_prob)
        .bind(&source.organization_id)
        .bind(source.hidden)
        .bind(source.start_time)
        .bind(source.end_time)
        .bind(source.incident_time)
        .bind(&source.thumbnail_key)
        .bind(&source.video_key)
        .execute(&mut *tx)
        .await?;

        Self::insert_nested(&mut tx, source).await?;

        tx.commit().await?;

        debug!(
            accelerometer = source.accelerometer.len(),
            location = source.location.len(),
            risk = source.risk.len(),
            events = source.events.len(),
            "Source stored"
        );

        Ok(())
    }

    async fn find_source(&self, id: &str) -> Result<Option<Source>> {
        let source = sqlx::query_as::<_, Source>(&format!(
            "SELECT {} FROM sources WHERE id = $1",
            SOURCE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match source {
            Some(source) => {
                let mut sources = [source];
                self.load_nested(&mut sources).await?;
                let [source] = sources;
                Ok(Some(source))
            }
            None => Ok(None),
        }
    }

    async fn list_sources(&self) -> Result<Vec<Source>> {
        let mut sources = sqlx::query_as::<_, Source>(&format!(
            "SELECT {} FROM sources ORDER BY created_at ASC, id ASC",
            SOURCE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        self.load_nested(&mut sources).await?;

        Ok(sources)
    }

    async fn source_exists(&self, id: &str) -> Result<bool> {
        let exists: (bool,) = sqlx::query_as("SELECT EXISTS (SELECT 1 FROM sources WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(exists.0)
    }

    #[instrument(skip(self, event), fields(source_id = %event.source_id))]
    async fn insert_event(&self, event: &NewEvent) -> Result<Event> {
        let created = sqlx::query_as::<_, Event>(&format!(
            r#"
            INSERT INTO events (source_id, start_time, end_time, tag, comment, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(&event.source_id)
        .bind(event.start_time)
        .bind(event.end_time)
        .bind(event.tag.as_str())
        .bind(&event.comment)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn find_event(&self, id: i64) -> Result<Option<Event>> {
        let event = sqlx::query_as::<_, Event>(&format!(
            "SELECT {} FROM events WHERE id = $1",
            EVENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(event)
    }

    #[instrument(skip(self))]
    async fn query_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let (sql, bindings) = EventQuery::from_filter(filter).to_sql();

        let mut query_builder = sqlx::query_as::<_, Event>(&sql);
        for value in bindings {
            query_builder = query_builder.bind(value);
        }

        let events = query_builder.fetch_all(&self.pool).await?;

        debug!(count = events.len(), "Event query completed");

        Ok(events)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
