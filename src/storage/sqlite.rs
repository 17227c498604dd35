//! SQLite storage backend implementation
//!
//! This module provides a SQLite-based implementation of the `StorageBackend` trait.
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Health-check writes don't block dashboard reads
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! Timestamps are stored as Unix milliseconds. Tags and alert metadata are
//! stored as JSON text.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use tracing::{debug, info, instrument};

use super::backend::{QueryRange, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{
    AlertQuery, DeviceUpdate, HealthUpdate, MetricsSummary, NewAlert, NewDevice, NewMetricSample,
};
use crate::config::DashboardConfig;
use crate::{
    Alert, AlertSeverity, AlertType, Device, DeviceStatus, MapPosition, MetricSample,
};

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
}

impl SqliteBackend {
    /// Create a new SQLite backend
    ///
    /// This will:
    /// 1. Create the database file if it doesn't exist
    /// 2. Run migrations to create tables
    /// 3. Configure SQLite (WAL mode, foreign keys)
    ///
    /// ## Example
    ///
    /// ```no_run
    /// # use lanwatch::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./lanwatch.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::MigrationFailed(e.to_string()))?;

        info!("database migrations complete");

        Ok(Self { pool })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
    }

    fn row_to_device(row: &SqliteRow) -> StorageResult<Device> {
        let ip: String = row.try_get("ip")?;
        let ip: IpAddr = ip
            .parse()
            .map_err(|_| StorageError::SerializationError(format!("invalid device ip '{ip}'")))?;

        let status: String = row.try_get("status")?;
        let status = DeviceStatus::from_code(&status).ok_or_else(|| {
            StorageError::SerializationError(format!("unknown device status '{status}'"))
        })?;

        let tags: String = row.try_get("tags")?;
        let tags: BTreeSet<String> = serde_json::from_str(&tags)?;

        let map_position = match (
            row.try_get::<Option<f64>, _>("map_position_x")?,
            row.try_get::<Option<f64>, _>("map_position_y")?,
        ) {
            (Some(x), Some(y)) => Some(MapPosition {
                x,
                y,
                region: row.try_get("map_region")?,
            }),
            _ => None,
        };

        Ok(Device {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            ip,
            mac: row.try_get("mac")?,
            hostname: row.try_get("hostname")?,
            status,
            latency: row.try_get("latency")?,
            packet_loss: row.try_get("packet_loss")?,
            heart_count: row.try_get::<i64, _>("heart_count")?.clamp(0, 10) as u8,
            consecutive_failures: row.try_get::<i64, _>("consecutive_failures")?.max(0) as u32,
            last_seen: row
                .try_get::<Option<i64>, _>("last_seen")?
                .map(Self::millis_to_timestamp),
            first_discovered: Self::millis_to_timestamp(row.try_get("first_discovered")?),
            map_position,
            tags,
            is_manual: row.try_get("is_manual")?,
        })
    }

    fn row_to_alert(row: &SqliteRow) -> StorageResult<Alert> {
        let alert_type: String = row.try_get("type")?;
        let alert_type = AlertType::from_code(&alert_type).ok_or_else(|| {
            StorageError::SerializationError(format!("unknown alert type '{alert_type}'"))
        })?;

        let severity: String = row.try_get("severity")?;
        let severity = AlertSeverity::from_code(&severity).ok_or_else(|| {
            StorageError::SerializationError(format!("unknown alert severity '{severity}'"))
        })?;

        let metadata: String = row.try_get("metadata")?;

        Ok(Alert {
            id: row.try_get("id")?,
            device_id: row.try_get("device_id")?,
            alert_type,
            severity,
            message: row.try_get("message")?,
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?),
            acknowledged: row.try_get("acknowledged")?,
            acknowledged_at: row
                .try_get::<Option<i64>, _>("acknowledged_at")?
                .map(Self::millis_to_timestamp),
            metadata: serde_json::from_str(&metadata)?,
        })
    }

    fn row_to_sample(row: &SqliteRow) -> StorageResult<MetricSample> {
        Ok(MetricSample {
            id: row.try_get("id")?,
            device_id: row.try_get("device_id")?,
            timestamp: Self::millis_to_timestamp(row.try_get("timestamp")?),
            latency: row.try_get("latency")?,
            packet_loss: row.try_get("packet_loss")?,
            ping_success_count: row.try_get::<i64, _>("ping_success_count")?.max(0) as u32,
            ping_total_count: row.try_get::<i64, _>("ping_total_count")?.max(0) as u32,
        })
    }

    async fn insert_sample<'e, E>(executor: E, sample: &MetricSample) -> StorageResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO metrics (
                id, device_id, timestamp, latency, packet_loss,
                ping_success_count, ping_total_count
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&sample.id)
        .bind(&sample.device_id)
        .bind(Self::timestamp_to_millis(&sample.timestamp))
        .bind(sample.latency)
        .bind(sample.packet_loss)
        .bind(sample.ping_success_count as i64)
        .bind(sample.ping_total_count as i64)
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self))]
    async fn find_all_devices(&self, status: Option<DeviceStatus>) -> StorageResult<Vec<Device>> {
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM devices WHERE status = ? ORDER BY name")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM devices ORDER BY name")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(Self::row_to_device).collect()
    }

    async fn find_device_by_id(&self, id: &str) -> StorageResult<Option<Device>> {
        sqlx::query("SELECT * FROM devices WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(Self::row_to_device)
            .transpose()
    }

    async fn find_device_by_ip(&self, ip: IpAddr) -> StorageResult<Option<Device>> {
        sqlx::query("SELECT * FROM devices WHERE ip = ?")
            .bind(ip.to_string())
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(Self::row_to_device)
            .transpose()
    }

    #[instrument(skip(self, device), fields(ip = %device.ip))]
    async fn create_device(&self, device: NewDevice) -> StorageResult<Device> {
        let now = Utc::now();
        let device = device.into_device(now);
        let tags = serde_json::to_string(&device.tags)?;

        sqlx::query(
            r#"
            INSERT INTO devices (
                id, name, ip, mac, hostname, status, heart_count, consecutive_failures,
                first_discovered, map_position_x, map_position_y, map_region,
                tags, is_manual, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&device.id)
        .bind(&device.name)
        .bind(device.ip.to_string())
        .bind(&device.mac)
        .bind(&device.hostname)
        .bind(device.status.as_str())
        .bind(device.heart_count as i64)
        .bind(device.consecutive_failures as i64)
        .bind(Self::timestamp_to_millis(&device.first_discovered))
        .bind(device.map_position.as_ref().map(|position| position.x))
        .bind(device.map_position.as_ref().map(|position| position.y))
        .bind(device.map_position.as_ref().and_then(|position| position.region.clone()))
        .bind(tags)
        .bind(device.is_manual)
        .bind(Self::timestamp_to_millis(&now))
        .execute(&self.pool)
        .await
        .map_err(|e| match StorageError::from(e) {
            StorageError::Conflict(_) => {
                StorageError::Conflict(format!("a device with ip {} already exists", device.ip))
            }
            other => other,
        })?;

        debug!("created device {}", device.id);
        Ok(device)
    }

    async fn update_device(&self, id: &str, update: DeviceUpdate) -> StorageResult<Device> {
        let mut device = self
            .find_device_by_id(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("device {id}")))?;

        if update.is_empty() {
            return Ok(device);
        }
        update.apply(&mut device);

        sqlx::query(
            r#"
            UPDATE devices SET
                name = ?, map_position_x = ?, map_position_y = ?, map_region = ?,
                tags = ?, is_manual = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&device.name)
        .bind(device.map_position.as_ref().map(|position| position.x))
        .bind(device.map_position.as_ref().map(|position| position.y))
        .bind(device.map_position.as_ref().and_then(|position| position.region.clone()))
        .bind(serde_json::to_string(&device.tags)?)
        .bind(device.is_manual)
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(device)
    }

    async fn update_device_health(&self, id: &str, update: HealthUpdate) -> StorageResult<()> {
        let now = Self::timestamp_to_millis(&Utc::now());

        let result = sqlx::query(
            r#"
            UPDATE devices SET
                status = ?, latency = ?, packet_loss = ?, heart_count = ?,
                consecutive_failures = ?,
                last_seen = CASE WHEN ? THEN ? ELSE last_seen END,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(update.status.as_str())
        .bind(update.latency)
        .bind(update.packet_loss)
        .bind(update.heart_count as i64)
        .bind(update.consecutive_failures as i64)
        .bind(update.was_seen())
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("device {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_device(&self, id: &str) -> StorageResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM metrics WHERE device_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE alerts SET device_id = NULL WHERE device_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM devices WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_consecutive_failures(&self, id: &str) -> StorageResult<u32> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT consecutive_failures FROM devices WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map_or(0, |(failures,)| failures.max(0) as u32))
    }

    #[instrument(skip(self, alert), fields(alert_type = %alert.alert_type))]
    async fn create_alert(&self, alert: NewAlert) -> StorageResult<Alert> {
        let alert = alert.into_alert(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO alerts (id, device_id, type, severity, message, timestamp, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.id)
        .bind(&alert.device_id)
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(Self::timestamp_to_millis(&alert.timestamp))
        .bind(serde_json::to_string(&alert.metadata)?)
        .execute(&self.pool)
        .await?;

        Ok(alert)
    }

    async fn find_alerts(&self, query: AlertQuery) -> StorageResult<Vec<Alert>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM alerts WHERE 1 = 1");
        if let Some(severity) = query.severity {
            builder.push(" AND severity = ").push_bind(severity.as_str());
        }
        if let Some(acknowledged) = query.acknowledged {
            builder.push(" AND acknowledged = ").push_bind(acknowledged);
        }
        builder.push(" ORDER BY timestamp DESC, rowid DESC");

        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded
        if query.limit.is_some() || query.offset.is_some() {
            let limit = query.limit.map_or(-1, |limit| limit as i64);
            builder.push(" LIMIT ").push_bind(limit);
            builder
                .push(" OFFSET ")
                .push_bind(query.offset.unwrap_or(0) as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_alert).collect()
    }

    async fn acknowledge_alert(&self, id: &str) -> StorageResult<Alert> {
        sqlx::query(
            r#"
            UPDATE alerts SET
                acknowledged = 1,
                acknowledged_at = COALESCE(acknowledged_at, ?)
            WHERE id = ?
            "#,
        )
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT * FROM alerts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("alert {id}")))?;
        Self::row_to_alert(&row)
    }

    async fn acknowledge_all_alerts(&self) -> StorageResult<usize> {
        let result = sqlx::query(
            "UPDATE alerts SET acknowledged = 1, acknowledged_at = ? WHERE acknowledged = 0",
        )
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn unacknowledged_alert_count(&self) -> StorageResult<usize> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM alerts WHERE acknowledged = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn create_metric_sample(&self, sample: NewMetricSample) -> StorageResult<MetricSample> {
        let sample = sample.into_sample();
        Self::insert_sample(&self.pool, &sample).await?;
        Ok(sample)
    }

    #[instrument(skip(self, samples), fields(count = samples.len()))]
    async fn create_metric_sample_batch(
        &self,
        samples: Vec<NewMetricSample>,
    ) -> StorageResult<Vec<MetricSample>> {
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        let samples: Vec<MetricSample> = samples.into_iter().map(NewMetricSample::into_sample).collect();

        let mut tx = self.pool.begin().await?;
        for sample in &samples {
            Self::insert_sample(&mut *tx, sample).await?;
        }
        tx.commit().await?;

        debug!("batch insert complete");
        Ok(samples)
    }

    #[instrument(skip(self), fields(device_id = %query.device_id))]
    async fn query_metrics(&self, query: QueryRange) -> StorageResult<Vec<MetricSample>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM metrics
            WHERE device_id = ? AND timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC
            LIMIT ?
            "#,
        )
        .bind(&query.device_id)
        .bind(Self::timestamp_to_millis(&query.start))
        .bind(Self::timestamp_to_millis(&query.end))
        .bind(query.limit.map_or(-1, |limit| limit as i64))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_sample).collect()
    }

    async fn latest_metric(&self, device_id: &str) -> StorageResult<Option<MetricSample>> {
        sqlx::query("SELECT * FROM metrics WHERE device_id = ? ORDER BY timestamp DESC LIMIT 1")
            .bind(device_id)
            .fetch_optional(&self.pool)
            .await?
            .as_ref()
            .map(Self::row_to_sample)
            .transpose()
    }

    async fn metrics_summary(&self, since: DateTime<Utc>) -> StorageResult<MetricsSummary> {
        let (total_devices, avg_latency, avg_packet_loss): (i64, Option<f64>, Option<f64>) =
            sqlx::query_as(
                r#"
                SELECT COUNT(DISTINCT device_id), AVG(latency), AVG(packet_loss)
                FROM metrics
                WHERE timestamp > ?
                "#,
            )
            .bind(Self::timestamp_to_millis(&since))
            .fetch_one(&self.pool)
            .await?;

        Ok(MetricsSummary {
            total_devices: total_devices as usize,
            avg_latency,
            avg_packet_loss: avg_packet_loss.unwrap_or(0.0),
        })
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn purge_metrics_older_than(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM metrics WHERE timestamp < ?")
            .bind(Self::timestamp_to_millis(&before))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        debug!("deleted {} old samples", deleted);
        Ok(deleted)
    }

    async fn get_config(&self) -> StorageResult<DashboardConfig> {
        let row: Option<(String,)> = sqlx::query_as("SELECT data FROM config WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some((data,)) => Ok(serde_json::from_str(&data)?),
            None => Ok(DashboardConfig::default()),
        }
    }

    async fn save_config(&self, config: &DashboardConfig) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO config (id, data) VALUES (1, ?)
            ON CONFLICT (id) DO UPDATE SET data = excluded.data
            "#,
        )
        .bind(serde_json::to_string(config)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
