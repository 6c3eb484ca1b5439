// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use songprint_application::{FingerprintIndex, FingerprintStore};
use songprint_domain::{IndexedFingerprint, Song, SongId};
use songprint_fingerprint::Fingerprint;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;
use uuid::Uuid;

/// Rows per multi-row INSERT; three binds each stays under SQLite's variable limit.
const INSERT_BATCH: usize = 300;

/// SQLx-backed fingerprint index
#[derive(Clone)]
pub struct SqliteFingerprintIndex {
    pool: SqlitePool,
}

impl SqliteFingerprintIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn list_songs(&self) -> Result<Vec<Song>> {
        debug!(target: "repository", "listing songs");
        let rows = sqlx::query("SELECT id, title, created_at FROM songs ORDER BY title")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_song).collect()
    }

    pub async fn fingerprint_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM fingerprints")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }
}

#[async_trait::async_trait]
impl FingerprintIndex for SqliteFingerprintIndex {
    async fn lookup(&self, hashes: &[u64]) -> Result<Vec<IndexedFingerprint>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT hash, song_id, offset_time FROM fingerprints WHERE hash IN (");
        let mut separated = query.separated(", ");
        for hash in hashes {
            separated.push_bind(hash_to_sql(*hash));
        }
        separated.push_unseparated(")");

        let rows = query.build().fetch_all(&self.pool).await?;
        debug!(target: "repository", hashes = hashes.len(), records = rows.len(), "fingerprint lookup");

        rows.iter().map(row_to_record).collect()
    }

    async fn song_title(&self, song_id: SongId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT title FROM songs WHERE id = ? LIMIT 1")
            .bind(song_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get::<String, _>("title").map_err(anyhow::Error::from))
            .transpose()
    }
}

#[async_trait::async_trait]
impl FingerprintStore for SqliteFingerprintIndex {
    async fn store_song(&self, song: &Song, fingerprints: &[Fingerprint]) -> Result<()> {
        debug!(
            target: "repository",
            song_id = %song.id,
            fingerprints = fingerprints.len(),
            "storing song"
        );

        // Dropping the transaction without commit rolls it back.
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO songs (id, title, created_at) VALUES (?, ?, ?)")
            .bind(song.id.to_string())
            .bind(song.title.clone())
            .bind(song.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;

        let song_id = song.id.to_string();
        for batch in fingerprints.chunks(INSERT_BATCH) {
            let mut insert: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO fingerprints (hash, song_id, offset_time) ");
            insert.push_values(batch, |mut row, fp| {
                row.push_bind(hash_to_sql(fp.hash))
                    .push_bind(song_id.clone())
                    .push_bind(fp.anchor_time);
            });
            insert.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

/// Hashes are below 2^63, so the signed column holds them unchanged.
fn hash_to_sql(hash: u64) -> i64 {
    hash as i64
}

fn hash_from_sql(value: i64) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("negative fingerprint hash in index: {}", value))
}

fn parse_song_id(s: &str) -> Result<SongId> {
    Ok(SongId::from_uuid(Uuid::parse_str(s)?))
}

fn parse_dt(s: String) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Ok(dt.with_timezone(&Utc));
    }
    // SQLite CURRENT_TIMESTAMP format
    let ndt = NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> Result<IndexedFingerprint> {
    let hash: i64 = row.try_get("hash")?;
    let song_id: String = row.try_get("song_id")?;
    let offset_time: f64 = row.try_get("offset_time")?;

    Ok(IndexedFingerprint {
        hash: hash_from_sql(hash)?,
        song_id: parse_song_id(&song_id)?,
        offset_time,
    })
}

fn row_to_song(row: &sqlx::sqlite::SqliteRow) -> Result<Song> {
    let id: String = row.try_get("id")?;
    let title: String = row.try_get("title")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(Song {
        id: parse_song_id(&id)?,
        title,
        created_at: parse_dt(created_at)?,
    })
}
