use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::db::models::{CategoryCountRow, RatingSummary, TemplateRow, UsageEvent};
use crate::scenes::template::{SceneTemplate, TemplateApplier};
use crate::tags::DatabaseTagSet;

const USAGE_QUEUE_CAPACITY: usize = 1000;
const TEMPLATE_COLUMNS: &str = "id, name, description, category, base_prompt, suggested_tags_json, \
     recommended_model, aspect_ratio, steps, usage_count, rating_avg, rating_count, is_public, created_at";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    sender: mpsc::Sender<UsageEvent>,
    pending_usage: Arc<AtomicUsize>,
}

impl Database {
    pub async fn init(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS scene_templates (\
                id TEXT PRIMARY KEY,\
                name TEXT NOT NULL,\
                description TEXT NOT NULL DEFAULT '',\
                category TEXT NOT NULL DEFAULT '',\
                base_prompt TEXT NOT NULL DEFAULT '',\
                suggested_tags_json TEXT NOT NULL DEFAULT '{}',\
                recommended_model TEXT,\
                aspect_ratio TEXT,\
                steps INTEGER,\
                usage_count INTEGER NOT NULL DEFAULT 0,\
                rating_avg REAL NOT NULL DEFAULT 0,\
                rating_count INTEGER NOT NULL DEFAULT 0,\
                is_public INTEGER NOT NULL DEFAULT 1,\
                created_at TEXT NOT NULL\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS template_usage (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                template_id TEXT NOT NULL,\
                user_id TEXT,\
                action TEXT NOT NULL,\
                prompt TEXT NOT NULL,\
                used_at TEXT NOT NULL\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS template_ratings (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                template_id TEXT NOT NULL,\
                user_id TEXT,\
                rating INTEGER NOT NULL,\
                created_at TEXT NOT NULL\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_scene_templates_category ON scene_templates(category);",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_template_usage_template_id ON template_usage(template_id);",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_template_ratings_template_id ON template_ratings(template_id);",
        )
        .execute(&pool)
        .await?;

        info!("Database tables created successfully");

        let (sender, receiver) = mpsc::channel(USAGE_QUEUE_CAPACITY);
        let pending_usage = Arc::new(AtomicUsize::new(0));
        let writer_pool = pool.clone();
        let writer_pending = pending_usage.clone();
        tokio::spawn(async move {
            usage_writer(writer_pool, receiver, writer_pending).await;
        });

        info!("Usage writer task started");

        Ok(Database {
            pool,
            sender,
            pending_usage,
        })
    }

    pub fn queue_usage_event(&self, event: UsageEvent) -> Result<()> {
        self.pending_usage.fetch_add(1, Ordering::SeqCst);
        self.sender.try_send(event).map_err(|err| {
            self.pending_usage.fetch_sub(1, Ordering::SeqCst);
            anyhow!("Failed to queue usage event: {err}")
        })
    }

    pub fn pending_usage_events(&self) -> usize {
        self.pending_usage.load(Ordering::SeqCst)
    }

    pub async fn flush_usage_events(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        while self.pending_usage_events() > 0 {
            if started.elapsed() >= timeout {
                warn!(
                    "Timed out waiting for {} usage event(s) to be written",
                    self.pending_usage_events()
                );
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn upsert_template(&self, template: &SceneTemplate) -> Result<()> {
        let suggested_tags_json = serde_json::to_string(&template.suggested_tags)?;
        let created_at = template.created_at.unwrap_or_else(Utc::now);
        sqlx::query(
            "INSERT INTO scene_templates \
             (id, name, description, category, base_prompt, suggested_tags_json, recommended_model, \
              aspect_ratio, steps, usage_count, rating_avg, rating_count, is_public, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
             name = excluded.name, \
             description = excluded.description, \
             category = excluded.category, \
             base_prompt = excluded.base_prompt, \
             suggested_tags_json = excluded.suggested_tags_json, \
             recommended_model = excluded.recommended_model, \
             aspect_ratio = excluded.aspect_ratio, \
             steps = excluded.steps, \
             is_public = excluded.is_public",
        )
        .bind(&template.id)
        .bind(&template.name)
        .bind(&template.description)
        .bind(&template.category)
        .bind(&template.base_prompt)
        .bind(suggested_tags_json)
        .bind(&template.recommended_model)
        .bind(&template.aspect_ratio)
        .bind(template.steps.map(i64::from))
        .bind(template.usage_count)
        .bind(template.rating_avg)
        .bind(template.rating_count)
        .bind(template.is_public)
        .bind(created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_template(&self, id: &str) -> Result<Option<SceneTemplate>> {
        let query = format!("SELECT {TEMPLATE_COLUMNS} FROM scene_templates WHERE id = ?");
        let row = sqlx::query_as::<_, TemplateRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(template_from_row))
    }

    pub async fn search_templates(&self, query_text: &str, limit: i64) -> Result<Vec<SceneTemplate>> {
        let pattern = format!("%{}%", query_text.trim());
        let query = format!(
            "SELECT {TEMPLATE_COLUMNS} FROM scene_templates \
             WHERE is_public = 1 AND (name LIKE ? OR description LIKE ? OR category LIKE ? OR base_prompt LIKE ?) \
             ORDER BY usage_count DESC, rating_avg DESC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, TemplateRow>(&query)
            .bind(&pattern)
            .bind(&pattern)
            .bind(&pattern)
            .bind(&pattern)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(template_from_row).collect())
    }

    pub async fn popular_templates(&self, limit: i64) -> Result<Vec<SceneTemplate>> {
        let query = format!(
            "SELECT {TEMPLATE_COLUMNS} FROM scene_templates WHERE is_public = 1 \
             ORDER BY usage_count DESC, rating_avg DESC, name ASC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, TemplateRow>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(template_from_row).collect())
    }

    pub async fn templates_by_category(&self, category: &str) -> Result<Vec<SceneTemplate>> {
        let query = format!(
            "SELECT {TEMPLATE_COLUMNS} FROM scene_templates WHERE is_public = 1 AND category = ? \
             ORDER BY usage_count DESC, name ASC"
        );
        let rows = sqlx::query_as::<_, TemplateRow>(&query)
            .bind(category)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(template_from_row).collect())
    }

    pub async fn template_category_counts(&self) -> Result<Vec<CategoryCountRow>> {
        let rows = sqlx::query_as::<_, CategoryCountRow>(
            "SELECT category, COUNT(*) AS count FROM scene_templates WHERE is_public = 1 \
             GROUP BY category ORDER BY count DESC, category ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn record_rating(
        &self,
        template_id: &str,
        user_id: Option<&str>,
        rating: i64,
    ) -> Result<RatingSummary> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO template_ratings (template_id, user_id, rating, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(template_id)
        .bind(user_id)
        .bind(rating)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "UPDATE scene_templates \
             SET rating_avg = (rating_avg * rating_count + ?) / (rating_count + 1), \
                 rating_count = rating_count + 1 \
             WHERE id = ?",
        )
        .bind(rating as f64)
        .bind(template_id)
        .execute(&mut *tx)
        .await?;
        let summary = sqlx::query_as::<_, RatingSummary>(
            "SELECT id AS template_id, rating_avg, rating_count FROM scene_templates WHERE id = ?",
        )
        .bind(template_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(summary)
    }

    #[cfg(test)]
    pub async fn usage_count(&self, template_id: &str) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM template_usage WHERE template_id = ?")
                .bind(template_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }
}

impl TemplateApplier for Database {
    fn record_usage(&self, event: UsageEvent) -> Result<()> {
        self.queue_usage_event(event)
    }
}

fn template_from_row(row: TemplateRow) -> SceneTemplate {
    let suggested_tags = serde_json::from_str::<DatabaseTagSet>(&row.suggested_tags_json)
        .unwrap_or_else(|err| {
            warn!(
                "Template {} has unreadable suggested tags ({}); ignoring them",
                row.id, err
            );
            DatabaseTagSet::new()
        });
    SceneTemplate {
        id: row.id,
        name: row.name,
        description: row.description,
        category: row.category,
        base_prompt: row.base_prompt,
        suggested_tags,
        recommended_model: row.recommended_model,
        aspect_ratio: row.aspect_ratio,
        steps: row.steps.and_then(|steps| u32::try_from(steps).ok()),
        usage_count: row.usage_count,
        rating_avg: row.rating_avg,
        rating_count: row.rating_count,
        is_public: row.is_public,
        created_at: Some(row.created_at),
    }
}

async fn usage_writer(
    pool: SqlitePool,
    mut receiver: mpsc::Receiver<UsageEvent>,
    pending: Arc<AtomicUsize>,
) {
    while let Some(event) = receiver.recv().await {
        let result = write_usage_event(&pool, &event).await;
        if let Err(err) = result {
            warn!("Error in usage_writer: {err}");
        } else {
            debug!("Recorded usage of template {}", event.template_id);
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    }

    info!("Usage writer task stopped");
}

async fn write_usage_event(pool: &SqlitePool, event: &UsageEvent) -> Result<()> {
    sqlx::query(
        "INSERT INTO template_usage (template_id, user_id, action, prompt, used_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&event.template_id)
    .bind(&event.user_id)
    .bind(&event.action)
    .bind(&event.prompt)
    .bind(event.used_at)
    .execute(pool)
    .await?;
    sqlx::query("UPDATE scene_templates SET usage_count = usage_count + 1 WHERE id = ?")
        .bind(&event.template_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    pub(crate) fn temp_database_url(name: &str) -> (String, PathBuf) {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let path = std::env::temp_dir().join(format!(
            "image_prompt_studio_{name}_{}_{nanos}.db",
            std::process::id()
        ));
        (format!("sqlite://{}?mode=rwc", path.display()), path)
    }

    pub(crate) fn sample_template(id: &str, category: &str, usage_count: i64) -> SceneTemplate {
        let mut suggested_tags = DatabaseTagSet::new();
        suggested_tags.insert("mood".to_string(), vec!["peaceful".to_string()]);
        SceneTemplate {
            id: id.to_string(),
            name: format!("Template {id}"),
            description: "misty mountain lake at dawn".to_string(),
            category: category.to_string(),
            base_prompt: "a {subject} beside a mountain lake".to_string(),
            suggested_tags,
            recommended_model: Some("black-forest-labs/flux-dev".to_string()),
            aspect_ratio: Some("16:9".to_string()),
            steps: Some(30),
            usage_count,
            rating_avg: 0.0,
            rating_count: 0,
            is_public: true,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn stores_and_reads_templates() {
        let (url, path) = temp_database_url("roundtrip");
        let db = Database::init(&url).await.unwrap();
        let template = sample_template("lake", "landscape", 0);
        db.upsert_template(&template).await.unwrap();

        let loaded = db.get_template("lake").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Template lake");
        assert_eq!(loaded.suggested_tags, template.suggested_tags);
        assert_eq!(loaded.steps, Some(30));
        assert!(db.get_template("missing").await.unwrap().is_none());

        db.close().await;
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn search_and_stats_order_by_usage() {
        let (url, path) = temp_database_url("search");
        let db = Database::init(&url).await.unwrap();
        db.upsert_template(&sample_template("a", "landscape", 1)).await.unwrap();
        db.upsert_template(&sample_template("b", "landscape", 9)).await.unwrap();
        db.upsert_template(&sample_template("c", "portrait", 4)).await.unwrap();

        let found = db.search_templates("mountain", 10).await.unwrap();
        let ids = found.iter().map(|t| t.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["b", "c", "a"]);

        let stats = db.template_category_counts().await.unwrap();
        assert_eq!(
            stats,
            vec![
                CategoryCountRow { category: "landscape".to_string(), count: 2 },
                CategoryCountRow { category: "portrait".to_string(), count: 1 },
            ]
        );

        db.close().await;
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn ratings_update_running_average() {
        let (url, path) = temp_database_url("ratings");
        let db = Database::init(&url).await.unwrap();
        db.upsert_template(&sample_template("r", "portrait", 0)).await.unwrap();

        db.record_rating("r", Some("u1"), 5).await.unwrap();
        let summary = db.record_rating("r", None, 2).await.unwrap();
        assert_eq!(summary.rating_count, 2);
        assert!((summary.rating_avg - 3.5).abs() < 1e-9);

        db.close().await;
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn usage_events_are_written_by_background_task() {
        let (url, path) = temp_database_url("usage");
        let db = Database::init(&url).await.unwrap();
        db.upsert_template(&sample_template("u", "portrait", 0)).await.unwrap();

        for _ in 0..3 {
            db.queue_usage_event(UsageEvent {
                template_id: "u".to_string(),
                user_id: None,
                action: "apply".to_string(),
                prompt: "a fox".to_string(),
                used_at: Utc::now(),
            })
            .unwrap();
        }
        assert!(db.flush_usage_events(Duration::from_secs(5)).await);
        assert_eq!(db.usage_count("u").await.unwrap(), 3);
        let template = db.get_template("u").await.unwrap().unwrap();
        assert_eq!(template.usage_count, 3);

        db.close().await;
        let _ = std::fs::remove_file(path);
    }
}
