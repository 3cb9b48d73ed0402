use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let places = vec![
        (
            Uuid::parse_str("6f1b1c8e-5a10-4f2e-9d66-0b6e4c1f0a11")?,
            "Cafe Aurora",
            "cafe",
            "12 Harbor St",
        ),
        (
            Uuid::parse_str("2a9e7d40-83b5-4c41-b0cf-55f1d2c9ae02")?,
            "The Brass Tap",
            "bar",
            "88 Mill Ave",
        ),
        (
            Uuid::parse_str("c4d1a7f3-1e26-4b7a-8d09-9c3f5e2b6d73")?,
            "Riverside Museum",
            "museum",
            "1 Promenade Way",
        ),
    ];

    for (id, name, category, address) in places {
        sqlx::query(
            r#"
            INSERT INTO place_trends.places (id, name, category, address)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET category = EXCLUDED.category, address = EXCLUDED.address
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(category)
        .bind(address)
        .execute(pool)
        .await?;
    }

    let user_a = Uuid::parse_str("8e0f3b52-7c14-4a6d-9f81-2d5c6e7a8b90")?;
    let user_b = Uuid::parse_str("b7a2d914-60e3-4f58-8c27-1e9f0a3b4c5d")?;
    let now = Utc::now();

    let events: Vec<(&str, &str, Uuid, i32, DateTime<Utc>)> = vec![
        ("seed-001", "Cafe Aurora", user_a, 9, now - Duration::days(1)),
        ("seed-002", "Cafe Aurora", user_b, 8, now - Duration::days(2)),
        ("seed-003", "Cafe Aurora", user_a, 7, now - Duration::days(9)),
        ("seed-004", "The Brass Tap", user_b, 10, now - Duration::days(1)),
        ("seed-005", "The Brass Tap", user_a, 6, now - Duration::days(20)),
    ];

    for (source_key, place_name, user_id, score, occurred_at) in events {
        let place_id: Uuid = sqlx::query("SELECT id FROM place_trends.places WHERE name = $1")
            .bind(place_name)
            .fetch_one(pool)
            .await?
            .get("id");

        sqlx::query(
            r#"
            INSERT INTO place_trends.rating_events
            (id, user_id, place_id, score, occurred_at, source_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(place_id)
        .bind(score)
        .bind(occurred_at)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        user_id: Uuid,
        place_name: String,
        category: String,
        address: String,
        score: i32,
        occurred_at: DateTime<Utc>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        if !(0..=10).contains(&row.score) {
            anyhow::bail!(
                "score {} for {} is outside 0..=10",
                row.score,
                row.place_name
            );
        }

        let place_id: Uuid = sqlx::query(
            r#"
            INSERT INTO place_trends.places (id, name, category, address)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET category = EXCLUDED.category, address = EXCLUDED.address
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.place_name)
        .bind(&row.category)
        .bind(&row.address)
        .fetch_one(pool)
        .await?
        .get("id");

        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let result = sqlx::query(
            r#"
            INSERT INTO place_trends.rating_events
            (id, user_id, place_id, score, occurred_at, source_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(row.user_id)
        .bind(place_id)
        .bind(row.score)
        .bind(row.occurred_at)
        .bind(source_key)
        .execute(pool)
        .await?;

        if result.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}
