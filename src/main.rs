use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, FixedOffset, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use place_trends::db;
use place_trends::generator::ReportGenerator;
use place_trends::models::{Period, WindowSpec};
use place_trends::scheduler::{self, SchedulerConfig, SnapshotScheduler};
use place_trends::service::TrendService;
use place_trends::store::{EventStore, PgEventStore, PgReportStore, ReportStore};

#[derive(Parser)]
#[command(name = "place-trends")]
#[command(about = "Trend analytics and periodic report snapshots for place ratings", long_about = None)]
struct Cli {
    /// Fixed UTC offset in hours for calendar boundaries and fire instants
    #[arg(long, default_value_t = -4, global = true)]
    utc_offset_hours: i32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load realistic seed data
    Seed,
    /// Import rating events from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Today / this-week / this-month counters
    Overview,
    /// Most active places of the current week
    TopWeek {
        #[arg(long)]
        category: Option<String>,
    },
    /// Best rated places of all time (minimum 3 ratings)
    Best {
        #[arg(long)]
        category: Option<String>,
    },
    /// Per-category statistics
    Categories,
    /// Dense 30-day rating series
    Series {
        #[arg(long)]
        category: Option<String>,
    },
    /// Score distribution across the five fixed buckets
    Histogram {
        #[arg(long)]
        category: Option<String>,
    },
    /// Category with the most events in the trailing week
    Trending,
    /// Aggregate summary for an arbitrary time window
    Summary {
        /// Window start, RFC 3339 (inclusive)
        #[arg(long)]
        from: DateTime<Utc>,
        /// Window end, RFC 3339 (exclusive)
        #[arg(long)]
        to: DateTime<Utc>,
        #[arg(long)]
        category: Option<String>,
    },
    /// Most recent report snapshots for a user
    Reports {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        period: String,
    },
    /// Generate one report snapshot now
    Generate {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        period: String,
    },
    /// Run the snapshot scheduler until interrupted
    Schedule {
        #[arg(long, default_value = scheduler::DEFAULT_WEEK_CRON)]
        week_cron: String,
        #[arg(long, default_value = scheduler::DEFAULT_WEEKEND_CRON)]
        weekend_cron: String,
        #[arg(long, default_value_t = 7)]
        week_days: i64,
        #[arg(long, default_value_t = 3)]
        weekend_days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let tz = FixedOffset::east_opt(cli.utc_offset_hours * 3600)
        .context("utc offset must be within -23..=23 hours")?;

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set to a Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    let events: Arc<dyn EventStore> = Arc::new(PgEventStore::new(pool.clone()));
    let reports: Arc<dyn ReportStore> = Arc::new(PgReportStore::new(pool.clone()));
    let service = TrendService::new(Arc::clone(&events), Arc::clone(&reports), tz);

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &csv).await?;
            println!("Inserted {inserted} rating events from {}.", csv.display());
        }
        Commands::Overview => {
            let overview = service.overview(Utc::now()).await?;
            println!("Ratings today:      {}", overview.today_count);
            println!("Ratings this week:  {}", overview.week_count);
            println!("Ratings this month: {}", overview.month_count);
            println!("Total ratings:      {}", overview.total_events);
            println!("Total places:       {}", overview.total_places);
        }
        Commands::TopWeek { category } => {
            let ranked = service.top_of_week(category, Utc::now()).await?;
            if ranked.is_empty() {
                println!("No ratings this week.");
            }
            for (i, place) in ranked.iter().enumerate() {
                println!(
                    "{}. {} ({}) {} ratings, mean {:.2}",
                    i + 1,
                    place.name,
                    place.category,
                    place.event_count,
                    place.mean_score.unwrap_or(0.0)
                );
            }
        }
        Commands::Best { category } => {
            let ranked = service.best_all_time(category, Utc::now()).await?;
            if ranked.is_empty() {
                println!("No places with enough ratings yet.");
            }
            for (i, place) in ranked.iter().enumerate() {
                println!(
                    "{}. {} ({}) mean {:.2} over {} ratings",
                    i + 1,
                    place.name,
                    place.category,
                    place.mean_score.unwrap_or(0.0),
                    place.event_count
                );
            }
        }
        Commands::Categories => {
            for row in service.category_stats(Utc::now()).await? {
                match row.mean_score {
                    Some(mean) => println!(
                        "{}: {} places, {} ratings, mean {:.2}, {} raters",
                        row.category, row.place_count, row.event_count, mean, row.unique_users
                    ),
                    None => println!(
                        "{}: {} places, no ratings yet",
                        row.category, row.place_count
                    ),
                }
            }
        }
        Commands::Series { category } => {
            for bucket in service.series_30_days(category, Utc::now()).await? {
                println!(
                    "{}  {:3} ratings  mean {:.2}",
                    bucket.date, bucket.event_count, bucket.mean_score
                );
            }
        }
        Commands::Histogram { category } => {
            for bucket in service.histogram(category, Utc::now()).await? {
                println!("{:>5}: {}", bucket.label, bucket.count);
            }
        }
        Commands::Trending => match service.trending_category(Utc::now()).await? {
            Some(trending) => println!(
                "{} with {} ratings in the last 7 days",
                trending.category, trending.event_count
            ),
            None => println!("No ratings in the last 7 days."),
        },
        Commands::Summary { from, to, category } => {
            let window = WindowSpec::new(from, to, category)?;
            let summary = service.summary(&window).await?;
            println!("Total ratings: {}", summary.total_count);
            for (category, breakdown) in &summary.category_breakdown {
                println!(
                    "{}: {} places, {} ratings, mean {:.2}, {} raters",
                    category,
                    breakdown.place_count,
                    breakdown.event_count,
                    breakdown.mean_score.unwrap_or(0.0),
                    breakdown.unique_users
                );
            }
            for bucket in &summary.histogram {
                println!("{:>5}: {}", bucket.label, bucket.count);
            }
        }
        Commands::Reports { user, period } => {
            let period: Period = period.parse()?;
            let recent = service.reports_by_user_and_period(user, period).await?;
            if recent.is_empty() {
                println!("No {period} reports for this user yet.");
            }
            for report in recent {
                println!(
                    "{}  [{} .. {})  {}",
                    report.created_at, report.range_start, report.range_end, report.payload
                );
            }
        }
        Commands::Generate { user, period } => {
            let period: Period = period.parse()?;
            let generator = ReportGenerator::new(events, reports);
            let outcome = generator.generate(user, period, Utc::now()).await?;
            if outcome.created {
                println!("Report {} created.", outcome.report.id);
            } else {
                println!(
                    "Report for this window already existed ({}).",
                    outcome.report.id
                );
            }
        }
        Commands::Schedule {
            week_cron,
            weekend_cron,
            week_days,
            weekend_days,
        } => {
            let config = SchedulerConfig {
                week_cron,
                weekend_cron,
                utc_offset: tz,
                week_window_days: week_days,
                weekend_window_days: weekend_days,
            };
            let mut snapshot_scheduler = SnapshotScheduler::new(config, events, reports).await?;
            snapshot_scheduler.start().await?;
            println!("Scheduler running, press ctrl-c to stop.");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            snapshot_scheduler.shutdown().await?;
            println!(
                "Stopped. {} generation failures since start.",
                snapshot_scheduler.failure_count()
            );
        }
    }

    Ok(())
}
