mod catalog;
mod db;
mod detail;
mod fetch;
mod payload;

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use tracing::info;

use catalog::{Category, CategoryStats};

#[derive(Parser)]
#[command(
    name = "bundle_scraper",
    about = "Sync bundle listings, prices and items into a local SQLite database"
)]
struct Cli {
    /// SQLite database file, created if missing. Running without arguments uses the default.
    #[arg(long, default_value = db::DEFAULT_DB_PATH)]
    db: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    info!("Database: {:?}", cli.db);
    let store = db::Store::open(&cli.db)?;
    store.init_schema()?;
    let client = fetch::HttpClient::new()?;

    let mut total = CategoryStats::default();
    for category in Category::ALL {
        let stats = catalog::ingest_category(&client, &store, category)?;
        print_stats(category.as_str(), &stats);
        total.add(&stats);
    }
    print_stats("total", &total);

    let (bundles, items) = store.counts()?;
    println!("Store holds {} bundles, {} items", bundles, items);
    store.close()?;

    println!("\nDone in {}", format_duration(t0.elapsed()));
    Ok(())
}

fn print_stats(label: &str, s: &CategoryStats) {
    println!(
        "{:<8} | {:>3} listed | {:>3} new | {:>3} priced | {:>4} items added | {:>4} items present",
        label, s.listed, s.inserted, s.priced, s.items_inserted, s.items_skipped
    );
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
