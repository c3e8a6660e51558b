use std::fmt;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::{debug, info};

use crate::db::{BundleRow, Store};
use crate::detail;
use crate::fetch::PageSource;
use crate::payload::{self, PayloadError};

pub const BASE_URL: &str = "https://www.humblebundle.com";
pub const LANDING_CONTAINER: &str = "#landingPage-json-data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Games,
    Software,
    Books,
}

impl Category {
    /// Every category, in the order a run visits them.
    pub const ALL: [Category; 3] = [Category::Games, Category::Software, Category::Books];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Games => "games",
            Category::Software => "software",
            Category::Books => "books",
        }
    }

    pub fn landing_url(self) -> String {
        format!("{}/{}", BASE_URL, self.as_str())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tile of a category's mosaic listing.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleSummary {
    pub machine_name: String,
    pub tile_name: Option<String>,
    pub detailed_marketing_blurb: Option<String>,
    pub tile_image: Option<String>,
    pub tile_logo: Option<String>,
    pub tile_stamp: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    /// Absolute detail page URL.
    pub product_url: String,
}

impl BundleSummary {
    fn to_row(&self) -> BundleRow {
        BundleRow {
            machine_name: self.machine_name.clone(),
            tile_name: self.tile_name.clone(),
            detailed_marketing_blurb: self.detailed_marketing_blurb.clone(),
            tile_image: self.tile_image.clone(),
            tile_logo: self.tile_logo.clone(),
            tile_stamp: self.tile_stamp.clone(),
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
            product_url: self.product_url.clone(),
            price: None,
            msrp_price: None,
        }
    }
}

/// Counters for one category run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CategoryStats {
    pub listed: usize,
    pub inserted: usize,
    pub priced: usize,
    pub items_inserted: usize,
    pub items_skipped: usize,
}

impl CategoryStats {
    pub fn add(&mut self, other: &CategoryStats) {
        self.listed += other.listed;
        self.inserted += other.inserted;
        self.priced += other.priced;
        self.items_inserted += other.items_inserted;
        self.items_skipped += other.items_skipped;
    }
}

/// Read the bundle tiles listed on a category landing page.
///
/// A page without the landing payload yields no bundles.
pub fn fetch_category_bundles(
    source: &impl PageSource,
    category: Category,
) -> Result<Vec<BundleSummary>> {
    let url = category.landing_url();
    info!("Fetching {} listing: {}", category, url);
    let html = source.fetch(&url)?;

    let Some(payload) = payload::extract(&html, LANDING_CONTAINER)? else {
        info!("No listing data on {}", url);
        return Ok(Vec::new());
    };
    let bundles = parse_listing(&payload, category)
        .with_context(|| format!("Unexpected listing payload at {}", url))?;
    debug!("{} bundles listed under {}", bundles.len(), category);
    Ok(bundles)
}

pub fn parse_listing(payload: &Value, category: Category) -> Result<Vec<BundleSummary>, PayloadError> {
    let data = payload::field(payload, "data")?;
    let section = payload::field(data, category.as_str())?;
    let mosaic = payload::array(section, "mosaic")?;
    let first = mosaic
        .first()
        .ok_or_else(|| PayloadError::MissingKey("mosaic[0]".to_string()))?;

    payload::array(first, "products")?
        .iter()
        .map(parse_product)
        .collect()
}

fn parse_product(product: &Value) -> Result<BundleSummary, PayloadError> {
    let path = payload::string(product, "product_url")?;
    Ok(BundleSummary {
        machine_name: payload::string(product, "machine_name")?,
        tile_name: payload::nullable_string(product, "tile_name")?,
        detailed_marketing_blurb: payload::nullable_string(product, "detailed_marketing_blurb")?,
        tile_image: payload::nullable_string(product, "tile_image")?,
        tile_logo: payload::nullable_string(product, "tile_logo")?,
        tile_stamp: payload::nullable_string(product, "tile_stamp")?,
        start_date: payload::nullable_string(product, "start_date|datetime")?,
        end_date: payload::nullable_string(product, "end_date|datetime")?,
        product_url: format!("{}{}", BASE_URL, path),
    })
}

/// List a category and ingest every bundle in it, one after another.
///
/// Each bundle row is written before its detail page is fetched. If the detail step fails
/// the bundle's rows are deleted and the error aborts the run.
pub fn ingest_category(
    source: &impl PageSource,
    store: &Store,
    category: Category,
) -> Result<CategoryStats> {
    let bundles = fetch_category_bundles(source, category)?;
    let mut stats = CategoryStats {
        listed: bundles.len(),
        ..Default::default()
    };

    let pb = ProgressBar::new(bundles.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );

    for bundle in &bundles {
        pb.set_message(bundle.machine_name.clone());
        if !store.bundle_exists(&bundle.machine_name)? {
            store.insert_bundle(&bundle.to_row())?;
            stats.inserted += 1;
        }

        let report = match detail::fetch_bundle_detail(source, store, &bundle.product_url) {
            Ok(report) => report,
            Err(e) => {
                pb.finish_and_clear();
                detail::rollback(store, &bundle.machine_name);
                return Err(e.context(format!("Rolled back bundle {}", bundle.machine_name)));
            }
        };
        if let Some(report) = report {
            debug!(
                "{} priced at {:.2} with {} items",
                report.detail.machine_name,
                report.detail.price,
                report.detail.items.len()
            );
            stats.priced += 1;
            stats.items_inserted += report.items_inserted;
            stats.items_skipped += report.items_skipped;
        }
        pb.inc(1);
    }

    pb.finish_and_clear();
    Ok(stats)
}
