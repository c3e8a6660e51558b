use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

pub const DEFAULT_DB_PATH: &str = "database/data.db";

/// Handle over the catalog database. Every mutating call commits on its own.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {:?}", dir))?;
        }
        let conn = Connection::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self { conn })
    }

    pub fn close(self) -> Result<()> {
        self.conn
            .close()
            .map_err(|(_, e)| anyhow::Error::new(e).context("Failed to close database"))
    }

    #[cfg(test)]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS bundle_meta (
                machine_name             TEXT PRIMARY KEY,
                tile_name                TEXT,
                detailed_marketing_blurb TEXT,
                tile_image               TEXT,
                tile_logo                TEXT,
                tile_stamp               TEXT,
                start_date               TEXT,
                end_date                 TEXT,
                product_url              TEXT,
                price                    REAL,
                msrp_price               REAL
            );

            CREATE TABLE IF NOT EXISTS bundle_item (
                machine_name     TEXT,
                human_name       TEXT,
                description_text TEXT,
                bundle_name      TEXT REFERENCES bundle_meta(machine_name),
                msrp_price       REAL,
                PRIMARY KEY (machine_name, human_name, bundle_name)
            );
            CREATE INDEX IF NOT EXISTS idx_bundle_item_bundle ON bundle_item(bundle_name);
            ",
        )?;
        Ok(())
    }

    // ── Bundles ──

    pub fn bundle_exists(&self, machine_name: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM bundle_meta WHERE machine_name = ?1",
                params![machine_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Plain insert: a primary-key collision is an error, so check `bundle_exists` first.
    pub fn insert_bundle(&self, b: &BundleRow) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO bundle_meta
                 (machine_name, tile_name, detailed_marketing_blurb, tile_image, tile_logo,
                  tile_stamp, start_date, end_date, product_url)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    b.machine_name, b.tile_name, b.detailed_marketing_blurb, b.tile_image,
                    b.tile_logo, b.tile_stamp, b.start_date, b.end_date, b.product_url,
                ],
            )
            .with_context(|| format!("Failed to insert bundle {}", b.machine_name))?;
        Ok(())
    }

    /// Returns the number of rows touched; zero when the bundle is unknown.
    pub fn update_bundle_price(&self, machine_name: &str, price: f64, msrp: f64) -> Result<usize> {
        let n = self.conn.execute(
            "UPDATE bundle_meta SET price = ?1, msrp_price = ?2 WHERE machine_name = ?3",
            params![price, msrp, machine_name],
        )?;
        Ok(n)
    }

    pub fn delete_bundle(&self, machine_name: &str) -> Result<usize> {
        let n = self.conn.execute(
            "DELETE FROM bundle_meta WHERE machine_name = ?1",
            params![machine_name],
        )?;
        Ok(n)
    }

    #[cfg(test)]
    pub fn fetch_bundle(&self, machine_name: &str) -> Result<Option<BundleRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT machine_name, tile_name, detailed_marketing_blurb, tile_image, tile_logo,
                        tile_stamp, start_date, end_date, product_url, price, msrp_price
                 FROM bundle_meta WHERE machine_name = ?1",
                params![machine_name],
                |row| {
                    Ok(BundleRow {
                        machine_name: row.get(0)?,
                        tile_name: row.get(1)?,
                        detailed_marketing_blurb: row.get(2)?,
                        tile_image: row.get(3)?,
                        tile_logo: row.get(4)?,
                        tile_stamp: row.get(5)?,
                        start_date: row.get(6)?,
                        end_date: row.get(7)?,
                        product_url: row.get(8)?,
                        price: row.get(9)?,
                        msrp_price: row.get(10)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // ── Items ──

    pub fn item_exists(&self, machine_name: &str, human_name: &str, bundle_name: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM bundle_item
                 WHERE machine_name = ?1 AND human_name = ?2 AND bundle_name = ?3",
                params![machine_name, human_name, bundle_name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Fails on a key collision or when `bundle_name` has no `bundle_meta` row.
    pub fn insert_item(&self, item: &ItemRow) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO bundle_item
                 (machine_name, human_name, description_text, bundle_name, msrp_price)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    item.machine_name, item.human_name, item.description_text,
                    item.bundle_name, item.msrp_price,
                ],
            )
            .with_context(|| {
                format!("Failed to insert item {} into {}", item.machine_name, item.bundle_name)
            })?;
        Ok(())
    }

    pub fn delete_items(&self, bundle_name: &str) -> Result<usize> {
        let n = self.conn.execute(
            "DELETE FROM bundle_item WHERE bundle_name = ?1",
            params![bundle_name],
        )?;
        Ok(n)
    }

    #[cfg(test)]
    pub fn fetch_items(&self, bundle_name: &str) -> Result<Vec<ItemRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT machine_name, human_name, description_text, bundle_name, msrp_price
             FROM bundle_item WHERE bundle_name = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![bundle_name], |row| {
                Ok(ItemRow {
                    machine_name: row.get(0)?,
                    human_name: row.get(1)?,
                    description_text: row.get(2)?,
                    bundle_name: row.get(3)?,
                    msrp_price: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Stats ──

    /// Row counts of (bundle_meta, bundle_item).
    pub fn counts(&self) -> Result<(usize, usize)> {
        let bundles: usize = self.conn.query_row("SELECT COUNT(*) FROM bundle_meta", [], |r| r.get(0))?;
        let items: usize = self.conn.query_row("SELECT COUNT(*) FROM bundle_item", [], |r| r.get(0))?;
        Ok((bundles, items))
    }
}

// ── Rows ──

#[derive(Debug, Clone, PartialEq)]
pub struct BundleRow {
    pub machine_name: String,
    pub tile_name: Option<String>,
    pub detailed_marketing_blurb: Option<String>,
    pub tile_image: Option<String>,
    pub tile_logo: Option<String>,
    pub tile_stamp: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub product_url: String,
    pub price: Option<f64>,
    pub msrp_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemRow {
    pub machine_name: String,
    pub human_name: String,
    pub description_text: Option<String>,
    pub bundle_name: String,
    pub msrp_price: f64,
}
