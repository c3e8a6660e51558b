use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::db::{ItemRow, Store};
use crate::fetch::PageSource;
use crate::payload::{self, PayloadError};

pub const DETAIL_CONTAINER: &str = "#webpack-bundle-page-data";

/// Parsed `bundleData` section of a detail page.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleDetail {
    pub machine_name: String,
    pub price: f64,
    pub msrp: f64,
    pub items: Vec<ItemRow>,
}

pub struct DetailReport {
    pub detail: BundleDetail,
    pub items_inserted: usize,
    pub items_skipped: usize,
}

/// Fetch a bundle page, store its price and insert any items not yet present.
///
/// Returns `Ok(None)` without touching the store when the page carries no payload.
/// If an item insert fails, every row of the bundle (items, then the bundle itself)
/// is deleted before the error is returned.
pub fn fetch_bundle_detail(
    source: &impl PageSource,
    store: &Store,
    bundle_url: &str,
) -> Result<Option<DetailReport>> {
    let html = source.fetch(bundle_url)?;
    let Some(payload) = payload::extract(&html, DETAIL_CONTAINER)? else {
        debug!("No bundle data on {}", bundle_url);
        return Ok(None);
    };
    let detail = parse_bundle_detail(&payload)
        .with_context(|| format!("Unexpected bundle payload at {}", bundle_url))?;

    let updated = store.update_bundle_price(&detail.machine_name, detail.price, detail.msrp)?;
    if updated == 0 {
        warn!("Bundle {} not in store, price not recorded", detail.machine_name);
    }

    let (items_inserted, items_skipped) = match store_items(store, &detail.items) {
        Ok(counts) => counts,
        Err(e) => {
            rollback(store, &detail.machine_name);
            return Err(e.context(format!("Rolled back bundle {}", detail.machine_name)));
        }
    };

    info!(
        "{}: price {:.2} (msrp {:.2}), {} new items, {} already stored",
        detail.machine_name, detail.price, detail.msrp, items_inserted, items_skipped
    );
    Ok(Some(DetailReport {
        detail,
        items_inserted,
        items_skipped,
    }))
}

pub fn parse_bundle_detail(payload: &Value) -> Result<BundleDetail, PayloadError> {
    let data = payload::field(payload, "bundleData")?;
    let machine_name = payload::string(data, "machine_name")?;
    let msrp = payload::amount(payload::field(data, "basic_data")?, "msrp|money")?;
    let price = derive_price(&machine_name, payload::object(data, "tier_pricing_data")?)?;

    let items = payload::object(data, "tier_item_data")?
        .values()
        .map(|item| parse_item(item, &machine_name))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(BundleDetail {
        machine_name,
        price,
        msrp,
        items,
    })
}

/// Headline price of a bundle: the highest amount over all of its tiers.
pub fn derive_price(bundle: &str, tiers: &Map<String, Value>) -> Result<f64, PayloadError> {
    let mut max: Option<f64> = None;
    for tier in tiers.values() {
        let amount = payload::amount(tier, "price|money")?;
        max = Some(max.map_or(amount, |m| m.max(amount)));
    }
    max.ok_or_else(|| PayloadError::NoTiers(bundle.to_string()))
}

fn parse_item(item: &Value, bundle_name: &str) -> Result<ItemRow, PayloadError> {
    // Not every item lists an MSRP
    let msrp_price = match item.get("msrp_price|money") {
        Some(_) => payload::amount(item, "msrp_price|money")?,
        None => 0.0,
    };
    Ok(ItemRow {
        machine_name: payload::string(item, "machine_name")?,
        human_name: payload::string(item, "human_name")?,
        description_text: payload::nullable_string(item, "description_text")?,
        bundle_name: bundle_name.to_string(),
        msrp_price,
    })
}

fn store_items(store: &Store, items: &[ItemRow]) -> Result<(usize, usize)> {
    let mut inserted = 0;
    let mut skipped = 0;
    for item in items {
        if store.item_exists(&item.machine_name, &item.human_name, &item.bundle_name)? {
            skipped += 1;
            continue;
        }
        store.insert_item(item)?;
        inserted += 1;
    }
    Ok((inserted, skipped))
}

/// Delete every row of a bundle, items first. Failures are logged, not returned.
pub fn rollback(store: &Store, bundle_name: &str) {
    warn!("Ingestion failed for {}, removing bundle", bundle_name);
    let result = store
        .delete_items(bundle_name)
        .and_then(|_| store.delete_bundle(bundle_name));
    if let Err(e) = result {
        error!("Rollback of {} failed: {:#}", bundle_name, e);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::db::BundleRow;
    use serde_json::json;

    const URL: &str = "https://www.humblebundle.com/b/B1";

    fn detail_page(data: Value) -> String {
        format!(
            r#"<html><body><script id="webpack-bundle-page-data" type="application/json">{}</script></body></html>"#,
            json!({ "bundleData": data })
        )
    }

    fn three_item_payload() -> Value {
        json!({
            "machine_name": "B1",
            "basic_data": { "msrp|money": { "amount": 120.0, "currency": "USD" } },
            "tier_pricing_data": {
                "t1": { "price|money": { "amount": 5.0 } },
                "t2": { "price|money": { "amount": 15.0 } },
                "t3": { "price|money": { "amount": 10.0 } }
            },
            "tier_item_data": {
                "a": { "machine_name": "item_a", "human_name": "Item A", "description_text": "first",
                       "msrp_price|money": { "amount": 19.99 } },
                "b": { "machine_name": "item_b", "human_name": "Item B", "description_text": "second" },
                "c": { "machine_name": "item_c", "human_name": "Item C", "description_text": null,
                       "msrp_price|money": { "amount": 4.5 } }
            }
        })
    }

    fn store_with_bundle() -> Store {
        let store = Store::open_in_memory().unwrap();
        store.init_schema().unwrap();
        store
            .insert_bundle(&BundleRow {
                machine_name: "B1".into(),
                tile_name: Some("Bundle One".into()),
                detailed_marketing_blurb: None,
                tile_image: None,
                tile_logo: None,
                tile_stamp: None,
                start_date: None,
                end_date: None,
                product_url: URL.into(),
                price: None,
                msrp_price: None,
            })
            .unwrap();
        store
    }

    fn source(html: String) -> HashMap<String, String> {
        HashMap::from([(URL.to_string(), html)])
    }

    #[test]
    fn price_is_max_tier() {
        let tiers = json!({
            "t1": { "price|money": { "amount": 5 } },
            "t2": { "price|money": { "amount": 15 } },
            "t3": { "price|money": { "amount": 10 } }
        });
        assert_eq!(derive_price("B1", tiers.as_object().unwrap()).unwrap(), 15.0);

        let reordered = json!({
            "t3": { "price|money": { "amount": 10 } },
            "t2": { "price|money": { "amount": 15 } },
            "t1": { "price|money": { "amount": 5 } }
        });
        assert_eq!(derive_price("B1", reordered.as_object().unwrap()).unwrap(), 15.0);
    }

    #[test]
    fn no_tiers_is_an_error() {
        let err = derive_price("B1", &Map::new()).unwrap_err();
        assert!(matches!(err, PayloadError::NoTiers(b) if b == "B1"));
    }

    #[test]
    fn parse_defaults_missing_msrp() {
        let detail = parse_bundle_detail(&json!({ "bundleData": three_item_payload() })).unwrap();
        assert_eq!(detail.machine_name, "B1");
        assert_eq!(detail.price, 15.0);
        assert_eq!(detail.msrp, 120.0);
        let names: Vec<_> = detail.items.iter().map(|i| i.machine_name.as_str()).collect();
        assert_eq!(names, ["item_a", "item_b", "item_c"]);
        assert_eq!(detail.items[1].msrp_price, 0.0);
        assert_eq!(detail.items[2].description_text, None);
    }

    #[test]
    fn parse_missing_key_is_fatal() {
        let mut data = three_item_payload();
        data.as_object_mut().unwrap().remove("basic_data");
        let err = parse_bundle_detail(&json!({ "bundleData": data })).unwrap_err();
        assert!(matches!(err, PayloadError::MissingKey(k) if k == "basic_data"));
    }

    #[test]
    fn stores_price_and_items() {
        let store = store_with_bundle();
        let report = fetch_bundle_detail(&source(detail_page(three_item_payload())), &store, URL)
            .unwrap()
            .unwrap();
        assert_eq!(report.items_inserted, 3);
        assert_eq!(report.items_skipped, 0);

        let bundle = store.fetch_bundle("B1").unwrap().unwrap();
        assert_eq!(bundle.price, Some(15.0));
        assert_eq!(bundle.msrp_price, Some(120.0));

        let items = store.fetch_items("B1").unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[1].machine_name, "item_b");
        assert_eq!(items[1].msrp_price, 0.0);
    }

    #[test]
    fn second_fetch_skips_existing_items() {
        let store = store_with_bundle();
        let pages = source(detail_page(three_item_payload()));
        fetch_bundle_detail(&pages, &store, URL).unwrap();
        let report = fetch_bundle_detail(&pages, &store, URL).unwrap().unwrap();
        assert_eq!(report.items_inserted, 0);
        assert_eq!(report.items_skipped, 3);
        assert_eq!(store.counts().unwrap(), (1, 3));
    }

    #[test]
    fn failed_item_rolls_back_bundle() {
        let store = store_with_bundle();
        store
            .conn()
            .execute_batch(
                "CREATE TRIGGER fail_item_b BEFORE INSERT ON bundle_item
                 WHEN NEW.machine_name = 'item_b'
                 BEGIN SELECT RAISE(ABORT, 'forced failure'); END;",
            )
            .unwrap();

        let err = fetch_bundle_detail(&source(detail_page(three_item_payload())), &store, URL)
            .err()
            .unwrap();
        assert!(format!("{:#}", err).contains("forced failure"));
        assert!(!store.bundle_exists("B1").unwrap());
        assert!(store.fetch_items("B1").unwrap().is_empty());
        assert_eq!(store.counts().unwrap(), (0, 0));
    }

    #[test]
    fn page_without_payload_is_noop() {
        let store = store_with_bundle();
        let pages = source("<html><body>Coming soon</body></html>".into());
        assert!(fetch_bundle_detail(&pages, &store, URL).unwrap().is_none());
        let bundle = store.fetch_bundle("B1").unwrap().unwrap();
        assert_eq!(bundle.price, None);
        assert_eq!(store.counts().unwrap(), (1, 0));
    }

    #[test]
    fn malformed_payload_writes_nothing() {
        let store = store_with_bundle();
        let mut data = three_item_payload();
        data["tier_item_data"]["b"].as_object_mut().unwrap().remove("human_name");
        assert!(fetch_bundle_detail(&source(detail_page(data)), &store, URL).is_err());
        assert_eq!(store.fetch_bundle("B1").unwrap().unwrap().price, None);
        assert_eq!(store.counts().unwrap(), (1, 0));
    }

    #[test]
    fn transport_error_propagates() {
        let store = store_with_bundle();
        let pages: HashMap<String, String> = HashMap::new();
        assert!(fetch_bundle_detail(&pages, &store, URL).is_err());
        assert!(store.bundle_exists("B1").unwrap());
    }
}
