use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Recognized status values, in rank order. The order drives `auto_sort`;
/// statuses outside this list are legal but always rank last.
pub const STATUS_OPTIONS: [&str; 7] = [
    "核价通过",
    "拉过库存",
    "已下架",
    "价格待定",
    "减少库存为0",
    "改过体积",
    "价格错误",
];

/// Rank of a status for sorting. Unrecognized statuses rank after every
/// recognized one.
pub fn status_rank(status: &str) -> usize {
    STATUS_OPTIONS
        .iter()
        .position(|s| *s == status)
        .unwrap_or(STATUS_OPTIONS.len())
}

#[derive(Clone, Debug, PartialEq)]
pub struct SkcRecord {
    pub code: String,
    pub status: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
struct ProductEntry {
    code: String,
    skcs: Vec<SkcRecord>,
}

/// Per-project record store: product code -> SKC code -> status.
///
/// Both levels keep insertion order, and an SKC code is unique across the
/// whole store, not just within its product. Serializes to nested JSON
/// objects in the same order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordStore {
    products: Vec<ProductEntry>,
}

/// Outcome of a batch modify/delete: how many entries were touched and
/// which requested codes matched nothing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchReport {
    pub applied: usize,
    pub not_found: Vec<String>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn product_count(&self) -> usize {
        self.products.len()
    }

    pub fn record_count(&self) -> usize {
        self.products.iter().map(|p| p.skcs.len()).sum()
    }

    pub fn contains_skc(&self, code: &str) -> bool {
        self.products
            .iter()
            .any(|p| p.skcs.iter().any(|r| r.code == code))
    }

    pub fn status_of(&self, code: &str) -> Option<&str> {
        self.products.iter().find_map(|p| {
            p.skcs
                .iter()
                .find(|r| r.code == code)
                .map(|r| r.status.as_str())
        })
    }

    /// Register a product entry, creating it empty if it is new.
    pub fn ensure_product(&mut self, product: &str) {
        if !self.products.iter().any(|p| p.code == product) {
            self.products.push(ProductEntry {
                code: product.to_string(),
                skcs: Vec::new(),
            });
        }
    }

    /// Insert one SKC under `product`. Returns false without touching the
    /// store when the code already exists under any product.
    pub fn insert(&mut self, product: &str, skc: &str, status: &str) -> bool {
        if self.contains_skc(skc) {
            return false;
        }
        let record = SkcRecord {
            code: skc.to_string(),
            status: status.to_string(),
        };
        match self.products.iter_mut().find(|p| p.code == product) {
            Some(entry) => entry.skcs.push(record),
            None => self.products.push(ProductEntry {
                code: product.to_string(),
                skcs: vec![record],
            }),
        }
        true
    }

    /// Add every whitespace-separated code in `codes` under `product` with
    /// `status`, silently skipping codes already present anywhere in the
    /// store. The product entry is created even when nothing is added.
    /// Returns the count actually added.
    pub fn add_skcs(&mut self, product: &str, codes: &str, status: &str) -> usize {
        self.ensure_product(product);
        let mut added = 0;
        for code in codes.split_whitespace() {
            if self.insert(product, code, status) {
                added += 1;
            }
        }
        added
    }

    /// Set the status of every listed code that exists in the store;
    /// codes found nowhere are reported back by name.
    pub fn batch_modify(&mut self, codes: &[&str], status: &str) -> BatchReport {
        let mut report = BatchReport::default();
        for &code in codes {
            let mut found = false;
            for product in &mut self.products {
                for record in &mut product.skcs {
                    if record.code == code {
                        record.status = status.to_string();
                        report.applied += 1;
                        found = true;
                    }
                }
            }
            if !found {
                report.not_found.push(code.to_string());
            }
        }
        report
    }

    /// Remove every listed code that exists in the store. A product whose
    /// last SKC is removed keeps its (empty) entry.
    pub fn batch_delete(&mut self, codes: &[&str]) -> BatchReport {
        let mut report = BatchReport::default();
        for &code in codes {
            let mut found = false;
            for product in &mut self.products {
                let before = product.skcs.len();
                product.skcs.retain(|r| r.code != code);
                let removed = before - product.skcs.len();
                if removed > 0 {
                    report.applied += removed;
                    found = true;
                }
            }
            if !found {
                report.not_found.push(code.to_string());
            }
        }
        report
    }

    /// Reorder every product's SKC entries by status rank. The sort is
    /// stable: entries with equal rank keep their insertion order, so
    /// sorting twice changes nothing.
    pub fn auto_sort(&mut self) {
        for product in &mut self.products {
            product.skcs.sort_by_key(|r| status_rank(&r.status));
        }
    }

    /// Product codes in store order.
    pub fn product_codes(&self) -> impl Iterator<Item = &str> {
        self.products.iter().map(|p| p.code.as_str())
    }

    /// Products with their SKC entries, in store order.
    pub fn products(&self) -> impl Iterator<Item = (&str, &[SkcRecord])> {
        self.products.iter().map(|p| (p.code.as_str(), p.skcs.as_slice()))
    }

    /// Flat (product, skc, status) triples in store order, for table display.
    pub fn rows(&self) -> Vec<(&str, &str, &str)> {
        self.products
            .iter()
            .flat_map(|p| {
                p.skcs
                    .iter()
                    .map(|r| (p.code.as_str(), r.code.as_str(), r.status.as_str()))
            })
            .collect()
    }
}

/// At most one image path per product; re-assignment overwrites. The path
/// is whatever the picker handed over and is not checked for existence.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ImageMap {
    entries: Vec<(String, String)>,
}

impl ImageMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn assign(&mut self, product: &str, path: impl Into<String>) {
        let path = path.into();
        match self.entries.iter_mut().find(|(p, _)| p == product) {
            Some((_, existing)) => *existing = path,
            None => self.entries.push((product.to_string(), path)),
        }
    }

    pub fn get(&self, product: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(p, _)| p == product)
            .map(|(_, path)| path.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(p, path)| (p.as_str(), path.as_str()))
    }
}

// The sidecar format is a plain JSON object per level, so the vector-backed
// maps serialize through hand-written map impls instead of derive.

struct SkcEntries<'a>(&'a [SkcRecord]);

impl Serialize for SkcEntries<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for record in self.0 {
            map.serialize_entry(&record.code, &record.status)?;
        }
        map.end()
    }
}

impl Serialize for RecordStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.products.len()))?;
        for product in &self.products {
            map.serialize_entry(&product.code, &SkcEntries(&product.skcs))?;
        }
        map.end()
    }
}

struct SkcMap(Vec<SkcRecord>);

impl<'de> Deserialize<'de> for SkcMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SkcMapVisitor;

        impl<'de> Visitor<'de> for SkcMapVisitor {
            type Value = SkcMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of SKC code to status")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut records = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((code, status)) = access.next_entry::<String, String>()? {
                    records.push(SkcRecord { code, status });
                }
                Ok(SkcMap(records))
            }
        }

        deserializer.deserialize_map(SkcMapVisitor)
    }
}

impl<'de> Deserialize<'de> for RecordStore {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StoreVisitor;

        impl<'de> Visitor<'de> for StoreVisitor {
            type Value = RecordStore;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of product code to SKC entries")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut products = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((code, skcs)) = access.next_entry::<String, SkcMap>()? {
                    products.push(ProductEntry { code, skcs: skcs.0 });
                }
                Ok(RecordStore { products })
            }
        }

        deserializer.deserialize_map(StoreVisitor)
    }
}

impl Serialize for ImageMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (product, path) in &self.entries {
            map.serialize_entry(product, path)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ImageMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ImageMapVisitor;

        impl<'de> Visitor<'de> for ImageMapVisitor {
            type Value = ImageMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of product code to image path")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry::<String, String>()? {
                    entries.push(entry);
                }
                Ok(ImageMap { entries })
            }
        }

        deserializer.deserialize_map(ImageMapVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_splits_on_whitespace() {
        let mut store = RecordStore::new();
        let added = store.add_skcs("P1", "A B", "已下架");
        assert_eq!(added, 2);
        assert_eq!(store.status_of("A"), Some("已下架"));
        assert_eq!(store.status_of("B"), Some("已下架"));
        assert_eq!(store.rows().len(), 2);
    }

    #[test]
    fn skc_unique_across_products() {
        let mut store = RecordStore::new();
        assert_eq!(store.add_skcs("P1", "A B C", "核价通过"), 3);
        // "B" exists under P1, so only "D" lands under P2
        assert_eq!(store.add_skcs("P2", "B D", "已下架"), 1);

        let rows = store.rows();
        let under_b: Vec<_> = rows.iter().filter(|(_, skc, _)| *skc == "B").collect();
        assert_eq!(under_b.len(), 1);
        assert_eq!(under_b[0].0, "P1");
        assert_eq!(store.status_of("B"), Some("核价通过"));
    }

    #[test]
    fn duplicate_add_still_registers_product() {
        let mut store = RecordStore::new();
        store.add_skcs("P1", "A", "核价通过");
        assert_eq!(store.add_skcs("P2", "A", "核价通过"), 0);
        assert!(store.product_codes().any(|p| p == "P2"));
        assert_eq!(store.record_count(), 1);
    }

    #[test]
    fn batch_modify_reports_missing() {
        let mut store = RecordStore::new();
        store.add_skcs("P1", "A", "核价通过");

        let report = store.batch_modify(&["A", "Z"], "已下架");
        assert_eq!(report.applied, 1);
        assert_eq!(report.not_found, vec!["Z".to_string()]);
        assert_eq!(store.status_of("A"), Some("已下架"));
    }

    #[test]
    fn batch_delete_keeps_empty_product() {
        let mut store = RecordStore::new();
        store.add_skcs("P1", "A B", "核价通过");

        let report = store.batch_delete(&["A", "B", "Q"]);
        assert_eq!(report.applied, 2);
        assert_eq!(report.not_found, vec!["Q".to_string()]);
        assert_eq!(store.record_count(), 0);
        assert_eq!(store.product_count(), 1);
    }

    #[test]
    fn auto_sort_ranks_and_is_idempotent() {
        let mut store = RecordStore::new();
        store.add_skcs("P1", "A", "价格错误");
        store.add_skcs("P1", "B", "神秘状态"); // unrecognized, must rank last
        store.add_skcs("P1", "C", "核价通过");
        store.add_skcs("P1", "D", "价格错误");

        store.auto_sort();
        let first: Vec<_> = store.rows().iter().map(|(_, s, _)| s.to_string()).collect();
        assert_eq!(first, vec!["C", "A", "D", "B"]);

        store.auto_sort();
        let second: Vec<_> = store.rows().iter().map(|(_, s, _)| s.to_string()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn status_rank_order() {
        assert!(status_rank("核价通过") < status_rank("价格错误"));
        assert_eq!(status_rank("随便写的"), STATUS_OPTIONS.len());
    }

    #[test]
    fn store_round_trips_through_json_in_order() {
        let mut store = RecordStore::new();
        store.add_skcs("P2", "X", "已下架");
        store.add_skcs("P1", "A B", "核价通过");

        let json = serde_json::to_string(&store).unwrap();
        // P2 was inserted first and must stay first
        assert!(json.find("P2").unwrap() < json.find("P1").unwrap());

        let restored: RecordStore = serde_json::from_str(&json).unwrap();
        assert_eq!(store, restored);
    }

    #[test]
    fn image_map_overwrites_on_reassign() {
        let mut images = ImageMap::new();
        images.assign("P1", "/tmp/a.png");
        images.assign("P1", "/tmp/b.png");
        assert_eq!(images.get("P1"), Some("/tmp/b.png"));
        assert_eq!(images.iter().count(), 1);
    }
}
