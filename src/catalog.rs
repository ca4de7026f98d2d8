//! Watershed and product catalogs.
//!
//! Both catalogs are fetched once per invocation and indexed by slug. When the
//! service returns the same slug twice, the later record wins.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use uuid::Uuid;

use crate::client::Client;
use crate::error::{Error, Result};

pub const WATERSHEDS_ENDPOINT: &str = "watersheds";
pub const PRODUCTS_ENDPOINT: &str = "products";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Watershed {
    pub id: Uuid,
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub office_symbol: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub area_groups: Vec<String>,
    #[serde(default, rename = "bbox", deserialize_with = "null_as_default")]
    pub bounding_box: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub slug: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tags: Vec<Uuid>,
    #[serde(default)]
    pub temporal_resolution: i64,
    #[serde(default)]
    pub temporal_duration: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub dss_fpart: String,
    #[serde(default)]
    pub parameter_id: Uuid,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameter: String,
    #[serde(default)]
    pub unit_id: Uuid,
    #[serde(default, deserialize_with = "null_as_default")]
    pub unit: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default)]
    pub suite_id: Uuid,
    #[serde(default, deserialize_with = "null_as_default")]
    pub suite: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub label: String,
    #[serde(default)]
    pub after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,
    #[serde(default, rename = "productfile_count")]
    pub file_count: i64,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default)]
pub struct WatershedCatalog {
    by_slug: HashMap<String, Watershed>,
}

impl WatershedCatalog {
    pub fn fetch(client: &Client) -> Result<Self> {
        let url = client.endpoint(WATERSHEDS_ENDPOINT)?;
        let records: Vec<Watershed> = client.get_json(&url)?;
        tracing::info!(count = records.len(), "fetched watershed catalog");
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: impl IntoIterator<Item = Watershed>) -> Self {
        let by_slug = records
            .into_iter()
            .map(|ws| (ws.slug.clone(), ws))
            .collect();
        Self { by_slug }
    }

    pub fn len(&self) -> usize {
        self.by_slug.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slug.is_empty()
    }

    pub fn resolve(&self, slug: &str) -> Result<&Watershed> {
        self.by_slug
            .get(slug)
            .ok_or_else(|| Error::SlugNotFound(slug.to_string()))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProductCatalog {
    // Response order, with duplicate slugs collapsed onto their first position.
    products: Vec<Product>,
    index: HashMap<String, usize>,
}

impl ProductCatalog {
    pub fn fetch(client: &Client) -> Result<Self> {
        let url = client.endpoint(PRODUCTS_ENDPOINT)?;
        let records: Vec<Product> = client.get_json(&url)?;
        tracing::info!(count = records.len(), "fetched product catalog");
        Ok(Self::from_records(records))
    }

    pub fn from_records(records: impl IntoIterator<Item = Product>) -> Self {
        let mut catalog = Self::default();
        for product in records {
            match catalog.index.get(&product.slug) {
                Some(&pos) => catalog.products[pos] = product,
                None => {
                    catalog
                        .index
                        .insert(product.slug.clone(), catalog.products.len());
                    catalog.products.push(product);
                }
            }
        }
        catalog
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    pub fn get(&self, slug: &str) -> Option<&Product> {
        self.index.get(slug).map(|&pos| &self.products[pos])
    }

    /// Maps product slugs to ids, in catalog order. Unknown slugs are skipped;
    /// if nothing matches the result is [`Error::EmptyProductList`].
    pub fn resolve_ids<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<Uuid>> {
        for name in self.unknown(names) {
            tracing::warn!(product = name, "product not found in catalog, skipping");
        }
        let wanted: HashSet<&str> = names.iter().map(AsRef::as_ref).collect();

        let ids: Vec<Uuid> = self
            .products
            .iter()
            .filter(|p| wanted.contains(p.slug.as_str()))
            .map(|p| p.id)
            .collect();

        if ids.is_empty() {
            return Err(Error::EmptyProductList(
                names.iter().map(|n| n.as_ref().to_string()).collect(),
            ));
        }
        Ok(ids)
    }

    /// Names missing from the catalog, once each, in the order given.
    fn unknown<'n, S: AsRef<str>>(&self, names: &'n [S]) -> Vec<&'n str> {
        let mut seen = HashSet::new();
        names
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| seen.insert(*name) && !self.index.contains_key(*name))
            .collect()
    }
}
