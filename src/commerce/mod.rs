//! WooCommerce REST client (`/wp-json/wc/v3`).
//!
//! Product search, category resolution and order lookup against the shop
//! backend, authenticated with the consumer key/secret pair over basic auth.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::types::{AppError, OrderDetails, OrderLineItem, Product, Result};
use crate::utils::toml_config::BonlivreConfig;

/// Message returned when no order matches the number/postcode pair
pub const ORDER_NOT_FOUND: &str = "Keine Bestellung gefunden";
/// Message returned when the order exists but the postcode differs
pub const POSTCODE_MISMATCH: &str = "Bestellnummer und Postleitzahl stimmen nicht überein";

pub struct WooCommerceClient {
    client: Client,
    base_url: String,
    consumer_key: String,
    consumer_secret: String,
    per_page: u32,
}

// Wire shapes, only the fields we read

#[derive(Debug, Deserialize)]
struct WcProduct {
    id: i64,
    name: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    short_description: String,
    #[serde(default)]
    permalink: Option<String>,
    #[serde(default)]
    images: Vec<WcImage>,
    #[serde(default)]
    categories: Vec<WcCategory>,
}

#[derive(Debug, Deserialize)]
struct WcImage {
    src: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WcCategory {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct WcOrder {
    number: String,
    status: String,
    #[serde(default)]
    date_created: String,
    #[serde(default)]
    total: String,
    #[serde(default)]
    currency: String,
    #[serde(default)]
    billing: Option<WcAddress>,
    #[serde(default)]
    shipping: Option<WcAddress>,
    #[serde(default)]
    line_items: Vec<WcLineItem>,
}

#[derive(Debug, Deserialize)]
struct WcAddress {
    #[serde(default)]
    postcode: String,
}

#[derive(Debug, Deserialize)]
struct WcLineItem {
    name: String,
    quantity: i64,
    #[serde(default)]
    total: String,
}

impl From<WcProduct> for Product {
    fn from(p: WcProduct) -> Self {
        let description = strip_html(&p.short_description);
        Product {
            id: p.id,
            name: p.name,
            price: p.price,
            description: (!description.is_empty()).then_some(description),
            permalink: p.permalink.filter(|s| !s.is_empty()),
            image_url: p.images.into_iter().next().map(|i| i.src),
            categories: p.categories.into_iter().map(|c| c.name).collect(),
        }
    }
}

impl From<WcOrder> for OrderDetails {
    fn from(o: WcOrder) -> Self {
        OrderDetails {
            shipped: o.status == "completed",
            number: o.number,
            status: o.status,
            date_created: o.date_created,
            total: o.total,
            currency: o.currency,
            line_items: o
                .line_items
                .into_iter()
                .map(|i| OrderLineItem {
                    name: i.name,
                    quantity: i.quantity,
                    total: i.total,
                })
                .collect(),
        }
    }
}

/// Remove tags from WooCommerce's HTML descriptions
fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Postcodes compare without whitespace and case
pub fn normalize_postcode(postcode: &str) -> String {
    postcode
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn category_matches(category: &str, wanted: &str) -> bool {
    let category = category.to_lowercase();
    category.contains(wanted) || wanted.contains(&category)
}

impl WooCommerceClient {
    pub fn new(
        base_url: impl Into<String>,
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        per_page: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            per_page,
        })
    }

    /// Build a client from `[commerce]`. Returns `Ok(None)` when no shop
    /// URL is configured.
    pub fn from_config(config: &BonlivreConfig) -> Result<Option<Self>> {
        let Some(base_url) = config.commerce.base_url.as_deref().filter(|u| !u.is_empty()) else {
            return Ok(None);
        };
        let (key, secret) = config
            .commerce_credentials()
            .map_err(|e| AppError::Internal(e.to_string()))?;

        Self::new(
            base_url,
            key,
            secret,
            config.commerce.per_page,
            Duration::from_secs(config.commerce.timeout_secs),
        )
        .map(Some)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/wp-json/wc/v3/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.consumer_key, Some(&self.consumer_secret))
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("WooCommerce request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, path, body = %body, "WooCommerce API returned an error");
            return Err(AppError::Upstream(format!(
                "WooCommerce API error: {}",
                status
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| AppError::Upstream(format!("Invalid WooCommerce response: {}", e)))
    }

    /// Search products by free text and/or category id
    pub async fn search_products(
        &self,
        search: Option<&str>,
        category_id: Option<i64>,
    ) -> Result<Vec<Product>> {
        let mut query = vec![("per_page", self.per_page.to_string())];
        if let Some(term) = search.map(str::trim).filter(|s| !s.is_empty()) {
            query.push(("search", term.to_string()));
        }
        if let Some(id) = category_id {
            query.push(("category", id.to_string()));
        }

        let products: Vec<WcProduct> = self.get_json("products", &query).await?;
        tracing::debug!(count = products.len(), "Fetched products");
        Ok(products.into_iter().map(Product::from).collect())
    }

    /// Resolve a category name to its id. A category matches when either
    /// name contains the other, ignoring case.
    pub async fn resolve_category(&self, name: &str) -> Result<Option<i64>> {
        let wanted = name.trim().to_lowercase();
        if wanted.is_empty() {
            return Ok(None);
        }

        let categories: Vec<WcCategory> = self
            .get_json("products/categories", &[("per_page", "100".to_string())])
            .await?;

        let found = categories
            .into_iter()
            .find(|c| category_matches(&c.name, &wanted));

        match &found {
            Some(c) => tracing::debug!(category = %c.name, id = c.id, "Resolved category"),
            None => tracing::debug!(category = %name, "Category not found"),
        }

        Ok(found.map(|c| c.id))
    }

    /// Product search with an optional category name. An unknown category
    /// yields no products rather than an unfiltered search.
    pub async fn find_products(
        &self,
        search: Option<&str>,
        category: Option<&str>,
    ) -> Result<Vec<Product>> {
        let category_id = match category.map(str::trim).filter(|c| !c.is_empty()) {
            Some(name) => match self.resolve_category(name).await? {
                Some(id) => Some(id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };

        self.search_products(search, category_id).await
    }

    /// Look up an order by number, verified against the billing (or
    /// shipping) postcode.
    pub async fn find_order(&self, number: &str, postcode: &str) -> Result<OrderDetails> {
        let orders: Vec<WcOrder> = self
            .get_json("orders", &[("number", number.trim().to_string())])
            .await?;

        if orders.is_empty() {
            return Err(AppError::NotFound(ORDER_NOT_FOUND.to_string()));
        }

        let wanted = normalize_postcode(postcode);
        orders
            .into_iter()
            .find(|o| {
                [&o.billing, &o.shipping]
                    .into_iter()
                    .flatten()
                    .any(|a| !a.postcode.is_empty() && normalize_postcode(&a.postcode) == wanted)
            })
            .map(OrderDetails::from)
            .ok_or_else(|| AppError::NotFound(POSTCODE_MISMATCH.to_string()))
    }
}
