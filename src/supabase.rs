use crate::blob::{BlobError, BlobStore, object_key};
use crate::catalog::{CatalogError, CatalogStore, Category, Product, Subcategory};
use crate::config::SupabaseConfig;
use crate::normalize::ProductDraft;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SupabaseError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid response: {0}")]
    Deserialize(String),
}

impl From<SupabaseError> for CatalogError {
    fn from(err: SupabaseError) -> Self {
        match err {
            SupabaseError::Status { status, body } if status == StatusCode::CONFLICT => {
                CatalogError::Conflict(body)
            }
            other => CatalogError::Backend(other.to_string()),
        }
    }
}

impl From<SupabaseError> for BlobError {
    fn from(err: SupabaseError) -> Self {
        match err {
            SupabaseError::Status { .. } => BlobError::Rejected(err.to_string()),
            other => BlobError::Request(other.to_string()),
        }
    }
}

pub fn build_client(config: &SupabaseConfig) -> Client {
    Client::builder()
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    service_key: String,
    bucket: String,
    http: Client,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
            bucket: config.bucket.clone(),
            http: build_client(config),
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    fn rest_url(&self, table: &str, filters: &[(&str, &str)]) -> String {
        let mut url = format!("{}/rest/v1/{}?select=*", self.base_url, table);
        for (column, value) in filters {
            url.push_str(&format!("&{}=eq.{}", column, urlencoding::encode(value)));
        }
        url
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            urlencoding::encode(&self.bucket),
            encode_key(key)
        )
    }

    pub fn public_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            urlencoding::encode(&self.bucket),
            encode_key(key)
        )
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SupabaseError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|err| SupabaseError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SupabaseError::Status { status, body });
        }
        Ok(response)
    }

    async fn fetch_first<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, &str)],
    ) -> Result<Option<T>, SupabaseError> {
        let url = format!("{}&limit=1", self.rest_url(table, filters));
        let response = self.send(self.http.get(url)).await?;
        let mut rows: Vec<T> = response
            .json()
            .await
            .map_err(|err| SupabaseError::Deserialize(err.to_string()))?;
        Ok(rows.pop())
    }

    fn insert_request(&self, draft: &ProductDraft) -> RequestBuilder {
        let url = format!("{}/rest/v1/products", self.base_url);
        self.http
            .post(url)
            .header("Prefer", "return=representation")
            .json(draft)
    }

    /// PATCH by id. The draft serializes every column, so the row is
    /// replaced rather than merged.
    fn update_request(&self, id: &str, draft: &ProductDraft) -> RequestBuilder {
        let url = format!(
            "{}/rest/v1/products?id=eq.{}",
            self.base_url,
            urlencoding::encode(id)
        );
        self.http
            .patch(url)
            .header("Prefer", "return=representation")
            .json(draft)
    }

    /// Sends an insert or update and returns the written row, if any.
    async fn write_product(
        &self,
        request: RequestBuilder,
    ) -> Result<Option<Product>, SupabaseError> {
        let response = self.send(request).await?;
        let mut rows: Vec<Product> = response
            .json()
            .await
            .map_err(|err| SupabaseError::Deserialize(err.to_string()))?;
        Ok(rows.pop())
    }
}

/// A PATCH that matched nothing comes back as an empty representation.
fn updated_or_missing(row: Option<Product>, id: &str) -> Result<Product, CatalogError> {
    row.ok_or_else(|| CatalogError::MissingProduct(id.to_string()))
}

fn encode_key(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Product images in a Supabase Storage bucket.
#[derive(Debug, Clone)]
pub struct SupabaseStorage {
    client: SupabaseClient,
}

impl SupabaseStorage {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlobStore for SupabaseStorage {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        content_type: &str,
    ) -> Result<String, BlobError> {
        let key = object_key(filename);
        let request = self
            .client
            .http
            .post(self.client.object_url(&key))
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes);
        self.client.send(request).await.map_err(|err| {
            warn!(target = "ingest.supabase", key = %key, error = %err, "storage_upload_failed");
            BlobError::from(err)
        })?;
        debug!(target = "ingest.supabase", key = %key, "storage_upload_ok");
        Ok(self.client.public_url(&key))
    }
}

/// Catalog tables behind PostgREST. Columns use the same camelCase names
/// as the serialized entities.
#[derive(Debug, Clone)]
pub struct SupabaseCatalog {
    client: SupabaseClient,
}

impl SupabaseCatalog {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CatalogStore for SupabaseCatalog {
    async fn find_category_by_slug(&self, slug: &str) -> Result<Option<Category>, CatalogError> {
        Ok(self
            .client
            .fetch_first("categories", &[("slug", slug)])
            .await?)
    }

    async fn find_subcategory_by_slug(
        &self,
        slug: &str,
        category_id: &str,
    ) -> Result<Option<Subcategory>, CatalogError> {
        Ok(self
            .client
            .fetch_first(
                "subcategories",
                &[("slug", slug), ("categoryId", category_id)],
            )
            .await?)
    }

    async fn find_product_by_sku(&self, sku: &str) -> Result<Option<Product>, CatalogError> {
        Ok(self.client.fetch_first("products", &[("sku", sku)]).await?)
    }

    async fn insert_product(&self, draft: &ProductDraft) -> Result<Product, CatalogError> {
        let request = self.client.insert_request(draft);
        self.client.write_product(request).await?.ok_or_else(|| {
            CatalogError::Backend("insert returned no representation".to_string())
        })
    }

    async fn update_product(
        &self,
        id: &str,
        draft: &ProductDraft,
    ) -> Result<Product, CatalogError> {
        let request = self.client.update_request(id, draft);
        updated_or_missing(self.client.write_product(request).await?, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn client() -> SupabaseClient {
        SupabaseClient::new(&SupabaseConfig {
            base_url: "https://demo.supabase.co/".to_string(),
            service_key: "service-key".to_string(),
            bucket: "product-images".to_string(),
            timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(1),
        })
    }

    #[test]
    fn rest_urls_encode_filter_values() {
        let url = client().rest_url("subcategories", &[("slug", "a&b c"), ("categoryId", "42")]);
        assert_eq!(
            url,
            "https://demo.supabase.co/rest/v1/subcategories?select=*&slug=eq.a%26b%20c&categoryId=eq.42"
        );
    }

    #[test]
    fn storage_urls_keep_path_segments() {
        let client = client();
        assert_eq!(
            client.object_url("products/abc-front.jpg"),
            "https://demo.supabase.co/storage/v1/object/product-images/products/abc-front.jpg"
        );
        assert_eq!(
            client.public_url("products/a b.jpg"),
            "https://demo.supabase.co/storage/v1/object/public/product-images/products/a%20b.jpg"
        );
    }

    #[test]
    fn conflict_status_maps_to_catalog_conflict() {
        let err = SupabaseError::Status {
            status: StatusCode::CONFLICT,
            body: "duplicate key value violates unique constraint".to_string(),
        };
        assert!(matches!(CatalogError::from(err), CatalogError::Conflict(_)));

        let err = SupabaseError::Request("connection refused".to_string());
        assert!(matches!(CatalogError::from(err), CatalogError::Backend(_)));
    }

    fn body_json(request: &reqwest::Request) -> serde_json::Value {
        let bytes = request
            .body()
            .and_then(|body| body.as_bytes())
            .expect("buffered body");
        serde_json::from_slice(bytes).expect("json body")
    }

    #[test]
    fn update_request_replaces_every_column() {
        let client = client();
        let draft = crate::catalog::tests::draft("SKU-1", "rose-suit");
        let request = client
            .update_request("a b", &draft)
            .build()
            .expect("request");

        assert_eq!(request.method(), reqwest::Method::PATCH);
        assert_eq!(
            request.url().as_str(),
            "https://demo.supabase.co/rest/v1/products?id=eq.a%20b"
        );
        assert_eq!(request.headers()["Prefer"], "return=representation");

        let body = body_json(&request);
        assert_eq!(body["subcategoryId"], serde_json::Value::Null);
        assert_eq!(body["material"], serde_json::Value::Null);
        assert_eq!(body["colorName"], serde_json::Value::Null);
        assert_eq!(body["sku"], "SKU-1");
        assert_eq!(body["priceRange"]["max"], 2.0);
    }

    #[test]
    fn insert_request_posts_the_draft() {
        let client = client();
        let draft = crate::catalog::tests::draft("SKU-1", "rose-suit");
        let request = client.insert_request(&draft).build().expect("request");

        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().as_str(), "https://demo.supabase.co/rest/v1/products");
        assert_eq!(request.headers()["Prefer"], "return=representation");
        assert_eq!(body_json(&request)["slug"], "rose-suit");
    }

    #[test]
    fn postgrest_row_deserializes_into_product() {
        let row = serde_json::json!([{
            "id": "0b6f3c1e-7d7a-4a39-9c61-2f0f4f3e2a10",
            "name": "Rose Suit",
            "slug": "rose-suit",
            "styleCode": "ST1",
            "sku": "ROS-ST1",
            "description": "Cotton",
            "categoryId": "cat-1",
            "subcategoryId": null,
            "priceRange": { "min": 1800, "max": 2400 },
            "mainImage": "https://cdn.test/a.jpg",
            "galleryImages": [],
            "sizes": [{ "size": "M", "stock": 3, "available": true }],
            "colorName": "Rose",
            "colorCode": null,
            "material": null,
            "productCare": null,
            "additionalInfo": null,
            "isActive": true,
            "isFeatured": false,
            "isNewArrival": false,
            "tags": ["cotton"],
            "sortOrder": 2,
            "createdAt": "2026-01-05T10:00:00+00:00",
            "updatedAt": "2026-01-05T10:00:00+00:00"
        }]);
        let mut rows: Vec<Product> = serde_json::from_value(row).expect("rows");
        let product = rows.pop().expect("one row");

        assert_eq!(product.id, "0b6f3c1e-7d7a-4a39-9c61-2f0f4f3e2a10");
        assert_eq!(product.draft.sku, "ROS-ST1");
        assert_eq!(product.draft.price_range.min, 1800.0);
        assert_eq!(product.draft.sizes[0].stock, 3);
        assert_eq!(product.draft.sort_order, 2);
        assert!(product.created_at.is_some());
    }

    #[test]
    fn empty_update_representation_is_missing_product() {
        assert!(matches!(
            updated_or_missing(None, "gone"),
            Err(CatalogError::MissingProduct(id)) if id == "gone"
        ));
    }

    #[test]
    fn rejected_upload_keeps_status() {
        let err = SupabaseError::Status {
            status: StatusCode::PAYLOAD_TOO_LARGE,
            body: "too big".to_string(),
        };
        let blob = BlobError::from(err);
        assert!(matches!(&blob, BlobError::Rejected(msg) if msg.contains("413")));
    }
}
