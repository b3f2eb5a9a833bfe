use crate::normalize::ProductDraft;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("product `{0}` does not exist")]
    MissingProduct(String),
    #[error("catalog request failed: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subcategory {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub category_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    #[serde(flatten)]
    pub draft: ProductDraft,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Persistence for categories, subcategories and products.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_category_by_slug(&self, slug: &str) -> Result<Option<Category>, CatalogError>;

    async fn find_subcategory_by_slug(
        &self,
        slug: &str,
        category_id: &str,
    ) -> Result<Option<Subcategory>, CatalogError>;

    async fn find_product_by_sku(&self, sku: &str) -> Result<Option<Product>, CatalogError>;

    async fn insert_product(&self, draft: &ProductDraft) -> Result<Product, CatalogError>;

    async fn update_product(&self, id: &str, draft: &ProductDraft)
    -> Result<Product, CatalogError>;
}

/// Categories to preload into [`InMemoryCatalog`], read from YAML:
///
/// ```yaml
/// categories:
///   - name: Suits Set
///     slug: suits-set
///     subcategories:
///       - name: Flared Suit Sets
///         slug: flared-suit-sets
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub categories: Vec<CategorySeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategorySeed {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub subcategories: Vec<SubcategorySeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubcategorySeed {
    pub name: String,
    pub slug: String,
}

impl CatalogSeed {
    pub fn from_yaml(raw: &str) -> Result<Self, CatalogError> {
        serde_yaml::from_str(raw).map_err(|err| CatalogError::Backend(err.to_string()))
    }

    pub async fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| CatalogError::Backend(format!("{}: {err}", path.display())))?;
        Self::from_yaml(&raw)
    }
}

#[derive(Default)]
struct CatalogState {
    categories: Vec<Category>,
    subcategories: Vec<Subcategory>,
    products: BTreeMap<String, Product>,
}

/// Process-local catalog. SKU and slug are unique across products.
#[derive(Default)]
pub struct InMemoryCatalog {
    state: Mutex<CatalogState>,
}

impl InMemoryCatalog {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: CatalogSeed) -> Self {
        let mut state = CatalogState::default();
        for category in seed.categories {
            let category_id = Uuid::new_v4().to_string();
            for sub in category.subcategories {
                state.subcategories.push(Subcategory {
                    id: Uuid::new_v4().to_string(),
                    name: sub.name,
                    slug: sub.slug,
                    category_id: category_id.clone(),
                });
            }
            state.categories.push(Category {
                id: category_id,
                name: category.name,
                slug: category.slug,
            });
        }
        info!(
            target = "ingest.catalog",
            categories = state.categories.len(),
            subcategories = state.subcategories.len(),
            "catalog_seeded"
        );
        Self {
            state: Mutex::new(state),
        }
    }

    #[cfg(test)]
    pub async fn products(&self) -> Vec<Product> {
        self.state.lock().await.products.values().cloned().collect()
    }

    #[cfg(test)]
    pub async fn product_count(&self) -> usize {
        self.state.lock().await.products.len()
    }
}

fn slug_taken(state: &CatalogState, slug: &str, except_id: Option<&str>) -> bool {
    state
        .products
        .values()
        .any(|product| product.draft.slug == slug && Some(product.id.as_str()) != except_id)
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn find_category_by_slug(&self, slug: &str) -> Result<Option<Category>, CatalogError> {
        let state = self.state.lock().await;
        Ok(state.categories.iter().find(|c| c.slug == slug).cloned())
    }

    async fn find_subcategory_by_slug(
        &self,
        slug: &str,
        category_id: &str,
    ) -> Result<Option<Subcategory>, CatalogError> {
        let state = self.state.lock().await;
        Ok(state
            .subcategories
            .iter()
            .find(|s| s.slug == slug && s.category_id == category_id)
            .cloned())
    }

    async fn find_product_by_sku(&self, sku: &str) -> Result<Option<Product>, CatalogError> {
        let state = self.state.lock().await;
        Ok(state
            .products
            .values()
            .find(|p| p.draft.sku == sku)
            .cloned())
    }

    async fn insert_product(&self, draft: &ProductDraft) -> Result<Product, CatalogError> {
        let mut state = self.state.lock().await;
        if state.products.values().any(|p| p.draft.sku == draft.sku) {
            return Err(CatalogError::Conflict(format!(
                "sku `{}` already exists",
                draft.sku
            )));
        }
        if slug_taken(&state, &draft.slug, None) {
            return Err(CatalogError::Conflict(format!(
                "slug `{}` already in use",
                draft.slug
            )));
        }
        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            draft: draft.clone(),
            created_at: Some(now),
            updated_at: Some(now),
        };
        state.products.insert(product.id.clone(), product.clone());
        Ok(product)
    }

    async fn update_product(
        &self,
        id: &str,
        draft: &ProductDraft,
    ) -> Result<Product, CatalogError> {
        let mut state = self.state.lock().await;
        if !state.products.contains_key(id) {
            return Err(CatalogError::MissingProduct(id.to_string()));
        }
        if slug_taken(&state, &draft.slug, Some(id)) {
            return Err(CatalogError::Conflict(format!(
                "slug `{}` already in use",
                draft.slug
            )));
        }
        let product = state
            .products
            .get_mut(id)
            .ok_or_else(|| CatalogError::MissingProduct(id.to_string()))?;
        product.draft = draft.clone();
        product.updated_at = Some(Utc::now());
        Ok(product.clone())
    }
}
