use crate::catalog::CatalogStore;
use crate::images::RowImages;
use crate::pipeline::RowError;
use crate::tabular::{CellValue, RawRow};
use chrono::Utc;
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};
use tracing::debug;
use xxhash_rust::xxh64::xxh64;

/// Recognised spreadsheet columns.
pub mod columns {
    pub const NAME: &str = "name";
    pub const DESCRIPTION: &str = "description";
    pub const CATEGORY_SLUG: &str = "categorySlug";
    pub const SUBCATEGORY_SLUG: &str = "subcategorySlug";
    pub const PRICE_MIN: &str = "priceMin";
    pub const PRICE_MAX: &str = "priceMax";
    pub const MAIN_IMAGE: &str = "mainImage";
    pub const GALLERY_IMAGES: &str = "galleryImages";
    pub const SIZES: &str = "sizes";
    pub const MATERIAL: &str = "material";
    pub const PRODUCT_CARE: &str = "productCare";
    pub const ADDITIONAL_INFO: &str = "additionalInfo";
    pub const COLOR_NAME: &str = "colorName";
    pub const COLOR_CODE: &str = "colorCode";
    pub const STYLE_CODE: &str = "styleCode";
    pub const SKU: &str = "sku";
    pub const SLUG: &str = "slug";
    pub const IS_ACTIVE: &str = "isActive";
    pub const IS_FEATURED: &str = "isFeatured";
    pub const IS_NEW_ARRIVAL: &str = "isNewArrival";
    pub const TAGS: &str = "tags";
    pub const SORT_ORDER: &str = "sortOrder";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StyleCodeStrategy {
    /// Timestamp plus a random suffix; re-running a sheet creates new codes.
    Random,
    /// xxh64 of name, colour and category; stable across re-runs and
    /// toolchain upgrades.
    Deterministic,
}

impl StyleCodeStrategy {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "random" => Some(StyleCodeStrategy::Random),
            "deterministic" | "stable" => Some(StyleCodeStrategy::Deterministic),
            _ => None,
        }
    }
}

/// Typed view of a [`RawRow`]. Text columns are trimmed and blank cells are
/// `None`; columns that need coercion keep their cell value. Flag columns
/// keep blank cells so that a present-but-blank flag reads as false.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductRow {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category_slug: Option<String>,
    pub subcategory_slug: Option<String>,
    pub price_min: Option<CellValue>,
    pub price_max: Option<CellValue>,
    pub main_image: Option<String>,
    pub gallery_images: Option<String>,
    pub sizes: Option<String>,
    pub material: Option<String>,
    pub product_care: Option<String>,
    pub additional_info: Option<String>,
    pub color_name: Option<String>,
    pub color_code: Option<String>,
    pub style_code: Option<String>,
    pub sku: Option<String>,
    pub slug: Option<String>,
    pub is_active: Option<CellValue>,
    pub is_featured: Option<CellValue>,
    pub is_new_arrival: Option<CellValue>,
    pub tags: Option<String>,
    pub sort_order: Option<CellValue>,
}

impl ProductRow {
    pub fn from_raw(raw: &RawRow) -> Self {
        use columns::*;
        let cell = |column: &str| raw.get(column).filter(|v| !v.is_blank()).cloned();
        let flag = |column: &str| raw.get(column).cloned();
        Self {
            name: raw.text(NAME),
            description: raw.text(DESCRIPTION),
            category_slug: raw.text(CATEGORY_SLUG),
            subcategory_slug: raw.text(SUBCATEGORY_SLUG),
            price_min: cell(PRICE_MIN),
            price_max: cell(PRICE_MAX),
            main_image: raw.text(MAIN_IMAGE),
            gallery_images: raw.text(GALLERY_IMAGES),
            sizes: raw.text(SIZES),
            material: raw.text(MATERIAL),
            product_care: raw.text(PRODUCT_CARE),
            additional_info: raw.text(ADDITIONAL_INFO),
            color_name: raw.text(COLOR_NAME),
            color_code: raw.text(COLOR_CODE),
            style_code: raw.text(STYLE_CODE),
            sku: raw.text(SKU),
            slug: raw.text(SLUG),
            is_active: flag(IS_ACTIVE),
            is_featured: flag(IS_FEATURED),
            is_new_arrival: flag(IS_NEW_ARRIVAL),
            tags: raw.text(TAGS),
            sort_order: cell(SORT_ORDER),
        }
    }

    /// Label used in failure reports.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeStock {
    pub size: String,
    pub stock: u32,
    pub available: bool,
}

/// A validated product, ready to be written to the catalog. Every field is
/// serialized, `None` as `null`, so a write replaces the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductDraft {
    pub name: String,
    pub slug: String,
    pub style_code: String,
    pub sku: String,
    pub description: String,
    pub category_id: String,
    pub subcategory_id: Option<String>,
    pub price_range: PriceRange,
    pub main_image: String,
    pub gallery_images: Vec<String>,
    pub sizes: Vec<SizeStock>,
    pub color_name: Option<String>,
    pub color_code: Option<String>,
    pub material: Option<String>,
    pub product_care: Option<String>,
    pub additional_info: Option<String>,
    pub is_active: bool,
    pub is_featured: bool,
    pub is_new_arrival: bool,
    pub tags: Vec<String>,
    pub sort_order: i64,
}

pub struct Normalizer<'a> {
    catalog: &'a dyn CatalogStore,
    style_codes: StyleCodeStrategy,
}

impl<'a> Normalizer<'a> {
    pub fn new(catalog: &'a dyn CatalogStore, style_codes: StyleCodeStrategy) -> Self {
        Self {
            catalog,
            style_codes,
        }
    }

    /// Validates a row and derives the missing identity fields. Stops at the
    /// first rule the row breaks.
    pub async fn normalize(
        &self,
        row: &ProductRow,
        images: &RowImages,
        row_index: usize,
    ) -> Result<ProductDraft, RowError> {
        let name = required(&row.name, columns::NAME)?;
        let description = required(&row.description, columns::DESCRIPTION)?;
        let category_slug = required(&row.category_slug, columns::CATEGORY_SLUG)?;

        let category = self
            .catalog
            .find_category_by_slug(&category_slug)
            .await
            .map_err(|err| RowError::UpstreamPersistence(err.to_string()))?
            .ok_or_else(|| RowError::CategoryNotFound(category_slug.clone()))?;

        let subcategory_id = match &row.subcategory_slug {
            Some(slug) => {
                let subcategory = self
                    .catalog
                    .find_subcategory_by_slug(slug, &category.id)
                    .await
                    .map_err(|err| RowError::UpstreamPersistence(err.to_string()))?
                    .ok_or_else(|| RowError::SubcategoryNotFound {
                        slug: slug.clone(),
                        category: category_slug.clone(),
                    })?;
                Some(subcategory.id)
            }
            None => None,
        };

        let price_range = parse_price_range(row.price_min.as_ref(), row.price_max.as_ref())?;

        let main_image = images.main_url().to_string();
        if main_image.is_empty() {
            let reason = match &images.main {
                Some(main) => format!("`{}` did not resolve to a URL", main.reference.as_str()),
                None => "is required".to_string(),
            };
            return Err(RowError::validation(columns::MAIN_IMAGE, reason));
        }

        let style_code = match &row.style_code {
            Some(code) => code.clone(),
            None => self.generate_style_code(&name, row.color_name.as_deref(), &category_slug),
        };
        let sku = match &row.sku {
            Some(sku) => sku.clone(),
            None => generate_sku(row.color_name.as_deref(), row.color_code.as_deref(), &style_code),
        };
        let slug = generate_slug(row.slug.as_deref().unwrap_or(&name));
        if slug.is_empty() {
            return Err(RowError::validation(
                columns::SLUG,
                "slug has no letters or digits",
            ));
        }

        debug!(
            target = "ingest.normalize",
            row = row_index + 1,
            sku = %sku,
            category = %category.slug,
            "row_normalized"
        );

        Ok(ProductDraft {
            name,
            slug,
            style_code,
            sku,
            description,
            category_id: category.id,
            subcategory_id,
            price_range,
            main_image,
            gallery_images: images.gallery_urls(),
            sizes: row.sizes.as_deref().map(parse_sizes).unwrap_or_default(),
            color_name: row.color_name.clone(),
            color_code: row.color_code.clone(),
            material: row.material.clone(),
            product_care: row.product_care.clone(),
            additional_info: row.additional_info.clone(),
            is_active: row.is_active.as_ref().map(parse_flag).unwrap_or(true),
            is_featured: row.is_featured.as_ref().map(parse_flag).unwrap_or(false),
            is_new_arrival: row.is_new_arrival.as_ref().map(parse_flag).unwrap_or(false),
            tags: row.tags.as_deref().map(parse_tags).unwrap_or_default(),
            sort_order: row.sort_order.as_ref().map(parse_sort_order).unwrap_or(0),
        })
    }

    fn generate_style_code(&self, name: &str, color: Option<&str>, category: &str) -> String {
        match self.style_codes {
            StyleCodeStrategy::Random => {
                let suffix: String = rand::rng()
                    .sample_iter(&Alphanumeric)
                    .take(4)
                    .map(|b| char::from(b).to_ascii_uppercase())
                    .collect();
                format!("ST{}{}", Utc::now().timestamp_millis(), suffix)
            }
            StyleCodeStrategy::Deterministic => {
                let key = format!(
                    "{}\u{1f}{}\u{1f}{}",
                    name.trim().to_lowercase(),
                    color.unwrap_or("").trim().to_lowercase(),
                    category.trim().to_lowercase()
                );
                format!("ST{:010}", xxh64(key.as_bytes(), 0) % 10_000_000_000)
            }
        }
    }
}

fn required(value: &Option<String>, field: &'static str) -> Result<String, RowError> {
    value
        .clone()
        .ok_or_else(|| RowError::validation(field, "is required"))
}

/// Lower-case, ASCII letters and digits only, words joined by single hyphens.
pub fn generate_slug(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_separator = false;
    for ch in input.trim().to_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('-');
            }
            pending_separator = false;
            slug.push(ch);
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_separator = true;
        }
    }
    slug
}

/// `<COL>-<styleCode>`, where `COL` is the first three letters of the colour
/// name (then colour code), or `GEN` when neither has three letters.
pub fn generate_sku(color_name: Option<&str>, color_code: Option<&str>, style_code: &str) -> String {
    let prefix = [color_name, color_code]
        .into_iter()
        .flatten()
        .map(|value| {
            value
                .chars()
                .filter(char::is_ascii_alphabetic)
                .take(3)
                .collect::<String>()
                .to_ascii_uppercase()
        })
        .find(|prefix| prefix.len() == 3)
        .unwrap_or_else(|| "GEN".to_string());
    format!("{prefix}-{style_code}")
}

/// `S:10, M:5, XL` → sizes in order; bad or missing stock counts as zero.
pub fn parse_sizes(value: &str) -> Vec<SizeStock> {
    value
        .split(',')
        .filter_map(|token| {
            let (size, stock) = token.split_once(':').unwrap_or((token, ""));
            let size = size.trim().to_uppercase();
            if size.is_empty() {
                return None;
            }
            Some(SizeStock {
                size,
                stock: stock.trim().parse::<u32>().unwrap_or(0),
                available: true,
            })
        })
        .collect()
}

pub fn parse_flag(value: &CellValue) -> bool {
    match value {
        CellValue::Bool(flag) => *flag,
        other => matches!(other.as_text().to_lowercase().as_str(), "true" | "1" | "yes"),
    }
}

pub fn parse_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_sort_order(value: &CellValue) -> i64 {
    match value {
        CellValue::Number(n) if n.is_finite() && n.fract() == 0.0 => *n as i64,
        CellValue::Number(_) => 0,
        other => other.as_text().parse::<i64>().unwrap_or(0),
    }
}

fn parse_price(value: &CellValue, field: &'static str) -> Result<f64, RowError> {
    let price = match value {
        CellValue::Number(n) => *n,
        CellValue::Text(text) => text.trim().parse::<f64>().map_err(|_| {
            RowError::validation(field, format!("`{}` is not a number", text.trim()))
        })?,
        CellValue::Bool(_) => {
            return Err(RowError::validation(field, "expected a number, found a boolean"));
        }
    };
    if !price.is_finite() || price < 0.0 {
        return Err(RowError::validation(
            field,
            "must be a non-negative number",
        ));
    }
    Ok(price)
}

/// A lone price fills both ends; no prices mean a zero range.
fn parse_price_range(
    min: Option<&CellValue>,
    max: Option<&CellValue>,
) -> Result<PriceRange, RowError> {
    let min = min.map(|v| parse_price(v, columns::PRICE_MIN)).transpose()?;
    let max = max.map(|v| parse_price(v, columns::PRICE_MAX)).transpose()?;
    let (min, max) = match (min, max) {
        (Some(min), Some(max)) => (min, max),
        (Some(only), None) | (None, Some(only)) => (only, only),
        (None, None) => (0.0, 0.0),
    };
    if min > max {
        return Err(RowError::validation(
            columns::PRICE_MIN,
            format!("minimum price {min} exceeds maximum price {max}"),
        ));
    }
    Ok(PriceRange { min, max })
}
