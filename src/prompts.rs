//! Instruction sets and the response schema sent with every page.
//!
//! Each supported catalog family gets its own instruction text because their
//! page layouts encode prices differently (Natura prints refills next to the
//! main product, Belcorp mixes three sub-brands in one catalog). Keeping the
//! text here lets unit tests inspect it without calling a model.
//!
//! Callers can override the text via
//! [`crate::config::ExtractionConfig::instructions`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;

/// Catalog family, selecting the instruction text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Brand {
    /// Esika, L'BEL and Cyzone catalogs.
    Belcorp,
    Natura,
    /// Any other product catalog. (default)
    #[default]
    Generic,
}

impl Brand {
    /// Brand stamped on records that do not name one.
    pub fn default_label(&self) -> &'static str {
        match self {
            Brand::Belcorp => "Belcorp",
            Brand::Natura => "Natura",
            Brand::Generic => NOT_AVAILABLE,
        }
    }

    pub fn instruction_text(&self) -> &'static str {
        match self {
            Brand::Belcorp => BELCORP_INSTRUCTIONS,
            Brand::Natura => NATURA_INSTRUCTIONS,
            Brand::Generic => GENERIC_INSTRUCTIONS,
        }
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Brand::Belcorp => f.write_str("Belcorp"),
            Brand::Natura => f.write_str("Natura"),
            Brand::Generic => f.write_str("Generic"),
        }
    }
}

impl FromStr for Brand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "belcorp" | "esika" | "lbel" | "l'bel" | "cyzone" => Ok(Brand::Belcorp),
            "natura" => Ok(Brand::Natura),
            "generic" | "" => Ok(Brand::Generic),
            other => Err(format!(
                "unknown brand '{other}' (expected belcorp, natura or generic)"
            )),
        }
    }
}

/// Key of the wrapping object in JSON-mode replies.
pub const PRODUCTS_FIELD: &str = "products";

/// Placeholder for brand/campaign when neither the page nor the config names one.
pub const NOT_AVAILABLE: &str = "N/A";

/// Everything a page worker needs to build its request and stamp its records.
#[derive(Debug, Clone, PartialEq)]
pub struct BrandInstructions {
    pub brand: Brand,
    /// Full system prompt: instruction text followed by the schema.
    pub prompt: String,
    pub default_brand: String,
    pub default_campaign: String,
}

impl BrandInstructions {
    /// Built-in instructions for `brand`.
    pub fn for_brand(brand: Brand) -> Self {
        Self::with_text(brand, brand.instruction_text())
    }

    /// Custom instruction text; the schema is still appended.
    pub fn with_text(brand: Brand, text: &str) -> Self {
        let schema = response_schema();
        let prompt = format!(
            "{}\n\nRespond with JSON only: an object whose \"{}\" field is an array matching this JSON schema:\n{}",
            text.trim_end(),
            PRODUCTS_FIELD,
            serde_json::to_string_pretty(&schema).unwrap_or_default()
        );
        Self {
            brand,
            prompt,
            default_brand: brand.default_label().to_string(),
            default_campaign: NOT_AVAILABLE.to_string(),
        }
    }

    /// Campaign stamped on records that do not carry one.
    pub fn with_campaign(mut self, campaign: impl Into<String>) -> Self {
        let campaign = campaign.into();
        if !campaign.trim().is_empty() {
            self.default_campaign = campaign.trim().to_string();
        }
        self
    }
}

/// JSON schema for one page's reply: an array of product objects.
///
/// `brand` and `campaign` are optional; the pipeline fills them in when the
/// page does not show them. `pageNumber` is never requested.
pub fn response_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "code":         { "type": "string", "description": "Product code or SKU, keep leading zeros." },
                "name":         { "type": "string", "description": "Product name, including variant (shade, scent)." },
                "presentation": { "type": "string", "description": "Unit of the content, e.g. ml, gr, units." },
                "content":      { "type": "number", "description": "Numeric content, e.g. 750 for 750ml." },
                "offerPrice":   { "type": "number", "description": "Promotional price, 0 when none is shown." },
                "regularPrice": { "type": "number", "description": "Original or struck-through price." },
                "brand":        { "type": "string", "description": "Brand printed on the page, if any." },
                "campaign":     { "type": "string", "description": "Campaign id as YYYYCC, if printed." }
            },
            "required": ["code", "name", "regularPrice"]
        }
    })
}

const BELCORP_INSTRUCTIONS: &str = r#"You extract product listings from one page of a BELCORP catalog (Esika, L'BEL, Cyzone).

Rules:

1. PRODUCT FIELDS
   - brand: one of Esika, LBel or Cyzone (write L'BEL as LBel). The same value applies to the whole catalog.
   - campaign: look for text such as "C-09/2025" and write it as YYYYCC, e.g. 202509. Applies to every product.
   - code: the product code, keep any leading zero.
   - name: the product name. For sets or kits, include the components. For variants (shades, scents), emit one record per variant, combining the main name with the variant name.
   - presentation / content: unit ("ml" or "gr") and its numeric value. Leave both empty for sets and kits.

2. PRICES
   - regularPrice: the original price ("valorizado en", "precio regular", or struck through).
   - offerPrice: the promotional price, usually the most prominent one. If only a discount percentage is shown, compute it from the regular price. If a per-unit price is shown, multiply it by the content. Use 0 when there is no offer price.

3. VALIDITY
   - Only emit a product that has a code, a name and at least a regular price.
   - A product block is a visually distinct area (border, background) or a tight cluster of product text.
   - Emit a product every time it appears; never deduplicate by code."#;

const NATURA_INSTRUCTIONS: &str = r#"You extract product listings from one page of a Natura catalog.

Rules:

1. PRODUCT FIELDS
   - brand: always "Natura".
   - campaign: look for text such as "C-09/2025" and write it as YYYYCC, e.g. 202509. Applies to every product.
   - code: the product code.
   - name: the product name. Emit one record per variant. Prefix refills with "Repuesto ".
   - presentation / content: unit ("ml" or "gr") and its numeric value. Leave both empty for accessories, sets and kits.

2. PRICES
   - Work one product block (a self-contained visual area) at a time.
   - If the block does not mention "repuesto" (any case, singular or plural): emit ONE record with regularPrice (original or struck-through price) and offerPrice (promotional price).
   - If the block mentions "repuesto": emit TWO records. The regular product uses the code and prices away from the word "repuesto"; the refill uses the code and prices next to it, its name prefixed with "Repuesto ", and offerPrice 0 unless an offer is printed for it.

3. VALIDITY
   - Only emit a product that has a code, a name and a regular price.
   - Emit a product every time it appears; a code on two pages is two records."#;

const GENERIC_INSTRUCTIONS: &str = r#"You extract product listings from one page of a product catalog.

For each product on the page, report:
   - code: the product code or SKU.
   - name: the product name.
   - presentation: the unit of the content (ml, L, g, kg, units).
   - content: the numeric content value (750 and "ml" for "750ml").
   - offerPrice: the discounted or offer price.
   - regularPrice: the original or regular price.
   - brand and campaign, when printed on the page.

All prices and contents are plain numbers: no currency symbols, units or thousands separators.
Use 0 for a missing number and an empty string for missing text."#;
