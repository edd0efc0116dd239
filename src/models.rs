use serde::{Serialize, Deserialize};

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub faculty: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub instagram: String,
    #[serde(default)]
    pub photo_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignUpInput {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignInInput {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user ID)
    pub exp: usize,  // Expiration time as UTC timestamp
}

#[derive(Serialize)]
pub struct AuthResponse {
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductType {
    New,
    Used,
}

impl ProductType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductType::New => "New",
            ProductType::Used => "Used",
        }
    }
}

impl Default for ProductType {
    fn default() -> Self {
        ProductType::Used
    }
}

/// A listing document. Fields a document may be missing fall back to
/// defaults on read instead of failing the whole query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub seller_id: String,
    #[serde(default)]
    pub seller_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub quantity: i64,
    #[serde(rename = "type", default)]
    pub product_type: ProductType,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub is_sold_out: bool,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

fn default_quantity() -> i64 {
    1
}

/// One favorites record per (user, product) pair. Doubles as the cart
/// line; the product fields are a snapshot taken when it was added.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Favorite {
    pub user_id: String,
    pub product_id: String,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
    #[serde(default)]
    pub added_at: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub seller_id: String,
}

/// Cart view of a favorite, rebuilt from live product data on every load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CartLine {
    pub product_id: String,
    pub seller_id: String,
    pub seller_name: String,
    pub title: String,
    pub price: f64,
    pub quantity: i64,
    pub max_quantity: i64,
    pub image: String,
}

/// A feed card: the product plus its seller's resolved display name.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogItem {
    pub product: Product,
    pub seller_name: String,
}

#[derive(Debug, Deserialize)]
pub struct NewProductInput {
    #[serde(default)]
    pub description: String,
    pub price: Option<f64>,
    #[serde(default)]
    pub location: String,
    #[serde(rename = "type")]
    pub product_type: Option<String>,
    pub quantity: Option<i64>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl NewProductInput {
    /// Checks the post form before anything touches the store or the blob
    /// directory. Returns the parsed (type, price, quantity) on success.
    pub fn validate(&self) -> Result<(ProductType, f64, i64), &'static str> {
        if self.description.trim().is_empty() {
            return Err("Description is required");
        }
        let price = match self.price {
            Some(p) if p.is_finite() && p >= 0.0 => p,
            _ => return Err("Price must be zero or greater"),
        };
        let product_type = match parse_product_type(self.product_type.as_deref()) {
            Some(t) => t,
            None => return Err("Product type must be New or Used"),
        };
        let quantity = match self.quantity {
            Some(q) if q >= 1 => q,
            _ => return Err("Quantity must be at least 1"),
        };
        if self.images.is_empty() {
            return Err("At least one product image is required");
        }
        Ok((product_type, price, quantity))
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateProductInput {
    #[serde(default)]
    pub description: String,
    pub price: Option<f64>,
    #[serde(default)]
    pub location: String,
    #[serde(rename = "type")]
    pub product_type: Option<String>,
    pub quantity: Option<i64>,
    #[serde(default)]
    pub images: Vec<String>,
}

impl UpdateProductInput {
    /// Edit form rules: every field present; quantity 0 is legal here and
    /// marks the listing sold out.
    pub fn validate(&self) -> Result<(ProductType, f64, i64), &'static str> {
        if self.description.trim().is_empty()
            || self.price.is_none()
            || self.product_type.as_deref().map_or(true, |t| t.is_empty())
            || self.quantity.is_none()
        {
            return Err("All fields are required");
        }
        let price = match self.price {
            Some(p) if p.is_finite() && p >= 0.0 => p,
            _ => return Err("Price must be zero or greater"),
        };
        let product_type = match parse_product_type(self.product_type.as_deref()) {
            Some(t) => t,
            None => return Err("Product type must be New or Used"),
        };
        let quantity = match self.quantity {
            Some(q) if q >= 0 => q,
            _ => return Err("Quantity must be zero or greater"),
        };
        Ok((product_type, price, quantity))
    }
}

fn parse_product_type(raw: Option<&str>) -> Option<ProductType> {
    match raw {
        Some("New") => Some(ProductType::New),
        Some("Used") => Some(ProductType::Used),
        _ => None,
    }
}

/// Listing titles are the first word of the description.
pub fn derive_title(description: &str) -> String {
    description
        .split_whitespace()
        .next()
        .unwrap_or("Untitled")
        .to_string()
}

#[derive(Debug, Deserialize)]
pub struct ProfileInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub faculty: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub instagram: String,
}

#[derive(Debug, Deserialize)]
pub struct PhotoUpload {
    pub image: String,
}

#[derive(Debug, Deserialize)]
pub struct AdjustQuantityInput {
    pub delta: i64,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmQuery {
    #[serde(default)]
    pub confirm: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_post() -> NewProductInput {
        NewProductInput {
            description: "Calculus textbook, barely used".to_string(),
            price: Some(150.0),
            location: "Engineering building".to_string(),
            product_type: Some("Used".to_string()),
            quantity: Some(2),
            images: vec!["aGVsbG8=".to_string()],
        }
    }

    #[test]
    fn post_input_accepts_a_valid_listing() {
        assert_eq!(valid_post().validate(), Ok((ProductType::Used, 150.0, 2)));
    }

    #[test]
    fn post_input_requires_a_description() {
        let mut input = valid_post();
        input.description = String::new();
        assert_eq!(input.validate(), Err("Description is required"));
        input.description = "   ".to_string();
        assert_eq!(input.validate(), Err("Description is required"));
    }

    #[test]
    fn post_input_rejects_missing_or_negative_price() {
        let mut input = valid_post();
        input.price = None;
        assert_eq!(input.validate(), Err("Price must be zero or greater"));
        input.price = Some(-1.0);
        assert_eq!(input.validate(), Err("Price must be zero or greater"));
        input.price = Some(f64::NAN);
        assert_eq!(input.validate(), Err("Price must be zero or greater"));
        input.price = Some(0.0);
        assert!(input.validate().is_ok());
    }

    #[test]
    fn post_input_rejects_unknown_product_types() {
        let mut input = valid_post();
        input.product_type = None;
        assert_eq!(input.validate(), Err("Product type must be New or Used"));
        input.product_type = Some("Refurbished".to_string());
        assert_eq!(input.validate(), Err("Product type must be New or Used"));
        input.product_type = Some("New".to_string());
        assert_eq!(input.validate(), Ok((ProductType::New, 150.0, 2)));
    }

    #[test]
    fn post_input_requires_a_positive_quantity() {
        let mut input = valid_post();
        input.quantity = Some(0);
        assert_eq!(input.validate(), Err("Quantity must be at least 1"));
        input.quantity = None;
        assert_eq!(input.validate(), Err("Quantity must be at least 1"));
    }

    #[test]
    fn post_input_requires_at_least_one_image() {
        let mut input = valid_post();
        input.images.clear();
        assert_eq!(input.validate(), Err("At least one product image is required"));
    }

    #[test]
    fn edit_input_requires_every_field() {
        let input = UpdateProductInput {
            description: "Lamp".to_string(),
            price: Some(40.0),
            location: String::new(),
            product_type: None,
            quantity: Some(1),
            images: Vec::new(),
        };
        assert_eq!(input.validate(), Err("All fields are required"));
    }

    #[test]
    fn edit_input_allows_quantity_zero() {
        let input = UpdateProductInput {
            description: "Lamp".to_string(),
            price: Some(40.0),
            location: "Dorm 3".to_string(),
            product_type: Some("New".to_string()),
            quantity: Some(0),
            images: Vec::new(),
        };
        assert_eq!(input.validate(), Ok((ProductType::New, 40.0, 0)));
    }

    #[test]
    fn title_is_the_first_word_of_the_description() {
        assert_eq!(derive_title("Blue bicycle, 26 inch"), "Blue");
        assert_eq!(derive_title("   spaced   out   "), "spaced");
        assert_eq!(derive_title(""), "Untitled");
    }

    #[test]
    fn favorite_quantity_defaults_to_one() {
        let favorite: Favorite =
            serde_json::from_value(json!({"user_id": "u1", "product_id": "p1"})).unwrap();
        assert_eq!(favorite.quantity, 1);
    }

    #[test]
    fn product_tolerates_missing_optional_fields() {
        let product: Product =
            serde_json::from_value(json!({"id": "p1", "seller_id": "s1"})).unwrap();
        assert_eq!(product.quantity, 0);
        assert_eq!(product.product_type, ProductType::Used);
        assert!(product.image_urls.is_empty());
        assert!(!product.is_sold_out);
    }
}
