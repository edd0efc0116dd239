use std::collections::{HashMap, HashSet};

use futures::stream::StreamExt;
use mongodb::bson::doc;
use mongodb::options::FindOptions;
use mongodb::Collection;

use crate::models::{CatalogItem, Product, User};

pub const UNKNOWN_SELLER: &str = "Unknown";

/// Resolves seller display names against the users collection, memoized
/// for the lifetime of one load so repeated sellers cost one lookup each.
/// Nothing caches across loads; a rename shows up on the next one.
pub struct SellerNames<'a> {
    users: &'a Collection<User>,
    cache: HashMap<String, String>,
}

impl<'a> SellerNames<'a> {
    pub fn new(users: &'a Collection<User>) -> Self {
        SellerNames {
            users,
            cache: HashMap::new(),
        }
    }

    pub async fn resolve(&mut self, seller_id: &str) -> String {
        if let Some(name) = self.cache.get(seller_id) {
            return name.clone();
        }
        let name = match self.users.find_one(doc! {"id": seller_id}, None).await {
            Ok(Some(user)) if !user.name.trim().is_empty() => user.name,
            Ok(_) => UNKNOWN_SELLER.to_string(),
            Err(e) => {
                log::warn!("Seller lookup failed for {}: {}", seller_id, e);
                UNKNOWN_SELLER.to_string()
            }
        };
        self.cache.insert(seller_id.to_string(), name.clone());
        name
    }
}

/// Keeps products that are in stock, not the viewer's own listings and not
/// already favorited. Order is preserved.
pub fn filter_candidates(
    products: Vec<Product>,
    viewer_id: &str,
    excluded: &HashSet<String>,
) -> Vec<Product> {
    products
        .into_iter()
        .filter(|p| p.quantity > 0 && p.seller_id != viewer_id && !excluded.contains(&p.id))
        .collect()
}

/// Loads the discovery catalog for one viewer, newest listings first.
/// Read-only; when the store errors the caller keeps whatever feed it
/// already had.
pub async fn load_catalog(
    products: &Collection<Product>,
    users: &Collection<User>,
    viewer_id: &str,
    excluded: &HashSet<String>,
) -> Result<Vec<CatalogItem>, mongodb::error::Error> {
    let filter = doc! {"quantity": {"$gt": 0}, "seller_id": {"$ne": viewer_id}};
    let options = FindOptions::builder().sort(doc! {"created_at": -1}).build();
    let mut cursor = products.find(filter, options).await?;

    let mut fetched = Vec::new();
    while let Some(result) = cursor.next().await {
        fetched.push(result?);
    }

    let mut names = SellerNames::new(users);
    let mut items = Vec::new();
    for product in filter_candidates(fetched, viewer_id, excluded) {
        let seller_name = names.resolve(&product.seller_id).await;
        items.push(CatalogItem { product, seller_name });
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(id: &str, seller_id: &str, quantity: i64) -> Product {
        Product {
            id: id.to_string(),
            seller_id: seller_id.to_string(),
            quantity,
            ..Default::default()
        }
    }

    #[test]
    fn sold_out_own_and_favorited_listings_never_surface() {
        let products = vec![
            product("a", "alice", 3),
            product("b", "bob", 0),
            product("c", "viewer", 5),
        ];
        let kept = filter_candidates(products, "viewer", &HashSet::new());
        let ids: Vec<&str> = kept.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[test]
    fn favorited_ids_are_excluded() {
        let products = vec![
            product("a", "alice", 1),
            product("b", "bob", 2),
            product("c", "carol", 2),
        ];
        let excluded: HashSet<String> = ["b".to_string()].into();
        let kept = filter_candidates(products, "viewer", &excluded);
        let ids: Vec<&str> = kept.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn candidate_order_is_preserved() {
        let products = vec![
            product("newest", "alice", 1),
            product("older", "bob", 1),
            product("oldest", "carol", 1),
        ];
        let kept = filter_candidates(products, "viewer", &HashSet::new());
        let ids: Vec<&str> = kept.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["newest", "older", "oldest"]);
    }
}
