use mongodb::{Client, options::ClientOptions, Database, IndexModel};
use mongodb::bson::doc;
use mongodb::options::IndexOptions;
use std::env;

use crate::models::{Favorite, Product, User};

pub async fn connect() -> Database {
    // Retrieve the MongoDB connection string from environment variables
    let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let client_options = ClientOptions::parse(&database_url)
        .await
        .expect("Failed to parse MongoDB connection string");

    let client = Client::with_options(client_options).expect("Failed to initialize MongoDB client");

    client.database("campus_market")
}

/// Indexes behind the hot queries: the catalog scan (in-stock, newest
/// first), seller listings, and per-user favorites. The favorites pair
/// index is unique so one (user, product) record can ever exist.
pub async fn ensure_indexes(db: &Database) {
    let products = db.collection::<Product>("products");
    let favorites = db.collection::<Favorite>("favorites");
    let users = db.collection::<User>("users");

    let catalog = IndexModel::builder()
        .keys(doc! {"quantity": 1, "created_at": -1})
        .build();
    if let Err(e) = products.create_index(catalog, None).await {
        log::warn!("Failed to create product index: {}", e);
    }
    let by_seller = IndexModel::builder()
        .keys(doc! {"seller_id": 1, "created_at": -1})
        .build();
    if let Err(e) = products.create_index(by_seller, None).await {
        log::warn!("Failed to create product index: {}", e);
    }

    let pair = IndexModel::builder()
        .keys(doc! {"user_id": 1, "product_id": 1})
        .options(IndexOptions::builder().unique(true).build())
        .build();
    if let Err(e) = favorites.create_index(pair, None).await {
        log::warn!("Failed to create favorites index: {}", e);
    }
    let recency = IndexModel::builder()
        .keys(doc! {"user_id": 1, "added_at": -1})
        .build();
    if let Err(e) = favorites.create_index(recency, None).await {
        log::warn!("Failed to create favorites index: {}", e);
    }

    let email = IndexModel::builder()
        .keys(doc! {"email": 1})
        .options(IndexOptions::builder().unique(true).build())
        .build();
    if let Err(e) = users.create_index(email, None).await {
        log::warn!("Failed to create users index: {}", e);
    }
}
