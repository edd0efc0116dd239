use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use actix_web::{web, HttpRequest, HttpResponse};
use futures::stream::StreamExt;
use mongodb::bson::doc;
use mongodb::options::{FindOptions, ReplaceOptions};
use mongodb::Collection;
use serde_json::json;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::catalog::SellerNames;
use crate::middleware::current_user;
use crate::models::{
    now_millis, AdjustQuantityInput, CartLine, ConfirmQuery, Favorite, Product, User,
};

pub const NO_TITLE: &str = "No title";

/// What a quantity adjustment should do, decided before the store is
/// touched. `max` is the product's live stock, re-fetched per request.
#[derive(Debug, PartialEq, Eq)]
pub enum QuantityChange {
    Update(i64),
    AtCapacity,
    NeedsRemoval,
}

pub fn plan_quantity_change(current: i64, max: i64, delta: i64) -> QuantityChange {
    let next = current + delta;
    if next > max {
        QuantityChange::AtCapacity
    } else if next <= 0 {
        QuantityChange::NeedsRemoval
    } else {
        QuantityChange::Update(next)
    }
}

fn line_title(product: &Product) -> String {
    if !product.title.trim().is_empty() {
        product.title.clone()
    } else if !product.description.trim().is_empty() {
        product.description.clone()
    } else {
        NO_TITLE.to_string()
    }
}

/// Product ids the user has favorited, used to keep them out of the feed.
pub async fn favorite_ids(
    favorites: &Collection<Favorite>,
    user_id: &str,
) -> Result<HashSet<String>, mongodb::error::Error> {
    let mut cursor = favorites.find(doc! {"user_id": user_id}, None).await?;
    let mut ids = HashSet::new();
    while let Some(result) = cursor.next().await {
        ids.insert(result?.product_id);
    }
    Ok(ids)
}

/// Writes the favorite record for a liked product: quantity 1 plus a
/// snapshot of the product as it looked at add time. Upserts, so liking
/// something twice keeps a single record.
pub async fn add_favorite(
    favorites: &Collection<Favorite>,
    user_id: &str,
    product: &Product,
) -> Result<(), mongodb::error::Error> {
    let record = Favorite {
        user_id: user_id.to_string(),
        product_id: product.id.clone(),
        quantity: 1,
        added_at: now_millis(),
        title: line_title(product),
        price: product.price,
        image_url: product.image_urls.first().cloned().unwrap_or_default(),
        seller_id: product.seller_id.clone(),
    };
    let filter = doc! {"user_id": user_id, "product_id": &product.id};
    let options = ReplaceOptions::builder().upsert(true).build();
    favorites.replace_one(filter, &record, options).await?;
    Ok(())
}

/// Rebuilds the whole cart projection from the favorites collection:
/// newest-added first, every line resolved against the current product
/// document so price and the quantity ceiling are live. Lines whose
/// product has vanished are dropped.
pub async fn load_cart_lines(
    favorites: &Collection<Favorite>,
    products: &Collection<Product>,
    users: &Collection<User>,
    user_id: &str,
) -> Result<Vec<CartLine>, mongodb::error::Error> {
    let options = FindOptions::builder().sort(doc! {"added_at": -1}).build();
    let mut cursor = favorites.find(doc! {"user_id": user_id}, options).await?;
    let mut records = Vec::new();
    while let Some(result) = cursor.next().await {
        records.push(result?);
    }

    let mut names = SellerNames::new(users);
    let mut lines = Vec::new();
    for record in records {
        let Some(product) = products
            .find_one(doc! {"id": &record.product_id}, None)
            .await?
        else {
            continue; // listing deleted since it was favorited
        };
        let seller_name = names.resolve(&product.seller_id).await;
        lines.push(CartLine {
            product_id: record.product_id,
            seller_id: product.seller_id.clone(),
            seller_name,
            title: line_title(&product),
            price: product.price,
            quantity: record.quantity,
            max_quantity: product.quantity,
            image: product.image_urls.first().cloned().unwrap_or_default(),
        });
    }
    Ok(lines)
}

/// Fan-out point for live cart snapshots, one watch channel per user.
/// Subscribers always receive whole replacement snapshots, never patches,
/// and dropping the receiving stream is the unsubscribe.
#[derive(Default)]
pub struct CartHub {
    channels: Mutex<HashMap<String, watch::Sender<Vec<CartLine>>>>,
}

impl CartHub {
    pub fn publish(&self, user_id: &str, lines: Vec<CartLine>) {
        let mut channels = self.channels.lock().unwrap();
        match channels.get(user_id) {
            Some(sender) => {
                sender.send_replace(lines);
            }
            None => {
                let (sender, _) = watch::channel(lines);
                channels.insert(user_id.to_string(), sender);
            }
        }
    }

    pub fn subscribe(&self, user_id: &str) -> watch::Receiver<Vec<CartLine>> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(user_id.to_string())
            .or_insert_with(|| watch::channel(Vec::new()).0)
            .subscribe()
    }
}

/// Pushes a fresh projection to the owner's live subscription. Best
/// effort: if the rebuild fails, subscribers stay on the previous
/// snapshot and the failure is logged.
pub async fn republish(
    favorites: &Collection<Favorite>,
    products: &Collection<Product>,
    users: &Collection<User>,
    hub: &CartHub,
    user_id: &str,
) {
    match load_cart_lines(favorites, products, users, user_id).await {
        Ok(lines) => hub.publish(user_id, lines),
        Err(e) => log::warn!("Could not refresh cart snapshot for {}: {}", user_id, e),
    }
}

pub async fn get_cart(
    favorites: web::Data<Collection<Favorite>>,
    products: web::Data<Collection<Product>>,
    users: web::Data<Collection<User>>,
    req: HttpRequest,
) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    match load_cart_lines(&favorites, &products, &users, &session.user_id).await {
        Ok(lines) => HttpResponse::Ok().json(lines),
        Err(e) => {
            log::error!("Failed to load cart for {}: {}", session.user_id, e);
            HttpResponse::InternalServerError().json("Internal Server Error")
        }
    }
}

/// Server-sent events stream of cart snapshots: the current projection on
/// connect, then one event per mutation. Closing the connection releases
/// the subscription.
pub async fn subscribe(
    favorites: web::Data<Collection<Favorite>>,
    products: web::Data<Collection<Product>>,
    users: web::Data<Collection<User>>,
    hub: web::Data<CartHub>,
    req: HttpRequest,
) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };

    // seed the channel so the stream opens with the latest snapshot
    republish(&favorites, &products, &users, &hub, &session.user_id).await;

    let receiver = hub.subscribe(&session.user_id);
    let stream = WatchStream::new(receiver).map(|lines| {
        let body = serde_json::to_string(&lines).unwrap_or_else(|_| "[]".to_string());
        Ok::<_, std::convert::Infallible>(web::Bytes::from(format!("data: {}\n\n", body)))
    });

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(stream)
}

pub async fn adjust_quantity(
    favorites: web::Data<Collection<Favorite>>,
    products: web::Data<Collection<Product>>,
    users: web::Data<Collection<User>>,
    hub: web::Data<CartHub>,
    path: web::Path<String>,
    input: web::Json<AdjustQuantityInput>,
    req: HttpRequest,
) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    let user_id = session.user_id;
    let product_id = path.into_inner();
    let filter = doc! {"user_id": &user_id, "product_id": &product_id};

    let record = match favorites.find_one(filter.clone(), None).await {
        Ok(Some(record)) => record,
        Ok(None) => return HttpResponse::NotFound().json("Item not found in cart"),
        Err(e) => {
            log::error!("Database error: {}", e);
            return HttpResponse::InternalServerError().json("Internal Server Error");
        }
    };
    let product = match products.find_one(doc! {"id": &product_id}, None).await {
        Ok(Some(product)) => product,
        Ok(None) => return HttpResponse::NotFound().json("Product no longer exists"),
        Err(e) => {
            log::error!("Database error: {}", e);
            return HttpResponse::InternalServerError().json("Internal Server Error");
        }
    };

    match plan_quantity_change(record.quantity, product.quantity, input.delta) {
        QuantityChange::AtCapacity => {
            HttpResponse::Conflict().json("This is the maximum quantity available.")
        }
        QuantityChange::NeedsRemoval => {
            if !input.confirm {
                return HttpResponse::Conflict()
                    .json("Confirmation required to remove this item");
            }
            match favorites.delete_one(filter, None).await {
                Ok(_) => {
                    republish(&favorites, &products, &users, &hub, &user_id).await;
                    HttpResponse::Ok().json("Item removed from cart")
                }
                Err(e) => {
                    log::error!("Failed to remove cart item: {}", e);
                    HttpResponse::InternalServerError().json("Internal Server Error")
                }
            }
        }
        QuantityChange::Update(next) => {
            match favorites
                .update_one(filter, doc! {"$set": {"quantity": next}}, None)
                .await
            {
                Ok(_) => {
                    republish(&favorites, &products, &users, &hub, &user_id).await;
                    HttpResponse::Ok().json(json!({"product_id": product_id, "quantity": next}))
                }
                Err(e) => {
                    log::error!("Failed to update cart quantity: {}", e);
                    HttpResponse::InternalServerError().json("Internal Server Error")
                }
            }
        }
    }
}

/// Unconditional removal from the cart's edit dialog. Still gated on the
/// confirm flag so a bare call cannot drop a line by accident.
pub async fn remove_item(
    favorites: web::Data<Collection<Favorite>>,
    products: web::Data<Collection<Product>>,
    users: web::Data<Collection<User>>,
    hub: web::Data<CartHub>,
    path: web::Path<String>,
    query: web::Query<ConfirmQuery>,
    req: HttpRequest,
) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    if !query.confirm {
        return HttpResponse::Conflict().json("Confirmation required to remove this item");
    }
    let product_id = path.into_inner();
    let filter = doc! {"user_id": &session.user_id, "product_id": &product_id};
    match favorites.delete_one(filter, None).await {
        Ok(result) if result.deleted_count == 1 => {
            republish(&favorites, &products, &users, &hub, &session.user_id).await;
            HttpResponse::Ok().json("Item removed from cart")
        }
        Ok(_) => HttpResponse::NotFound().json("Item not found in cart"),
        Err(e) => {
            log::error!("Failed to remove cart item: {}", e);
            HttpResponse::InternalServerError().json("Internal Server Error")
        }
    }
}

pub async fn list_favorites(
    favorites: web::Data<Collection<Favorite>>,
    req: HttpRequest,
) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    match favorite_ids(&favorites, &session.user_id).await {
        Ok(ids) => {
            let mut ids: Vec<String> = ids.into_iter().collect();
            ids.sort();
            HttpResponse::Ok().json(ids)
        }
        Err(e) => {
            log::error!("Failed to load favorites for {}: {}", session.user_id, e);
            HttpResponse::InternalServerError().json("Internal Server Error")
        }
    }
}

pub async fn add_to_favorites(
    favorites: web::Data<Collection<Favorite>>,
    products: web::Data<Collection<Product>>,
    users: web::Data<Collection<User>>,
    hub: web::Data<CartHub>,
    path: web::Path<String>,
    req: HttpRequest,
) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    let product_id = path.into_inner();
    let product = match products.find_one(doc! {"id": &product_id}, None).await {
        Ok(Some(product)) => product,
        Ok(None) => return HttpResponse::NotFound().json("Product not found"),
        Err(e) => {
            log::error!("Database error: {}", e);
            return HttpResponse::InternalServerError().json("Internal Server Error");
        }
    };
    match add_favorite(&favorites, &session.user_id, &product).await {
        Ok(()) => {
            republish(&favorites, &products, &users, &hub, &session.user_id).await;
            HttpResponse::Created().json("Added to favorites")
        }
        Err(e) => {
            log::error!("Failed to save favorite for {}: {}", session.user_id, e);
            HttpResponse::InternalServerError().json("Could not add to favorites")
        }
    }
}

pub async fn remove_from_favorites(
    favorites: web::Data<Collection<Favorite>>,
    products: web::Data<Collection<Product>>,
    users: web::Data<Collection<User>>,
    hub: web::Data<CartHub>,
    path: web::Path<String>,
    req: HttpRequest,
) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    let product_id = path.into_inner();
    let filter = doc! {"user_id": &session.user_id, "product_id": &product_id};
    match favorites.delete_one(filter, None).await {
        Ok(result) if result.deleted_count == 1 => {
            republish(&favorites, &products, &users, &hub, &session.user_id).await;
            HttpResponse::Ok().json("Removed from favorites")
        }
        Ok(_) => HttpResponse::NotFound().json("Product not found in favorites"),
        Err(e) => {
            log::error!("Failed to remove favorite: {}", e);
            HttpResponse::InternalServerError().json("Internal Server Error")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_at_the_stock_ceiling_is_rejected() {
        assert_eq!(plan_quantity_change(2, 2, 1), QuantityChange::AtCapacity);
    }

    #[test]
    fn decrement_to_zero_asks_for_removal() {
        assert_eq!(plan_quantity_change(1, 5, -1), QuantityChange::NeedsRemoval);
        assert_eq!(plan_quantity_change(2, 5, -3), QuantityChange::NeedsRemoval);
    }

    #[test]
    fn in_range_changes_are_applied() {
        assert_eq!(plan_quantity_change(1, 5, 1), QuantityChange::Update(2));
        assert_eq!(plan_quantity_change(3, 5, -1), QuantityChange::Update(2));
    }

    #[test]
    fn a_shrunk_stock_ceiling_blocks_increments() {
        // stock dropped to 1 after two were added to the cart
        assert_eq!(plan_quantity_change(2, 1, 1), QuantityChange::AtCapacity);
        assert_eq!(plan_quantity_change(2, 1, -1), QuantityChange::Update(1));
    }

    #[test]
    fn line_titles_fall_back_to_description_then_placeholder() {
        let mut product = Product {
            title: "Bike".to_string(),
            description: "Blue bicycle".to_string(),
            ..Default::default()
        };
        assert_eq!(line_title(&product), "Bike");
        product.title.clear();
        assert_eq!(line_title(&product), "Blue bicycle");
        product.description.clear();
        assert_eq!(line_title(&product), NO_TITLE);
    }

    fn line(product_id: &str, quantity: i64) -> CartLine {
        CartLine {
            product_id: product_id.to_string(),
            seller_id: "s1".to_string(),
            seller_name: "Alice".to_string(),
            title: "Bike".to_string(),
            price: 100.0,
            quantity,
            max_quantity: 5,
            image: String::new(),
        }
    }

    #[tokio::test]
    async fn subscribers_see_the_latest_snapshot_and_every_update() {
        let hub = CartHub::default();
        hub.publish("u1", vec![line("p1", 1)]);

        let mut receiver = hub.subscribe("u1");
        assert_eq!(receiver.borrow().as_slice(), &[line("p1", 1)]);

        hub.publish("u1", vec![line("p1", 2), line("p2", 1)]);
        receiver.changed().await.unwrap();
        assert_eq!(receiver.borrow().len(), 2);
    }

    #[tokio::test]
    async fn subscriptions_are_scoped_to_their_user() {
        let hub = CartHub::default();
        let receiver = hub.subscribe("u1");
        hub.publish("u2", vec![line("p9", 1)]);
        assert!(receiver.borrow().is_empty());
    }
}
