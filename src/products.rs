use actix_web::{web, HttpRequest, HttpResponse};
use futures::stream::StreamExt;
use mongodb::bson::doc;
use mongodb::options::FindOptions;
use mongodb::Collection;
use uuid::Uuid;

use crate::catalog::UNKNOWN_SELLER;
use crate::middleware::current_user;
use crate::models::{
    derive_title, now_millis, NewProductInput, Product, UpdateProductInput, User,
};
use crate::storage::{BlobStore, PUBLIC_PREFIX};

async fn seller_display_name(users: &Collection<User>, user_id: &str) -> String {
    match users.find_one(doc! {"id": user_id}, None).await {
        Ok(Some(user)) if !user.name.trim().is_empty() => user.name,
        Ok(Some(user)) => user.email,
        Ok(None) => UNKNOWN_SELLER.to_string(),
        Err(e) => {
            log::warn!("Seller lookup failed for {}: {}", user_id, e);
            UNKNOWN_SELLER.to_string()
        }
    }
}

pub async fn add_product(
    products: web::Data<Collection<Product>>,
    users: web::Data<Collection<User>>,
    store: web::Data<BlobStore>,
    input: web::Json<NewProductInput>,
    req: HttpRequest,
) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    let (product_type, price, quantity) = match input.validate() {
        Ok(parsed) => parsed,
        Err(message) => return HttpResponse::BadRequest().json(message),
    };

    // all payloads must decode before the first blob is written
    let mut decoded = Vec::with_capacity(input.images.len());
    for payload in &input.images {
        match BlobStore::decode_image(payload) {
            Ok(data) => decoded.push(data),
            Err(message) => return HttpResponse::BadRequest().json(message),
        }
    }

    let seller_name = seller_display_name(&users, &session.user_id).await;

    // one upload at a time; a failure aborts the post and leaves the
    // blobs already written behind
    let mut image_urls = Vec::with_capacity(decoded.len());
    for data in &decoded {
        match store.put_product_image(data).await {
            Ok(url) => image_urls.push(url),
            Err(e) => {
                log::error!(
                    "Image upload failed after {} of {}, aborting post: {}",
                    image_urls.len(),
                    decoded.len(),
                    e
                );
                return HttpResponse::InternalServerError()
                    .json(format!("Image upload failed: {}", e));
            }
        }
    }

    let product = Product {
        id: Uuid::new_v4().to_string(),
        seller_id: session.user_id.clone(),
        seller_name,
        title: derive_title(&input.description),
        description: input.description.clone(),
        price,
        quantity,
        product_type,
        location: input.location.clone(),
        image_urls,
        is_sold_out: false,
        created_at: now_millis(),
        updated_at: None,
    };

    match products.insert_one(&product, None).await {
        Ok(_) => HttpResponse::Created().json(product),
        Err(e) => {
            log::error!("Failed to insert product: {}", e);
            HttpResponse::InternalServerError().json("Internal Server Error")
        }
    }
}

enum ImageEntry {
    Existing(String),
    New(Vec<u8>),
}

pub async fn update_product(
    products: web::Data<Collection<Product>>,
    store: web::Data<BlobStore>,
    path: web::Path<String>,
    input: web::Json<UpdateProductInput>,
    req: HttpRequest,
) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    let (product_type, price, quantity) = match input.validate() {
        Ok(parsed) => parsed,
        Err(message) => return HttpResponse::BadRequest().json(message),
    };
    let product_id = path.into_inner();

    // entries that already point at storage are kept as-is, the rest are
    // fresh payloads uploaded in list order
    let mut entries = Vec::with_capacity(input.images.len());
    for entry in &input.images {
        if entry.starts_with("http") || entry.starts_with(PUBLIC_PREFIX) {
            entries.push(ImageEntry::Existing(entry.clone()));
        } else {
            match BlobStore::decode_image(entry) {
                Ok(data) => entries.push(ImageEntry::New(data)),
                Err(message) => return HttpResponse::BadRequest().json(message),
            }
        }
    }

    let mut image_urls = Vec::with_capacity(entries.len());
    for entry in entries {
        match entry {
            ImageEntry::Existing(url) => image_urls.push(url),
            ImageEntry::New(data) => match store.put_product_image(&data).await {
                Ok(url) => image_urls.push(url),
                Err(e) => {
                    log::error!("Image upload failed, aborting edit of {}: {}", product_id, e);
                    return HttpResponse::InternalServerError()
                        .json(format!("Image upload failed: {}", e));
                }
            },
        }
    }

    let filter = doc! {"id": &product_id, "seller_id": &session.user_id};
    let update = doc! {"$set": {
        "description": &input.description,
        "price": price,
        "quantity": quantity,
        "type": product_type.as_str(),
        "location": &input.location,
        "image_urls": image_urls,
        "is_sold_out": quantity == 0,
        "updated_at": now_millis(),
    }};

    match products.update_one(filter, update, None).await {
        Ok(result) if result.matched_count == 1 => {
            HttpResponse::Ok().json("Product updated successfully")
        }
        Ok(_) => HttpResponse::NotFound().json("Product not found or not owned by the user"),
        Err(e) => {
            log::error!("Database error: {}", e);
            HttpResponse::InternalServerError().json("Internal Server Error")
        }
    }
}

pub async fn delete_product(
    products: web::Data<Collection<Product>>,
    store: web::Data<BlobStore>,
    path: web::Path<String>,
    req: HttpRequest,
) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    let product_id = path.into_inner();
    let filter = doc! {"id": &product_id, "seller_id": &session.user_id};

    let product = match products.find_one(filter.clone(), None).await {
        Ok(Some(product)) => product,
        Ok(None) => {
            return HttpResponse::NotFound().json("Product not found or not owned by the user")
        }
        Err(e) => {
            log::error!("Database error: {}", e);
            return HttpResponse::InternalServerError().json("Internal Server Error");
        }
    };

    // blob cleanup is best effort; the record goes away regardless
    for url in &product.image_urls {
        if let Err(e) = store.delete_by_url(url).await {
            log::warn!("Could not delete image {}: {}", url, e);
        }
    }

    match products.delete_one(filter, None).await {
        Ok(result) if result.deleted_count == 1 => {
            HttpResponse::Ok().json("Product deleted successfully")
        }
        Ok(_) => HttpResponse::NotFound().json("Product not found or not owned by the user"),
        Err(e) => {
            log::error!("Database error: {}", e);
            HttpResponse::InternalServerError().json("Internal Server Error")
        }
    }
}

pub async fn my_products(
    products: web::Data<Collection<Product>>,
    req: HttpRequest,
) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    let filter = doc! {"seller_id": &session.user_id};
    let options = FindOptions::builder().sort(doc! {"created_at": -1}).build();
    let mut cursor = match products.find(filter, options).await {
        Ok(cursor) => cursor,
        Err(e) => {
            log::error!("Database error: {}", e);
            return HttpResponse::InternalServerError().json("Internal Server Error");
        }
    };

    let mut items = Vec::new();
    while let Some(result) = cursor.next().await {
        match result {
            Ok(product) => items.push(product),
            Err(e) => {
                log::error!("Database error: {}", e);
                return HttpResponse::InternalServerError().json("Internal Server Error");
            }
        }
    }
    HttpResponse::Ok().json(items)
}
