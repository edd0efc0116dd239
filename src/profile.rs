use actix_web::{web, HttpRequest, HttpResponse};
use futures::stream::StreamExt;
use mongodb::bson::doc;
use mongodb::options::FindOptions;
use mongodb::Collection;
use serde_json::json;

use crate::middleware::current_user;
use crate::models::{PhotoUpload, Product, ProfileInput, User};
use crate::storage::BlobStore;

pub async fn get_profile(users: web::Data<Collection<User>>, req: HttpRequest) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    match users.find_one(doc! {"id": &session.user_id}, None).await {
        Ok(Some(user)) => HttpResponse::Ok().json(json!({
            "id": user.id,
            "name": user.name,
            "email": user.email,
            "faculty": user.faculty,
            "phone": user.phone,
            "instagram": user.instagram,
            "photo_url": user.photo_url,
        })),
        Ok(None) => HttpResponse::NotFound().json("User profile not found"),
        Err(e) => {
            log::error!("Database error: {}", e);
            HttpResponse::InternalServerError().json("Internal Server Error")
        }
    }
}

pub async fn update_profile(
    users: web::Data<Collection<User>>,
    input: web::Json<ProfileInput>,
    req: HttpRequest,
) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    let update = doc! {"$set": {
        "name": &input.name,
        "faculty": &input.faculty,
        "phone": &input.phone,
        "instagram": &input.instagram,
    }};
    match users.update_one(doc! {"id": &session.user_id}, update, None).await {
        Ok(result) if result.matched_count == 1 => {
            HttpResponse::Ok().json("Profile updated successfully")
        }
        Ok(_) => HttpResponse::NotFound().json("User not found"),
        Err(e) => {
            log::error!("Database error: {}", e);
            HttpResponse::InternalServerError().json("Internal Server Error")
        }
    }
}

pub async fn upload_photo(
    users: web::Data<Collection<User>>,
    store: web::Data<BlobStore>,
    input: web::Json<PhotoUpload>,
    req: HttpRequest,
) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    let data = match BlobStore::decode_image(&input.image) {
        Ok(data) => data,
        Err(message) => return HttpResponse::BadRequest().json(message),
    };
    let url = match store.put_profile_photo(&session.user_id, &data).await {
        Ok(url) => url,
        Err(e) => {
            log::error!("Photo upload failed for {}: {}", session.user_id, e);
            return HttpResponse::InternalServerError().json("Photo upload failed");
        }
    };
    match users
        .update_one(
            doc! {"id": &session.user_id},
            doc! {"$set": {"photo_url": &url}},
            None,
        )
        .await
    {
        Ok(_) => HttpResponse::Ok().json(json!({"photo_url": url})),
        Err(e) => {
            log::error!("Database error: {}", e);
            HttpResponse::InternalServerError().json("Internal Server Error")
        }
    }
}

/// Public seller card: the fields any viewer may see.
pub async fn view_user(
    users: web::Data<Collection<User>>,
    path: web::Path<String>,
    req: HttpRequest,
) -> HttpResponse {
    if current_user(&req).is_none() {
        return HttpResponse::Unauthorized().json("Login required");
    }
    let user_id = path.into_inner();
    match users.find_one(doc! {"id": &user_id}, None).await {
        Ok(Some(user)) => HttpResponse::Ok().json(json!({
            "id": user.id,
            "name": user.name,
            "faculty": user.faculty,
            "instagram": user.instagram,
            "photo_url": user.photo_url,
        })),
        Ok(None) => HttpResponse::NotFound().json("User profile not found"),
        Err(e) => {
            log::error!("Database error: {}", e);
            HttpResponse::InternalServerError().json("Internal Server Error")
        }
    }
}

/// A seller's in-stock listings, newest first, for the profile view.
pub async fn seller_products(
    products: web::Data<Collection<Product>>,
    path: web::Path<String>,
    req: HttpRequest,
) -> HttpResponse {
    if current_user(&req).is_none() {
        return HttpResponse::Unauthorized().json("Login required");
    }
    let seller_id = path.into_inner();
    let filter = doc! {"seller_id": &seller_id, "quantity": {"$gt": 0}};
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
