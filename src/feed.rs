use std::collections::HashMap;
use std::sync::Mutex;

use actix_web::{web, HttpRequest, HttpResponse};
use mongodb::Collection;
use serde_json::json;

use crate::cart;
use crate::catalog;
use crate::middleware::current_user;
use crate::models::{CatalogItem, Favorite, Product, User};

/// Swipe queue for one signed-in user. `index == pending.len()` is the
/// exhausted state; `disliked` keeps skipped cards in skip order so a
/// refresh can replay them before falling back to a fresh load.
#[derive(Debug, Default)]
pub struct FeedState {
    pending: Vec<CatalogItem>,
    disliked: Vec<CatalogItem>,
    index: usize,
    image_index: usize,
}

impl FeedState {
    pub fn load(items: Vec<CatalogItem>) -> Self {
        FeedState {
            pending: items,
            disliked: Vec::new(),
            index: 0,
            image_index: 0,
        }
    }

    pub fn current(&self) -> Option<&CatalogItem> {
        self.pending.get(self.index)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current().is_none()
    }

    /// Moves forward by exactly one card and resets image navigation.
    pub fn advance(&mut self) {
        if self.index < self.pending.len() {
            self.index += 1;
        }
        self.image_index = 0;
    }

    /// Skips the active card, keeping it for a later refresh replay.
    /// Returns false when there is no active card.
    pub fn dislike(&mut self) -> bool {
        match self.current().cloned() {
            Some(item) => {
                self.disliked.push(item);
                self.advance();
                true
            }
            None => false,
        }
    }

    /// Re-shows skipped cards, oldest skip first. Only legal once the
    /// pending queue is exhausted and something was actually skipped.
    pub fn recycle_disliked(&mut self) -> bool {
        if !self.is_exhausted() || self.disliked.is_empty() {
            return false;
        }
        self.pending = std::mem::take(&mut self.disliked);
        self.index = 0;
        self.image_index = 0;
        true
    }

    pub fn image_next(&mut self) {
        if let Some(item) = self.current() {
            let count = item.product.image_urls.len();
            if count > 0 && self.image_index < count - 1 {
                self.image_index += 1;
            }
        }
    }

    pub fn image_prev(&mut self) {
        self.image_index = self.image_index.saturating_sub(1);
    }

    pub fn image_index(&self) -> usize {
        self.image_index
    }

    pub fn position(&self) -> (usize, usize) {
        (self.index, self.pending.len())
    }

    pub fn disliked_len(&self) -> usize {
        self.disliked.len()
    }
}

/// One in-memory feed per signed-in user; gone on restart. Lock scopes
/// stay short and never span an await.
#[derive(Default)]
pub struct FeedSessions {
    inner: Mutex<HashMap<String, FeedState>>,
}

impl FeedSessions {
    pub fn replace(&self, user_id: &str, state: FeedState) {
        self.inner.lock().unwrap().insert(user_id.to_string(), state);
    }

    pub fn with<R>(&self, user_id: &str, f: impl FnOnce(&mut FeedState) -> R) -> Option<R> {
        let mut map = self.inner.lock().unwrap();
        map.get_mut(user_id).map(f)
    }
}

fn view(state: &FeedState) -> serde_json::Value {
    let (position, total) = state.position();
    match state.current() {
        Some(item) => json!({
            "state": "showing",
            "position": position,
            "total": total,
            "skipped": state.disliked_len(),
            "card": item,
            "image_index": state.image_index(),
        }),
        None => json!({
            "state": "empty",
            "position": position,
            "total": total,
            "skipped": state.disliked_len(),
        }),
    }
}

fn empty_view() -> serde_json::Value {
    json!({"state": "empty", "position": 0, "total": 0, "skipped": 0})
}

async fn reload(
    products: &Collection<Product>,
    users: &Collection<User>,
    favorites: &Collection<Favorite>,
    sessions: &FeedSessions,
    user_id: &str,
) -> HttpResponse {
    let excluded = match cart::favorite_ids(favorites, user_id).await {
        Ok(ids) => ids,
        Err(e) => {
            log::error!("Failed to load favorites for {}: {}", user_id, e);
            return HttpResponse::ServiceUnavailable().json("Catalog unavailable");
        }
    };

    match catalog::load_catalog(products, users, user_id, &excluded).await {
        Ok(items) => {
            let state = FeedState::load(items);
            let body = view(&state);
            sessions.replace(user_id, state);
            HttpResponse::Ok().json(body)
        }
        Err(e) => {
            // previous feed state is left untouched
            log::error!("Catalog load failed for {}: {}", user_id, e);
            HttpResponse::ServiceUnavailable().json("Catalog unavailable")
        }
    }
}

pub async fn load_feed(
    products: web::Data<Collection<Product>>,
    users: web::Data<Collection<User>>,
    favorites: web::Data<Collection<Favorite>>,
    sessions: web::Data<FeedSessions>,
    req: HttpRequest,
) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    reload(&products, &users, &favorites, &sessions, &session.user_id).await
}

pub async fn current_card(sessions: web::Data<FeedSessions>, req: HttpRequest) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    let body = sessions
        .with(&session.user_id, |state| view(state))
        .unwrap_or_else(empty_view);
    HttpResponse::Ok().json(body)
}

pub async fn dislike(sessions: web::Data<FeedSessions>, req: HttpRequest) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    match sessions.with(&session.user_id, |state| (state.dislike(), view(state))) {
        Some((true, body)) => HttpResponse::Ok().json(body),
        _ => HttpResponse::Conflict().json("No active card"),
    }
}

pub async fn like(
    products: web::Data<Collection<Product>>,
    users: web::Data<Collection<User>>,
    favorites: web::Data<Collection<Favorite>>,
    sessions: web::Data<FeedSessions>,
    hub: web::Data<cart::CartHub>,
    req: HttpRequest,
) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    let user_id = session.user_id;

    // snapshot the active card; the lock is not held across the write
    let Some(Some(item)) = sessions.with(&user_id, |state| state.current().cloned()) else {
        return HttpResponse::Conflict().json("No active card");
    };

    match cart::add_favorite(&favorites, &user_id, &item.product).await {
        Ok(()) => {
            let body = sessions
                .with(&user_id, |state| {
                    if state
                        .current()
                        .map_or(false, |c| c.product.id == item.product.id)
                    {
                        state.advance();
                    }
                    view(state)
                })
                .unwrap_or_else(empty_view);
            cart::republish(&favorites, &products, &users, &hub, &user_id).await;
            HttpResponse::Ok().json(body)
        }
        Err(e) => {
            // a failed like never advances the feed
            log::error!("Failed to save favorite for {}: {}", user_id, e);
            HttpResponse::InternalServerError().json("Could not add to favorites")
        }
    }
}

pub async fn refresh(
    products: web::Data<Collection<Product>>,
    users: web::Data<Collection<User>>,
    favorites: web::Data<Collection<Favorite>>,
    sessions: web::Data<FeedSessions>,
    req: HttpRequest,
) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    let recycled = sessions
        .with(&session.user_id, |state| {
            state.recycle_disliked().then(|| view(state))
        })
        .flatten();
    if let Some(body) = recycled {
        return HttpResponse::Ok().json(body);
    }
    reload(&products, &users, &favorites, &sessions, &session.user_id).await
}

pub async fn image_next(sessions: web::Data<FeedSessions>, req: HttpRequest) -> HttpResponse {
    step_image(sessions, req, FeedState::image_next)
}

pub async fn image_prev(sessions: web::Data<FeedSessions>, req: HttpRequest) -> HttpResponse {
    step_image(sessions, req, FeedState::image_prev)
}

fn step_image(
    sessions: web::Data<FeedSessions>,
    req: HttpRequest,
    step: fn(&mut FeedState),
) -> HttpResponse {
    let Some(session) = current_user(&req) else {
        return HttpResponse::Unauthorized().json("Login required");
    };
    match sessions.with(&session.user_id, |state| {
        step(state);
        (state.current().is_some(), view(state))
    }) {
        Some((true, body)) => HttpResponse::Ok().json(body),
        _ => HttpResponse::Conflict().json("No active card"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Product;

    fn item(id: &str, image_count: usize) -> CatalogItem {
        CatalogItem {
            product: Product {
                id: id.to_string(),
                seller_id: format!("seller-{}", id),
                quantity: 1,
                image_urls: (0..image_count)
                    .map(|i| format!("/uploads/product_images/{}-{}.jpg", id, i))
                    .collect(),
                ..Default::default()
            },
            seller_name: "Alice".to_string(),
        }
    }

    fn current_id(state: &FeedState) -> Option<&str> {
        state.current().map(|c| c.product.id.as_str())
    }

    #[test]
    fn loading_shows_the_first_card() {
        let state = FeedState::load(vec![item("a", 1), item("b", 1)]);
        assert_eq!(current_id(&state), Some("a"));
        assert_eq!(state.position(), (0, 2));
    }

    #[test]
    fn advancing_moves_forward_by_exactly_one() {
        let mut state = FeedState::load(vec![item("a", 1), item("b", 1)]);
        state.advance();
        assert_eq!(current_id(&state), Some("b"));
        state.advance();
        assert!(state.is_exhausted());
        state.advance();
        assert_eq!(state.position(), (2, 2));
    }

    #[test]
    fn dislike_queues_the_card_and_advances() {
        let mut state = FeedState::load(vec![item("a", 1), item("b", 1)]);
        assert!(state.dislike());
        assert_eq!(current_id(&state), Some("b"));
        assert_eq!(state.disliked_len(), 1);
        assert!(state.dislike());
        assert!(state.is_exhausted());
        assert!(!state.dislike());
    }

    #[test]
    fn refresh_replays_skipped_cards_in_skip_order_exactly_once() {
        let mut state = FeedState::load(vec![item("a", 1), item("b", 1), item("c", 1)]);
        state.dislike(); // a
        state.advance(); // keep b out of the skip queue
        state.dislike(); // c
        assert!(state.is_exhausted());

        assert!(state.recycle_disliked());
        assert_eq!(current_id(&state), Some("a"));
        state.advance();
        assert_eq!(current_id(&state), Some("c"));
        state.advance();

        // everything has been replayed once; nothing is left to recycle
        assert!(state.is_exhausted());
        assert!(!state.recycle_disliked());
    }

    #[test]
    fn recycling_is_refused_while_cards_are_still_pending() {
        let mut state = FeedState::load(vec![item("a", 1), item("b", 1)]);
        state.dislike();
        assert!(!state.recycle_disliked());
        assert_eq!(current_id(&state), Some("b"));
    }

    #[test]
    fn image_navigation_is_clamped_to_the_card() {
        let mut state = FeedState::load(vec![item("a", 3), item("b", 2)]);
        state.image_prev();
        assert_eq!(state.image_index(), 0);
        state.image_next();
        state.image_next();
        state.image_next();
        assert_eq!(state.image_index(), 2);
        state.image_prev();
        assert_eq!(state.image_index(), 1);
    }

    #[test]
    fn image_index_resets_when_the_card_changes() {
        let mut state = FeedState::load(vec![item("a", 3), item("b", 2)]);
        state.image_next();
        assert_eq!(state.image_index(), 1);
        state.dislike();
        assert_eq!(state.image_index(), 0);
        state.image_next();
        state.dislike();
        assert!(state.recycle_disliked());
        assert_eq!(state.image_index(), 0);
    }

    #[test]
    fn cards_without_images_never_move_the_index() {
        let mut state = FeedState::load(vec![item("a", 0)]);
        state.image_next();
        assert_eq!(state.image_index(), 0);
    }

    #[test]
    fn sessions_are_isolated_per_user() {
        let sessions = FeedSessions::default();
        sessions.replace("u1", FeedState::load(vec![item("a", 1)]));
        sessions.replace("u2", FeedState::load(vec![item("b", 1)]));

        let first = sessions.with("u1", |s| s.current().unwrap().product.id.clone());
        let second = sessions.with("u2", |s| s.current().unwrap().product.id.clone());
        assert_eq!(first.as_deref(), Some("a"));
        assert_eq!(second.as_deref(), Some("b"));
        assert!(sessions.with("u3", |_| ()).is_none());
    }
}
