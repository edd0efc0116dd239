use actix_web::{dev::ServiceRequest, Error, HttpRequest};
use actix_web::error::ErrorUnauthorized;
use actix_web::dev::Transform;
use actix_service::{Service, forward_ready};
use actix_web::HttpMessage;
use futures::future::{ok, Ready, LocalBoxFuture};
use jsonwebtoken::{decode, DecodingKey, Validation, Algorithm};
use std::rc::Rc;

use crate::models::Claims;

/// Identity of the signed-in caller, decoded from the bearer token and
/// placed into request extensions. Created per request at the middleware
/// and gone with it; there is no ambient current-user state anywhere.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub user_id: String,
}

pub fn current_user(req: &HttpRequest) -> Option<AuthSession> {
    req.extensions().get::<AuthSession>().cloned()
}

// Middleware factory
pub struct AuthMiddleware {
    secret: String,
}

impl AuthMiddleware {
    pub fn new(secret: String) -> Self {
        AuthMiddleware { secret }
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = actix_web::dev::ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = Error;
    type Transform = AuthMiddlewareMiddleware<S>;
    type InitError = ();

    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddlewareMiddleware {
            service: Rc::new(service),
            secret: self.secret.clone(),
        })
    }
}

pub struct AuthMiddlewareMiddleware<S> {
    service: Rc<S>,
    secret: String,
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareMiddleware<S>
where
    S: Service<ServiceRequest, Response = actix_web::dev::ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = actix_web::dev::ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let secret = self.secret.clone();
        let service = self.service.clone();

        Box::pin(async move {
            let Some(auth_header) = req.headers().get("Authorization") else {
                return Err(ErrorUnauthorized("Authorization header missing"));
            };
            let Ok(auth_str) = auth_header.to_str() else {
                return Err(ErrorUnauthorized("Invalid authorization header"));
            };
            let Some(token) = auth_str.strip_prefix("Bearer ") else {
                return Err(ErrorUnauthorized("Invalid authorization scheme"));
            };

            match decode::<Claims>(
                token,
                &DecodingKey::from_secret(secret.as_ref()),
                &Validation::new(Algorithm::HS256),
            ) {
                Ok(token_data) => {
                    req.extensions_mut().insert(AuthSession {
                        user_id: token_data.claims.sub,
                    });
                    service.call(req).await
                }
                Err(_) => Err(ErrorUnauthorized("Invalid token")),
            }
        })
    }
}
