/**
 * Routes Module
 * API route handlers
 */
pub mod auth;
pub mod courses;
pub mod health;
pub mod upload;

use axum::{
    extract::{FromRequest, FromRequestParts},
    http::Uri,
    response::IntoResponse,
};

use crate::error::AppError;

/// `Json` whose rejections render as `{message}` 400s.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// `Path` whose rejections (e.g. a non-UUID id) render as `{message}` 400s.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

/// `Query` whose rejections render as `{message}` 400s.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

/// Fallback for unmatched routes.
pub async fn not_found(uri: Uri) -> impl IntoResponse {
    AppError::NotFound(format!("Not found - {}", uri.path()))
}
