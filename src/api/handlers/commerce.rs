use std::sync::Arc;

use crate::{
    auth::AuthUser,
    commerce::WooCommerceClient,
    types::{AppError, OrderDetails, OrderQuery, ProductQuery, ProductsResponse, Result},
    AppState,
};
use axum::{
    extract::{Query, State},
    Json,
};

pub(crate) fn commerce(state: &AppState) -> Result<Arc<WooCommerceClient>> {
    state
        .commerce
        .clone()
        .ok_or_else(|| AppError::Upstream("Shop integration is not configured".to_string()))
}

/// Search shop products
#[utoipa::path(
    get,
    path = "/api/wordpress",
    params(ProductQuery),
    responses(
        (status = 200, description = "Matching products", body = ProductsResponse),
        (status = 502, description = "Shop unavailable")
    ),
    tag = "commerce",
    security(("bearer" = []))
)]
pub async fn search_products(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Query(query): Query<ProductQuery>,
) -> Result<Json<ProductsResponse>> {
    tracing::debug!(user_id = %claims.sub, search = ?query.search, category = ?query.category, "Product search");

    let products = commerce(&state)?
        .find_products(query.search.as_deref(), query.category.as_deref())
        .await?;

    Ok(Json(ProductsResponse { products }))
}

/// Look up an order by number and postcode
#[utoipa::path(
    get,
    path = "/api/wordpress/order",
    params(OrderQuery),
    responses(
        (status = 200, description = "Order details", body = OrderDetails),
        (status = 400, description = "Missing order number or postcode"),
        (status = 404, description = "No matching order")
    ),
    tag = "commerce"
)]
pub async fn find_order(
    State(state): State<AppState>,
    Query(query): Query<OrderQuery>,
) -> Result<Json<OrderDetails>> {
    let (Some(number), Some(postcode)) = (
        query.order_number.filter(|n| !n.trim().is_empty()),
        query.postcode.filter(|p| !p.trim().is_empty()),
    ) else {
        return Err(AppError::InvalidInput(
            "Bestellnummer und Postleitzahl sind erforderlich".to_string(),
        ));
    };

    Ok(Json(commerce(&state)?.find_order(&number, &postcode).await?))
}
