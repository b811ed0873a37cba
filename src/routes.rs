//! HTTP surface. Handlers extract the caller and payload, run the command on
//! the blocking pool and shape the response.

use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};

use crate::auth::CurrentUser;
use crate::commands::{orders, promo_codes, shifts};
use crate::error::{AppError, AppResult};
use crate::models::{
    CreateOrder, OrderFilter, SavePromoCode, SaveShift, UpdateOrderStatus, ValidatePromoCode,
    WeekQuery,
};
use crate::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/orders", web::post().to(place_order))
        .route("/orders/{id}", web::get().to(get_order))
        .route("/orders/{id}/status", web::patch().to(update_order_status))
        .route("/restaurants/{id}/orders", web::get().to(list_restaurant_orders))
        .route("/promo-codes/validate", web::post().to(validate_promo_code))
        .route("/promo-codes/{id}", web::patch().to(update_promo_code))
        .route("/restaurants/{id}/promo-codes", web::get().to(list_promo_codes))
        .route("/restaurants/{id}/promo-codes", web::post().to(create_promo_code))
        .route("/restaurants/{id}/shifts", web::get().to(list_week_shifts))
        .route("/restaurants/{id}/shifts", web::post().to(create_shift))
        .route("/restaurants/{id}/shifts/weekly-hours", web::get().to(weekly_hours))
        .route("/shifts/{id}", web::patch().to(update_shift))
        .route("/shifts/{id}", web::delete().to(delete_shift));
}

/// Malformed JSON bodies are reported like any other validation failure.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        AppError::field("body", format!("The request body is invalid: {}", err)).into()
    })
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| {
        AppError::field("query", format!("The query string is invalid: {}", err)).into()
    })
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "restaurant-orders"
    }))
}

async fn place_order(
    state: web::Data<AppState>,
    user: CurrentUser,
    body: web::Json<CreateOrder>,
) -> AppResult<HttpResponse> {
    let order =
        web::block(move || orders::place_order(&state, user.0, body.into_inner())).await??;
    Ok(HttpResponse::Created().json(order))
}

async fn get_order(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let order = web::block(move || orders::get_order(&state, user.0, id)).await??;
    Ok(HttpResponse::Ok().json(order))
}

async fn update_order_status(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<UpdateOrderStatus>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let order = web::block(move || {
        orders::update_order_status(&state, user.0, id, body.into_inner())
    })
    .await??;
    Ok(HttpResponse::Ok().json(order))
}

async fn list_restaurant_orders(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
    query: web::Query<OrderFilter>,
) -> AppResult<HttpResponse> {
    let restaurant_id = path.into_inner();
    let list = web::block(move || {
        orders::list_restaurant_orders(&state, user.0, restaurant_id, query.into_inner())
    })
    .await??;
    Ok(HttpResponse::Ok().json(list))
}

/// 200 with the discount when the code applies, 422 with the reason when it
/// does not.
async fn validate_promo_code(
    state: web::Data<AppState>,
    user: CurrentUser,
    body: web::Json<ValidatePromoCode>,
) -> AppResult<HttpResponse> {
    let validation = web::block(move || {
        promo_codes::validate_promo_code(&state, user.0, body.into_inner())
    })
    .await??;

    let status = if validation.valid {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok(HttpResponse::build(status).json(validation))
}

async fn list_promo_codes(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let restaurant_id = path.into_inner();
    let codes =
        web::block(move || promo_codes::list_promo_codes(&state, user.0, restaurant_id)).await??;
    Ok(HttpResponse::Ok().json(codes))
}

async fn create_promo_code(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<SavePromoCode>,
) -> AppResult<HttpResponse> {
    let restaurant_id = path.into_inner();
    let promo = web::block(move || {
        promo_codes::create_promo_code(&state, user.0, restaurant_id, body.into_inner())
    })
    .await??;
    Ok(HttpResponse::Created().json(promo))
}

async fn update_promo_code(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<SavePromoCode>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let promo = web::block(move || {
        promo_codes::update_promo_code(&state, user.0, id, body.into_inner())
    })
    .await??;
    Ok(HttpResponse::Ok().json(promo))
}

async fn create_shift(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<SaveShift>,
) -> AppResult<HttpResponse> {
    let restaurant_id = path.into_inner();
    let shift = web::block(move || {
        shifts::create_shift(&state, user.0, restaurant_id, body.into_inner())
    })
    .await??;
    Ok(HttpResponse::Created().json(shift))
}

async fn update_shift(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
    body: web::Json<SaveShift>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let shift =
        web::block(move || shifts::update_shift(&state, user.0, id, body.into_inner())).await??;
    Ok(HttpResponse::Ok().json(shift))
}

async fn delete_shift(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    web::block(move || shifts::delete_shift(&state, user.0, id)).await??;
    Ok(HttpResponse::NoContent().finish())
}

async fn list_week_shifts(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
    query: web::Query<WeekQuery>,
) -> AppResult<HttpResponse> {
    let restaurant_id = path.into_inner();
    let week = web::block(move || {
        shifts::list_week_shifts(&state, user.0, restaurant_id, query.into_inner())
    })
    .await??;
    Ok(HttpResponse::Ok().json(week))
}

async fn weekly_hours(
    state: web::Data<AppState>,
    user: CurrentUser,
    path: web::Path<i64>,
    query: web::Query<WeekQuery>,
) -> AppResult<HttpResponse> {
    let restaurant_id = path.into_inner();
    let hours = web::block(move || {
        shifts::weekly_hours(&state, user.0, restaurant_id, query.into_inner())
    })
    .await??;
    Ok(HttpResponse::Ok().json(hours))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::USER_HEADER;
    use crate::tests::{seeded_state, CUSTOMER, OWNER, STAFF};
    use actix_web::{test, App};
    use serde_json::{json, Value};

    fn order_body(quantity: i64, promo_code: Option<&str>) -> Value {
        json!({
            "restaurant_id": 1,
            "items": [{ "menu_item_id": 1, "quantity": quantity }],
            "customer_name": "Cara Customer",
            "customer_email": "cara@example.com",
            "customer_phone": "555-0103",
            "delivery_type": "pickup",
            "payment_method": "card",
            "promo_code": promo_code,
        })
    }

    macro_rules! app {
        () => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new(seeded_state()))
                    .app_data(json_config())
                    .app_data(query_config())
                    .configure(configure),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_health() {
        let app = app!();
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_place_order_requires_user() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/orders")
            .set_json(order_body(1, None))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn test_place_order_with_promo() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/orders")
            .insert_header((USER_HEADER, CUSTOMER.to_string()))
            .set_json(order_body(2, Some("save5")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["order"]["subtotal"], json!(25.0));
        assert_eq!(body["order"]["discount_amount"], json!(5.0));
        assert_eq!(body["order"]["total_amount"], json!(20.0));
        assert_eq!(body["order"]["status"], json!("pending"));
        assert_eq!(body["items"][0]["price"], json!(12.5));
    }

    #[actix_web::test]
    async fn test_zero_quantity_is_field_error() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/orders")
            .insert_header((USER_HEADER, CUSTOMER.to_string()))
            .set_json(order_body(0, None))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(
            body["errors"]["items.0.quantity"][0],
            json!("The quantity must be at least 1.")
        );
    }

    #[actix_web::test]
    async fn test_malformed_json_is_unprocessable() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/orders")
            .insert_header((USER_HEADER, CUSTOMER.to_string()))
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_web::test]
    async fn test_validate_promo_code_statuses() {
        let app = app!();

        let req = test::TestRequest::post()
            .uri("/promo-codes/validate")
            .insert_header((USER_HEADER, CUSTOMER.to_string()))
            .set_json(json!({ "code": "SAVE5", "restaurant_id": 1, "subtotal": 25.0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["valid"], json!(true));
        assert_eq!(body["discount"]["amount"], json!(5.0));

        let req = test::TestRequest::post()
            .uri("/promo-codes/validate")
            .insert_header((USER_HEADER, CUSTOMER.to_string()))
            .set_json(json!({ "code": "SAVE5", "restaurant_id": 1, "subtotal": 10.0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["valid"], json!(false));
        assert_eq!(
            body["message"],
            json!("A minimum order amount of 20.00 is required to use this promo code.")
        );
    }

    #[actix_web::test]
    async fn test_status_update_flow() {
        let app = app!();
        let req = test::TestRequest::post()
            .uri("/orders")
            .insert_header((USER_HEADER, CUSTOMER.to_string()))
            .set_json(order_body(1, None))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let order_id = body["order"]["id"].as_i64().unwrap();
        let uri = format!("/orders/{}/status", order_id);

        // Customers cannot move their own order
        let req = test::TestRequest::patch()
            .uri(&uri)
            .insert_header((USER_HEADER, CUSTOMER.to_string()))
            .set_json(json!({ "status": "accepted" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::patch()
            .uri(&uri)
            .insert_header((USER_HEADER, STAFF.to_string()))
            .set_json(json!({ "status": "cancelled" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let req = test::TestRequest::patch()
            .uri(&uri)
            .insert_header((USER_HEADER, OWNER.to_string()))
            .set_json(json!({ "status": "pending" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], json!("Cannot update a completed or cancelled order."));
    }

    #[actix_web::test]
    async fn test_unknown_order_is_not_found() {
        let app = app!();
        let req = test::TestRequest::patch()
            .uri("/orders/999/status")
            .insert_header((USER_HEADER, STAFF.to_string()))
            .set_json(json!({ "status": "accepted" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_shift_overlap_over_http() {
        let app = app!();
        let shift = |start: &str, end: &str| {
            test::TestRequest::post()
                .uri("/restaurants/1/shifts")
                .insert_header((USER_HEADER, OWNER.to_string()))
                .set_json(json!({
                    "user_id": STAFF,
                    "date": "2026-03-02",
                    "start_time": start,
                    "end_time": end,
                }))
                .to_request()
        };

        let resp = test::call_service(&app, shift("09:00", "17:00")).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = test::call_service(&app, shift("16:00", "18:00")).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(
            body["errors"]["start_time"][0],
            json!("This shift overlaps with an existing shift for this employee.")
        );

        let resp = test::call_service(&app, shift("17:00", "21:00")).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::get()
            .uri("/restaurants/1/shifts/weekly-hours?week_start=2026-03-02")
            .insert_header((USER_HEADER, STAFF.to_string()))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body[0]["user_id"], json!(STAFF));
        assert_eq!(body[0]["hours"], json!(12.0));
    }
}
