//! Request handlers. Each one resolves the caller, delegates to one service
//! operation and returns its result as JSON.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::NaiveDate;
use model::appointment::clock;
use model::{
    Address, AddressDraft, AppointmentStatus, Cart, CartSummary, LineItem, NotificationPage, Order,
    OrderHistoryEntry, OrderStats, PaymentMethod, PaymentMethodDraft, ServiceAppointment,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use service::{AppointmentChanges, BookAppointment, PlaceOrder, ServiceError, StatusUpdate};
use tracing::info;

use crate::AppState;
use crate::caller::Caller;
use crate::error::ApiError;
use crate::extract::{ApiJson, ApiQuery};

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Parses an optional JSON body; an empty body yields the default value.
fn optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("invalid request body: {e}")))
}

pub(crate) async fn health() -> &'static str {
    "OK"
}

pub(crate) async fn metrics(State(state): State<AppState>) -> Result<String, (StatusCode, &'static str)> {
    state.metrics.encode().map_err(|e| {
        tracing::error!("Failed to encode metrics: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics")
    })
}

// Cart

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RemoveItemBody {
    product_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateQuantityBody {
    product_id: String,
    #[serde(default)]
    variant_id: Option<String>,
    quantity: i64,
}

pub(crate) async fn get_cart(State(state): State<AppState>, Caller(me): Caller) -> ApiResult<Cart> {
    Ok(Json(state.services.carts.get(&me.user_id).await?))
}

pub(crate) async fn cart_summary(State(state): State<AppState>, Caller(me): Caller) -> ApiResult<CartSummary> {
    Ok(Json(state.services.carts.summary(&me.user_id).await?))
}

pub(crate) async fn add_to_cart(
    State(state): State<AppState>,
    Caller(me): Caller,
    ApiJson(body): ApiJson<Value>,
) -> ApiResult<Cart> {
    let item: LineItem =
        serde_json::from_value(body).map_err(|e| ServiceError::InvalidLineItem(format!("malformed line item: {e}")))?;
    Ok(Json(state.services.carts.add_item(&me.user_id, item).await?))
}

pub(crate) async fn remove_from_cart(
    State(state): State<AppState>,
    Caller(me): Caller,
    ApiJson(body): ApiJson<RemoveItemBody>,
) -> ApiResult<Cart> {
    Ok(Json(state.services.carts.remove_item(&me.user_id, &body.product_id).await?))
}

pub(crate) async fn update_quantity(
    State(state): State<AppState>,
    Caller(me): Caller,
    ApiJson(body): ApiJson<UpdateQuantityBody>,
) -> ApiResult<Cart> {
    let cart = state
        .services
        .carts
        .update_quantity(&me.user_id, &body.product_id, body.variant_id.as_deref(), body.quantity)
        .await?;
    Ok(Json(cart))
}

pub(crate) async fn save_cart(State(state): State<AppState>, Caller(me): Caller) -> ApiResult<Cart> {
    Ok(Json(state.services.carts.save_for_later(&me.user_id).await?))
}

pub(crate) async fn clear_cart(State(state): State<AppState>, Caller(me): Caller) -> ApiResult<Cart> {
    Ok(Json(state.services.carts.clear(&me.user_id).await?))
}

// Orders

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CancelBody {
    #[serde(default)]
    reason: Option<String>,
}

pub(crate) async fn place_order(
    State(state): State<AppState>,
    Caller(me): Caller,
    ApiJson(request): ApiJson<PlaceOrder>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state.services.orders.place_order(&me, request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub(crate) async fn my_orders(State(state): State<AppState>, Caller(me): Caller) -> ApiResult<Vec<Order>> {
    Ok(Json(state.services.orders.list_mine(&me).await?))
}

pub(crate) async fn all_orders(State(state): State<AppState>, Caller(me): Caller) -> ApiResult<Vec<Order>> {
    Ok(Json(state.services.orders.list_all(&me).await?))
}

pub(crate) async fn order_stats(State(state): State<AppState>, Caller(me): Caller) -> ApiResult<OrderStats> {
    Ok(Json(state.services.orders.stats(&me).await?))
}

pub(crate) async fn get_order(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<String>,
) -> ApiResult<Order> {
    Ok(Json(state.services.orders.get(&me, &id).await?))
}

pub(crate) async fn order_history(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<String>,
) -> ApiResult<Vec<OrderHistoryEntry>> {
    Ok(Json(state.services.orders.history(&me, &id).await?))
}

pub(crate) async fn update_order_status(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<String>,
    ApiJson(update): ApiJson<StatusUpdate>,
) -> ApiResult<Order> {
    Ok(Json(state.services.orders.update_status(&me, &id, update).await?))
}

pub(crate) async fn cancel_order(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Order> {
    let CancelBody { reason } = optional_body(&body)?;
    Ok(Json(state.services.orders.cancel(&me, &id, reason).await?))
}

// Addresses

pub(crate) async fn list_addresses(State(state): State<AppState>, Caller(me): Caller) -> ApiResult<Vec<Address>> {
    Ok(Json(state.services.addresses.list(&me).await?))
}

pub(crate) async fn add_address(
    State(state): State<AppState>,
    Caller(me): Caller,
    ApiJson(draft): ApiJson<AddressDraft>,
) -> Result<(StatusCode, Json<Address>), ApiError> {
    let address = state.services.addresses.add(&me, draft).await?;
    Ok((StatusCode::CREATED, Json(address)))
}

pub(crate) async fn update_address(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<String>,
    ApiJson(draft): ApiJson<AddressDraft>,
) -> ApiResult<Address> {
    Ok(Json(state.services.addresses.update(&me, &id, draft).await?))
}

pub(crate) async fn delete_address(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    state.services.addresses.delete(&me, &id).await?;
    Ok(Json(json!({ "message": "Address removed" })))
}

pub(crate) async fn default_address(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<String>,
) -> ApiResult<Address> {
    Ok(Json(state.services.addresses.set_default(&me, &id).await?))
}

// Payment methods

pub(crate) async fn list_payment_methods(
    State(state): State<AppState>,
    Caller(me): Caller,
) -> ApiResult<Vec<PaymentMethod>> {
    Ok(Json(state.services.payment_methods.list(&me).await?))
}

pub(crate) async fn add_payment_method(
    State(state): State<AppState>,
    Caller(me): Caller,
    ApiJson(draft): ApiJson<PaymentMethodDraft>,
) -> Result<(StatusCode, Json<PaymentMethod>), ApiError> {
    let method = state.services.payment_methods.add(&me, draft).await?;
    Ok((StatusCode::CREATED, Json(method)))
}

pub(crate) async fn update_payment_method(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<String>,
    ApiJson(draft): ApiJson<PaymentMethodDraft>,
) -> ApiResult<PaymentMethod> {
    Ok(Json(state.services.payment_methods.update(&me, &id, draft).await?))
}

pub(crate) async fn delete_payment_method(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    state.services.payment_methods.delete(&me, &id).await?;
    Ok(Json(json!({ "message": "Payment method removed" })))
}

pub(crate) async fn default_payment_method(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<String>,
) -> ApiResult<PaymentMethod> {
    Ok(Json(state.services.payment_methods.set_default(&me, &id).await?))
}

// Appointments

#[derive(Debug, Deserialize)]
pub(crate) struct SlotsQuery {
    date: NaiveDate,
    #[serde(default)]
    duration: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AppointmentStatusBody {
    status: AppointmentStatus,
}

pub(crate) async fn my_appointments(
    State(state): State<AppState>,
    Caller(me): Caller,
) -> ApiResult<Vec<ServiceAppointment>> {
    Ok(Json(state.services.appointments.list_mine(&me).await?))
}

pub(crate) async fn book_appointment(
    State(state): State<AppState>,
    Caller(me): Caller,
    ApiJson(request): ApiJson<BookAppointment>,
) -> Result<(StatusCode, Json<ServiceAppointment>), ApiError> {
    let appointment = state.services.appointments.book(&me, request).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

pub(crate) async fn available_slots(
    State(state): State<AppState>,
    Caller(_me): Caller,
    ApiQuery(query): ApiQuery<SlotsQuery>,
) -> ApiResult<Value> {
    let duration = query.duration.unwrap_or(state.default_slot_minutes);
    let slots = state
        .services
        .appointments
        .get_available_time_slots(query.date, duration)
        .await?;
    let slots: Vec<String> = slots.iter().map(clock::format).collect();
    Ok(Json(json!({ "date": query.date, "duration": duration, "availableSlots": slots })))
}

pub(crate) async fn get_appointment(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<String>,
) -> ApiResult<ServiceAppointment> {
    Ok(Json(state.services.appointments.get(&me, &id).await?))
}

pub(crate) async fn update_appointment(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<String>,
    ApiJson(changes): ApiJson<AppointmentChanges>,
) -> ApiResult<ServiceAppointment> {
    Ok(Json(state.services.appointments.update(&me, &id, changes).await?))
}

pub(crate) async fn cancel_appointment(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<String>,
) -> ApiResult<ServiceAppointment> {
    Ok(Json(state.services.appointments.cancel(&me, &id).await?))
}

pub(crate) async fn set_appointment_status(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<AppointmentStatusBody>,
) -> ApiResult<ServiceAppointment> {
    Ok(Json(state.services.appointments.set_status(&me, &id, body.status).await?))
}

// Notifications

#[derive(Debug, Deserialize)]
pub(crate) struct PageQuery {
    #[serde(default)]
    page: Option<u64>,
    #[serde(default)]
    limit: Option<u64>,
}

pub(crate) async fn list_notifications(
    State(state): State<AppState>,
    Caller(me): Caller,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> ApiResult<NotificationPage> {
    Ok(Json(state.services.notifications.list(&me, query.page, query.limit).await?))
}

pub(crate) async fn mark_all_read(State(state): State<AppState>, Caller(me): Caller) -> ApiResult<Value> {
    let count = state.services.notifications.mark_all_read(&me).await?;
    Ok(Json(json!({ "message": "All notifications marked as read", "count": count })))
}

pub(crate) async fn clear_read(State(state): State<AppState>, Caller(me): Caller) -> ApiResult<Value> {
    let count = state.services.notifications.clear_read(&me).await?;
    info!(user_id = %me.user_id, count, "Cleared read notifications");
    Ok(Json(json!({ "message": "Read notifications cleared", "count": count })))
}

pub(crate) async fn mark_read(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<String>,
) -> ApiResult<model::Notification> {
    Ok(Json(state.services.notifications.mark_read(&me, &id).await?))
}

pub(crate) async fn delete_notification(
    State(state): State<AppState>,
    Caller(me): Caller,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    state.services.notifications.delete(&me, &id).await?;
    Ok(Json(json!({ "message": "Notification removed" })))
}
