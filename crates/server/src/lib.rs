//! Server crate provides the HTTP layer of the marketplace backend.
//!
//! Handlers are thin: they resolve the caller identity from the headers set
//! by the upstream authentication layer, call one service operation and map
//! its result (or [`ServiceError`](service::ServiceError)) to an HTTP response.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::{MatchedPath, State},
    response::Response,
    routing::{get, post, put},
};
use service::Services;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};

mod caller;
mod error;
mod extract;
mod handlers;
mod metrics;
#[cfg(test)]
mod tests;

pub use caller::{Caller, USER_EMAIL_HEADER, USER_ID_HEADER, USER_ROLE_HEADER};
pub use error::{ApiError, status_of};
pub use extract::{ApiJson, ApiQuery};
use metrics::Metrics;

/// Server represents the HTTP server exposing the business operations.
pub struct Server {
    port: u16,
    state: AppState,
}

/// Application state shared between request handlers
#[derive(Clone)]
pub(crate) struct AppState {
    services: Arc<Services>,
    metrics: Arc<Metrics>,
    default_slot_minutes: u32,
}

impl Server {
    /// Creates a new Server instance.
    ///
    /// # Arguments
    ///
    /// * `port` - The port on which the server will listen
    /// * `services` - The business services handlers delegate to
    /// * `default_slot_minutes` - Appointment duration assumed when a slot query omits it
    pub fn new(port: u16, services: Arc<Services>, default_slot_minutes: u32) -> Result<Self> {
        info!("Initializing HTTP server on port {}", port);
        let metrics = Metrics::new().context("Failed to register HTTP metrics")?;

        Ok(Self {
            port,
            state: AppState {
                services,
                metrics: Arc::new(metrics),
                default_slot_minutes,
            },
        })
    }

    /// Serves requests until `shutdown` resolves, then drains in-flight
    /// requests and returns.
    pub async fn start<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();

        let listener = TcpListener::bind(("0.0.0.0", self.port))
            .await
            .context("Failed to bind to port")?;

        info!("HTTP server listening on port {}", self.port);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("Server error")?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }

    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let api = Router::new()
            .route("/api/cart", get(handlers::get_cart))
            .route("/api/cart/summary", get(handlers::cart_summary))
            .route("/api/cart/add", post(handlers::add_to_cart))
            .route("/api/cart/remove", post(handlers::remove_from_cart))
            .route("/api/cart/update-quantity", put(handlers::update_quantity))
            .route("/api/cart/save", post(handlers::save_cart))
            .route("/api/cart/clear", axum::routing::delete(handlers::clear_cart))
            .route("/api/orders", post(handlers::place_order))
            .route("/api/orders/my-orders", get(handlers::my_orders))
            .route("/api/orders/admin/all", get(handlers::all_orders))
            .route("/api/orders/admin/stats", get(handlers::order_stats))
            .route("/api/orders/{id}", get(handlers::get_order))
            .route("/api/orders/{id}/history", get(handlers::order_history))
            .route("/api/orders/{id}/status", put(handlers::update_order_status))
            .route("/api/orders/{id}/cancel", put(handlers::cancel_order))
            .route("/api/addresses", get(handlers::list_addresses).post(handlers::add_address))
            .route(
                "/api/addresses/{id}",
                put(handlers::update_address).delete(handlers::delete_address),
            )
            .route("/api/addresses/{id}/default", put(handlers::default_address))
            .route(
                "/api/payment-methods",
                get(handlers::list_payment_methods).post(handlers::add_payment_method),
            )
            .route(
                "/api/payment-methods/{id}",
                put(handlers::update_payment_method).delete(handlers::delete_payment_method),
            )
            .route("/api/payment-methods/{id}/default", put(handlers::default_payment_method))
            .route(
                "/api/appointments",
                get(handlers::my_appointments).post(handlers::book_appointment),
            )
            .route("/api/appointments/available-slots", get(handlers::available_slots))
            .route(
                "/api/appointments/{id}",
                get(handlers::get_appointment).put(handlers::update_appointment),
            )
            .route("/api/appointments/{id}/cancel", put(handlers::cancel_appointment))
            .route("/api/appointments/{id}/status", put(handlers::set_appointment_status))
            .route("/api/notifications", get(handlers::list_notifications))
            .route("/api/notifications/mark-all-read", put(handlers::mark_all_read))
            .route("/api/notifications/clear-read", axum::routing::delete(handlers::clear_read))
            .route("/api/notifications/{id}/read", put(handlers::mark_read))
            .route("/api/notifications/{id}", axum::routing::delete(handlers::delete_notification))
            .route("/health", get(handlers::health))
            .route("/metrics", get(handlers::metrics));

        api.route_layer(axum::middleware::from_fn_with_state(
            state.metrics.clone(),
            metrics_middleware,
        ))
        .with_state(state)
    }
}

/// Middleware for collecting metrics on HTTP requests, labelled by route
/// template so ids do not explode label cardinality.
async fn metrics_middleware(
    State(metrics): State<Arc<Metrics>>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Response {
    let method = req.method().to_string();
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let start = std::time::Instant::now();
    let response = next.run(req).await;

    metrics.record_request(&method, &endpoint, response.status().as_u16(), start.elapsed());
    response
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
