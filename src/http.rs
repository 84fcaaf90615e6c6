use crate::availability::{compute_availability, SlotAvailability};
use crate::catalog::ServiceCatalog;
use crate::configuration::Configuration;
use crate::coordinator::{BookingCoordinator, BookingRequest};
use crate::error::{BookingError, RepositoryError};
use crate::repository::SlotRepository;
use crate::schedule::generate_slots;
use crate::types::{Booking, BookingSource, Slot};
use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

pub struct AppState<T: SlotRepository, C: ServiceCatalog, Conf: Configuration> {
    coordinator: BookingCoordinator<T, C>,
    configuration: Conf,
}

impl<T: SlotRepository, C: ServiceCatalog, Conf: Configuration> Clone for AppState<T, C, Conf> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            configuration: self.configuration.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SlotsQuery {
    barber_id: Uuid,
    date: NaiveDate,
    #[serde(default)]
    duration: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OnlineBookingRequest {
    barber_id: Uuid,
    slot_id: Uuid,
    services: Vec<String>,
    customer_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_opening_hours"))]
struct PublishRequest {
    barber_id: Uuid,
    date: NaiveDate,
    opening: NaiveTime,
    closing: NaiveTime,
    #[validate(range(min = 5, max = 480, message = "Slot length must be between 5 and 480 minutes"))]
    slot_minutes: u32,
}

fn validate_opening_hours(request: &PublishRequest) -> Result<(), ValidationError> {
    if request.opening >= request.closing {
        return Err(ValidationError::new("opening_hours")
            .with_message("Opening time must be before closing time".into()));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RemoveSlotRequest {
    slot_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CancelRequest {
    booking_id: Uuid,
}

pub fn create_app<T, C, Conf>(repository: T, catalog: C, configuration: Conf) -> Router
where
    T: SlotRepository,
    C: ServiceCatalog,
    Conf: Configuration,
{
    let coordinator = BookingCoordinator::new(
        repository,
        catalog,
        configuration.end_of_day(),
        configuration.minimum_service_minutes(),
    );
    let state = AppState {
        coordinator,
        configuration,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new()
        .route("/slots", get(get_slots::<T, C, Conf>))
        .route("/book", post(book::<T, C, Conf>));

    let admin = Router::new()
        .route("/publish", post(publish::<T, C, Conf>))
        .route("/remove", post(remove_slot::<T, C, Conf>))
        .route("/manual_book", post(manual_book::<T, C, Conf>))
        .route("/cancel", post(cancel::<T, C, Conf>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth::<T, C, Conf>,
        ));

    Router::new()
        .merge(public)
        .merge(admin)
        .with_state(state)
        .layer(cors)
}

async fn admin_auth<T: SlotRepository, C: ServiceCatalog, Conf: Configuration>(
    State(state): State<AppState<T, C, Conf>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, String)> {
    let Some(auth_header) = request.headers().get("x-admin-password") else {
        return Err((StatusCode::UNAUTHORIZED, "Missing credentials".to_string()));
    };
    if auth_header.to_str().unwrap_or("") != state.configuration.password() {
        warn!(path = %request.uri().path(), "Rejected admin request");
        return Err((StatusCode::UNAUTHORIZED, "Unauthorized".to_string()));
    }
    Ok(next.run(request).await)
}

async fn get_slots<T: SlotRepository, C: ServiceCatalog, Conf: Configuration>(
    State(state): State<AppState<T, C, Conf>>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<Vec<SlotAvailability>>, BookingError> {
    let slots = state
        .coordinator
        .repository()
        .day_slots(query.barber_id, query.date)?;
    Ok(Json(compute_availability(
        &slots,
        query.duration,
        state.coordinator.end_of_day(),
    )))
}

async fn book<T: SlotRepository, C: ServiceCatalog, Conf: Configuration>(
    State(state): State<AppState<T, C, Conf>>,
    Json(request): Json<OnlineBookingRequest>,
) -> Result<Json<Booking>, BookingError> {
    let booking = state.coordinator.book(BookingRequest {
        barber_id: request.barber_id,
        slot_id: request.slot_id,
        services: request.services,
        source: BookingSource::Online,
        customer_id: request.customer_id,
        walk_in: None,
    })?;
    Ok(Json(booking))
}

async fn manual_book<T: SlotRepository, C: ServiceCatalog, Conf: Configuration>(
    State(state): State<AppState<T, C, Conf>>,
    Json(request): Json<BookingRequest>,
) -> Result<Json<Booking>, BookingError> {
    Ok(Json(state.coordinator.book(request)?))
}

async fn publish<T: SlotRepository, C: ServiceCatalog, Conf: Configuration>(
    State(state): State<AppState<T, C, Conf>>,
    Json(request): Json<PublishRequest>,
) -> Result<Json<Vec<Slot>>, BookingError> {
    request.validate()?;

    let mut published: Vec<Slot> = Vec::new();
    for new_slot in generate_slots(
        request.barber_id,
        request.date,
        request.opening,
        request.closing,
        request.slot_minutes,
    ) {
        match state.coordinator.add_slot(new_slot) {
            Ok(slot) => published.push(slot),
            Err(BookingError::Repository(RepositoryError::Overlap)) => {}
            Err(err) => return Err(err),
        }
    }

    info!(
        barber_id = %request.barber_id,
        date = %request.date,
        count = published.len(),
        "Slots published"
    );
    Ok(Json(published))
}

async fn remove_slot<T: SlotRepository, C: ServiceCatalog, Conf: Configuration>(
    State(state): State<AppState<T, C, Conf>>,
    Json(request): Json<RemoveSlotRequest>,
) -> Result<(StatusCode, String), BookingError> {
    state.coordinator.remove_slot(request.slot_id)?;
    Ok((StatusCode::OK, "Slot removed successfully".to_string()))
}

async fn cancel<T: SlotRepository, C: ServiceCatalog, Conf: Configuration>(
    State(state): State<AppState<T, C, Conf>>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Booking>, BookingError> {
    Ok(Json(state.coordinator.cancel_booking(request.booking_id)?))
}
