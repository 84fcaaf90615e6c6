use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use chrono::NaiveTime;
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Slot repository unavailable: {0}")]
    Unavailable(String),

    #[error("Slot overlaps an existing slot of the same barber and date")]
    Overlap,

    #[error("Slot must end after it starts, got {start}-{end}")]
    InvalidRange { start: NaiveTime, end: NaiveTime },

    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
}

impl RepositoryError {
    /// Transient store failures. Rejected writes are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RepositoryError::Unavailable(_) | RepositoryError::Database(_)
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Unknown service {service} for barber {barber_id}")]
    UnknownService { barber_id: Uuid, service: String },

    #[error("Service catalog unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecalculationError {
    #[error("Booking would overlap booked slot {0}")]
    OverlapsBooked(Uuid),

    #[error("Booking does not fit into the day")]
    OutOfDay,
}

/// Input problems of a booking request. Never retryable without correction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("No services selected")]
    NoServices,

    #[error("Selected services add up to zero minutes")]
    ZeroDuration,

    #[error("Selected services add up to more than can be booked")]
    SelectionTooLarge,

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Online bookings require a registered customer")]
    RegisteredCustomerRequired,

    #[error("Manual and guest bookings require a walk-in name and phone")]
    WalkInRequired,

    #[error("A booking cannot carry both a registered customer and walk-in data")]
    AmbiguousIdentity,

    #[error("Invalid walk-in data: {0}")]
    InvalidWalkIn(String),

    #[error("Slot belongs to another barber")]
    ForeignSlot,

    #[error("Booking is already canceled")]
    AlreadyCanceled,
}

#[derive(Debug, Error)]
pub enum BookingError {
    #[error("Slot {0} no longer exists")]
    SlotGone(Uuid),

    #[error("Slot {0} is no longer available")]
    SlotUnavailable(Uuid),

    #[error("Invalid selection: {0}")]
    InvalidSelection(#[from] SelectionError),

    #[error("Slot recalculation conflicted {attempts} times")]
    RecalculationConflict { attempts: u32 },

    #[error("Booking {0} not found")]
    BookingNotFound(Uuid),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(#[from] ValidationErrors),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl BookingError {
    /// Whether the same request may succeed when sent again unchanged. A
    /// recalculation conflict needs a fresh slot selection instead.
    pub fn is_retryable(&self) -> bool {
        match self {
            BookingError::Repository(err) => err.is_retryable(),
            _ => false,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            BookingError::SlotGone(_) | BookingError::SlotUnavailable(_) => {
                "This time is no longer available, please choose another".into()
            }
            BookingError::InvalidSelection(err) => err.to_string(),
            BookingError::RecalculationConflict { .. } => {
                "Booking failed, please try again".into()
            }
            BookingError::BookingNotFound(_) => "Booking not found".into(),
            BookingError::InvalidSchedule(_) => "Invalid opening hours".into(),
            BookingError::Repository(RepositoryError::Overlap) => {
                "This time overlaps an existing slot".into()
            }
            BookingError::Repository(err @ RepositoryError::InvalidRange { .. }) => {
                err.to_string()
            }
            BookingError::Repository(_) => "Service temporarily unavailable".into(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            BookingError::SlotGone(_) => StatusCode::GONE,
            BookingError::SlotUnavailable(_) => StatusCode::CONFLICT,
            BookingError::InvalidSelection(_) => StatusCode::BAD_REQUEST,
            BookingError::RecalculationConflict { .. } => StatusCode::CONFLICT,
            BookingError::BookingNotFound(_) => StatusCode::NOT_FOUND,
            BookingError::InvalidSchedule(_) => StatusCode::BAD_REQUEST,
            BookingError::Repository(RepositoryError::Overlap) => StatusCode::CONFLICT,
            BookingError::Repository(RepositoryError::InvalidRange { .. }) => {
                StatusCode::BAD_REQUEST
            }
            BookingError::Repository(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.user_message(),
                "details": self.to_string(),
                "retryable": self.is_retryable(),
            }
        }));

        (self.status_code(), body).into_response()
    }
}
