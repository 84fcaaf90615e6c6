use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::error::SelectionError;
use crate::types::{BookingSource, CustomerIdentity};

lazy_static! {
    static ref PHONE_NUMBER: Regex = Regex::new(r"^\+?[0-9][0-9 \-]{5,19}$").unwrap();
}

/// Free-text customer data a barber enters for someone without an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct WalkInDetails {
    #[validate(length(min = 1, max = 100, message = "Name must not be empty"))]
    pub name: String,
    #[validate(regex(path = *PHONE_NUMBER, message = "Phone number is malformed"))]
    pub phone: String,
}

impl CustomerIdentity {
    /// Resolves the customer of a booking from the optional request parts.
    /// Online bookings need a registered customer, manual and guest bookings
    /// need the walk-in pair, and never both at once.
    pub fn from_parts(
        source: BookingSource,
        customer_id: Option<Uuid>,
        walk_in: Option<WalkInDetails>,
    ) -> Result<Self, SelectionError> {
        match (source, customer_id, walk_in) {
            (_, Some(_), Some(_)) => Err(SelectionError::AmbiguousIdentity),
            (BookingSource::Online, Some(customer_id), None) => {
                Ok(CustomerIdentity::Registered { customer_id })
            }
            (BookingSource::Online, None, _) => Err(SelectionError::RegisteredCustomerRequired),
            (BookingSource::Manual | BookingSource::Guest, None, Some(walk_in)) => {
                let walk_in = WalkInDetails {
                    name: walk_in.name.trim().to_string(),
                    phone: walk_in.phone.trim().to_string(),
                };
                walk_in
                    .validate()
                    .map_err(|err| SelectionError::InvalidWalkIn(err.to_string()))?;
                Ok(CustomerIdentity::WalkIn {
                    name: walk_in.name,
                    phone: walk_in.phone,
                })
            }
            (BookingSource::Manual | BookingSource::Guest, _, None) => {
                Err(SelectionError::WalkInRequired)
            }
        }
    }
}
