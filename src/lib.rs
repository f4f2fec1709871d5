pub mod config;
pub mod core;
pub mod ops;
pub mod vendors;

// Re-export for easier access: use lock_automation::Reservation;
pub use crate::core::{AccessCode, AccessCodeRequest, Reservation, SyncError, SyncReport};
use crate::core::LookaheadWindow;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Booking vendor capability: who booked the court, and where the daily door
/// codes are shown to players.
#[async_trait]
pub trait BookingClient: Send + Sync {
    /// Opens an authenticated session. Must be called before anything else.
    async fn login(&mut self) -> Result<(), SyncError>;

    /// Reads the reservations of the configured owner for every day of the window.
    async fn fetch_reservations(
        &self,
        window: &LookaheadWindow,
    ) -> Result<Vec<Reservation>, SyncError>;

    /// Writes daily entry codes, keyed by day of month (1-31).
    ///
    /// `Some(code)` sets the code, `None` clears it, days not in the map keep
    /// their current value.
    async fn update_entry_codes(
        &self,
        codes: &BTreeMap<u32, Option<String>>,
    ) -> Result<(), SyncError>;
}

/// Lock vendor capability: issuing time limited access codes.
#[async_trait]
pub trait LockClient: Send + Sync {
    /// Obtains an access token. Must be called before issuing codes.
    async fn authenticate(&mut self) -> Result<(), SyncError>;

    // Issues one code valid from request.valid_from until request.valid_until
    async fn issue_code(&self, request: &AccessCodeRequest) -> Result<AccessCode, SyncError>;
}
