//! Transport-agnostic request handling: validation, error translation and
//! lifecycle of the store and hub behind one facade.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::engine::Engine;
use crate::hub::{CancelHandle, HubError, NotificationHub, Subscription};
use crate::id::BookingId;
use crate::limits::{DEFAULT_PAGE_SIZE, MAX_BOOKING_DURATION, MAX_TITLE_LEN};
use crate::model::Booking;
use crate::observability::REQUESTS_INVALID_TOTAL;
use crate::store::{BookingStore, StoreError};

/// Outcomes a transport maps onto its own status codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    InvalidArgument(String),
    AlreadyExists(String),
    NotFound(String),
    /// Details are logged, never returned.
    Internal,
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::InvalidArgument(msg)
            | ServiceError::AlreadyExists(msg)
            | ServiceError::NotFound(msg) => f.write_str(msg),
            ServiceError::Internal => f.write_str("internal error"),
        }
    }
}

impl std::error::Error for ServiceError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub title: String,
    pub scheduled_for: DateTime<Utc>,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
    pub before: Option<DateTime<Utc>>,
    pub after: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListResponse {
    pub items: Vec<Booking>,
    pub next_cursor: Option<String>,
}

pub struct Scheduler {
    store: BookingStore,
    hub: NotificationHub,
}

impl Scheduler {
    /// Open the engine under `config.data_dir` and start the notification hub.
    pub async fn open(config: &Config) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(&config.data_dir).await?;
        let engine = Arc::new(Engine::open(config.wal_path())?);
        Self::with_engine(engine).map_err(std::io::Error::other)
    }

    pub fn with_engine(engine: Arc<Engine>) -> Result<Self, crate::engine::EngineError> {
        let hub = NotificationHub::listen(&engine)?;
        Ok(Self {
            store: BookingStore::new(engine),
            hub,
        })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        self.store.engine()
    }

    pub async fn schedule(&self, req: ScheduleRequest) -> Result<Booking, ServiceError> {
        validate_schedule(&req, Utc::now()).inspect_err(|_| reject("schedule"))?;
        self.store
            .create_booking(&req.title, req.scheduled_for, req.duration)
            .await
            .map_err(|e| match e {
                StoreError::Overlap => ServiceError::AlreadyExists(format!(
                    "an appointment has already been booked around {}",
                    req.scheduled_for.format("%a, %d %b %Y %H:%M:%S %z")
                )),
                StoreError::DurationOutOfRange => {
                    ServiceError::InvalidArgument("validation: duration is out of range".into())
                }
                e => internal("failed to create appointment", e),
            })
    }

    pub async fn list(&self, req: ListRequest) -> Result<ListResponse, ServiceError> {
        let limit = req.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        let page = self
            .store
            .list_bookings(req.cursor.as_deref(), limit, req.before, req.after)
            .await
            .map_err(|e| match e {
                StoreError::InvalidCursor(_) => {
                    reject("list");
                    ServiceError::InvalidArgument("validation: invalid cursor".into())
                }
                e => internal("failed to list bookings", e),
            })?;
        Ok(ListResponse {
            items: page.items,
            next_cursor: page.next_cursor.map(|c| c.encode()),
        })
    }

    pub async fn get(&self, booking_id: &str) -> Result<Booking, ServiceError> {
        let id = parse_id(booking_id).inspect_err(|_| reject("get"))?;
        self.store.get_booking(&id).await.map_err(|e| match e {
            StoreError::NotFound(_) => ServiceError::NotFound("booking id not found".into()),
            e => internal("failed to get booking", e),
        })
    }

    pub async fn delete(&self, booking_id: &str) -> Result<(), ServiceError> {
        let id = parse_id(booking_id).inspect_err(|_| reject("delete"))?;
        self.store
            .delete_booking(&id)
            .await
            .map_err(|e| internal("failed to delete booking", e))
    }

    /// Change signals until `signal` fires, the handle is cancelled or the
    /// scheduler shuts down.
    pub fn subscribe(&self, signal: CancellationToken) -> (Subscription, CancelHandle) {
        self.hub.subscribe(signal)
    }

    /// Stop the hub, wait for its listener, then close the engine.
    /// Returns the listener's terminal error if it failed on its own.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        self.hub.shutdown();
        let outcome = self.hub.wait().await;
        self.engine().close();
        info!("scheduler stopped");
        match outcome {
            Ok(()) | Err(HubError::Cancelled) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn validate_schedule(req: &ScheduleRequest, now: DateTime<Utc>) -> Result<(), ServiceError> {
    let invalid = |msg: &str| Err(ServiceError::InvalidArgument(format!("validation: {msg}")));
    if req.title.trim().is_empty() {
        return invalid("title cannot be blank");
    }
    if req.title.chars().count() > MAX_TITLE_LEN {
        return invalid("title is too long");
    }
    if req.scheduled_for < now {
        return invalid("cannot schedule in the past");
    }
    if req.duration.is_zero() {
        return invalid("duration must be positive");
    }
    if req.duration > MAX_BOOKING_DURATION {
        return invalid("duration is too long");
    }
    Ok(())
}

fn parse_id(text: &str) -> Result<BookingId, ServiceError> {
    text.parse()
        .map_err(|_| ServiceError::InvalidArgument("validation: bookingId is invalid".into()))
}

fn reject(op: &'static str) {
    metrics::counter!(REQUESTS_INVALID_TOTAL, "op" => op).increment(1);
}

fn internal(what: &str, e: StoreError) -> ServiceError {
    error!(err = %e, "{what}");
    ServiceError::Internal
}
