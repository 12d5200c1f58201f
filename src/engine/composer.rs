use futures::FutureExt;
use time::OffsetDateTime;
use tracing::{debug, error, warn};
use ulid::Ulid;

use super::conflict::{find_conflicts, find_item_conflicts, ConflictScope};
use super::{Engine, EngineError};
use crate::interval::TimeInterval;
use crate::model::{
    Booking, BookingEvent, BookingRequest, BookingService, BookingStatus, Client,
    MultiBookingRequest,
};
use crate::observability;
use crate::store::Tx;

impl Engine {
    /// Book one service. Runs the full attempt pipeline: validate master
    /// data, compute the buffer-inclusive interval, then check-and-commit
    /// under advisory locks inside a serializable transaction.
    pub async fn create_booking(&self, req: BookingRequest) -> Result<Booking, EngineError> {
        self.maybe_sweep().await;
        let started = std::time::Instant::now();
        let result = self.create_booking_inner(req).await;
        metrics::histogram!(observability::CREATE_BOOKING_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        log_outcome("create_booking", &result);
        result
    }

    /// Book several services back to back as one appointment. Line items are
    /// laid out sequentially; each may run under a different staff member.
    pub async fn create_multi_service_booking(
        &self,
        req: MultiBookingRequest,
    ) -> Result<Booking, EngineError> {
        self.maybe_sweep().await;
        let started = std::time::Instant::now();
        let result = self.create_multi_inner(req).await;
        metrics::histogram!(observability::CREATE_BOOKING_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        log_outcome("create_multi_service_booking", &result);
        result
    }

    async fn create_booking_inner(&self, req: BookingRequest) -> Result<Booking, EngineError> {
        let salon = self
            .store()
            .salon(&req.salon_id)
            .ok_or(EngineError::SalonNotFound(req.salon_id))?;
        let staff = self.resolve_staff(&salon, req.staff)?;
        let service = self.salon_service(&salon, req.service_id)?;
        let client = self
            .store()
            .client(&req.client_id)
            .ok_or(EngineError::ClientNotFound(req.client_id))?;

        // The stored span opens `before` ahead of the requested start and
        // runs the full padded duration past it.
        let buffers = salon.buffers;
        let actual_start = req.start - buffers.before();
        let actual_end = req.start + buffers.padded(service.duration_min);
        if actual_end <= actual_start {
            return Err(EngineError::InvalidTimeRange { start: actual_start, end: actual_end });
        }

        let row = Booking {
            id: Ulid::new(),
            salon_id: salon.id,
            client_id: client.id,
            staff_id: Some(staff.id),
            service_id: Some(service.id),
            start_time: actual_start,
            end_time: actual_end,
            duration_min: service.duration_min,
            price_cents: service.price_cents,
            status: initial_status(&client),
            canceled_at: None,
            created_at: OffsetDateTime::now_utc(),
            is_multi_service: false,
            notes: req.notes,
        };
        let keys = vec![format!("client:{}", client.id), format!("staff:{}", staff.id)];
        let staff_id = staff.id;

        let stored = self
            .coordinator()
            .run_serializable(self.store(), move |tx| {
                let row = row.clone();
                let keys = keys.clone();
                async move {
                    tx.acquire_locks(&keys).await;
                    guard_client(tx, &row).await?;
                    guard_staff(tx, staff_id, &row.interval()).await?;
                    tx.insert_booking(row.clone(), Vec::new());
                    Ok(row)
                }
                .boxed()
            })
            .await?;

        self.finish_commit(&client, stored).await
    }

    async fn create_multi_inner(&self, req: MultiBookingRequest) -> Result<Booking, EngineError> {
        if req.items.is_empty() {
            return Err(EngineError::EmptyServiceList);
        }
        let salon = self
            .store()
            .salon(&req.salon_id)
            .ok_or(EngineError::SalonNotFound(req.salon_id))?;
        let client = self
            .store()
            .client(&req.client_id)
            .ok_or(EngineError::ClientNotFound(req.client_id))?;

        // Lay the line items out contiguously: processing time pads every
        // hand-off between services, the trailing buffer lands on the last
        // item only, and the parent spans the whole sequence.
        let buffers = salon.buffers;
        let booking_id = Ulid::new();
        let actual_start = req.start - buffers.before();
        let mut cursor = actual_start;
        let mut items: Vec<BookingService> = Vec::with_capacity(req.items.len());
        let mut service_minutes = 0u32;
        let mut price_cents = 0i64;
        let last = req.items.len() - 1;

        for (index, item) in req.items.iter().enumerate() {
            let staff = self.resolve_staff(&salon, item.staff)?;
            let service = self.salon_service(&salon, item.service_id)?;
            let mut occupancy = service.duration_min as i64;
            if index < last {
                occupancy += buffers.processing_min as i64;
            } else {
                occupancy += buffers.after_min as i64;
            }
            let end = cursor + time::Duration::minutes(occupancy);
            items.push(BookingService {
                booking_id,
                service_id: service.id,
                staff_id: staff.id,
                order: index as u32 + 1,
                start_time: cursor,
                end_time: end,
                duration_min: service.duration_min,
                price_cents: service.price_cents,
            });
            service_minutes += service.duration_min;
            price_cents += service.price_cents;
            cursor = end;
        }
        if cursor <= actual_start {
            return Err(EngineError::InvalidTimeRange { start: actual_start, end: cursor });
        }

        let row = Booking {
            id: booking_id,
            salon_id: salon.id,
            client_id: client.id,
            staff_id: None,
            service_id: None,
            start_time: actual_start,
            end_time: cursor,
            duration_min: service_minutes,
            price_cents,
            status: initial_status(&client),
            canceled_at: None,
            created_at: OffsetDateTime::now_utc(),
            is_multi_service: true,
            notes: req.notes,
        };

        let mut keys = vec![format!("client:{}", client.id)];
        keys.extend(items.iter().map(|i| format!("staff:{}", i.staff_id)));

        let stored = self
            .coordinator()
            .run_serializable(self.store(), move |tx| {
                let row = row.clone();
                let items = items.clone();
                let keys = keys.clone();
                async move {
                    tx.acquire_locks(&keys).await;
                    guard_client(tx, &row).await?;
                    for item in &items {
                        guard_staff(tx, item.staff_id, &item.interval()).await?;
                    }
                    tx.insert_booking(row.clone(), items);
                    Ok(row)
                }
                .boxed()
            })
            .await?;

        self.finish_commit(&client, stored).await
    }

    /// Cancel an active booking, releasing its slot. Used by staff action,
    /// by the compensating path of the hold flow, and exposed to embedders.
    pub async fn cancel_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let stored = self
            .coordinator()
            .run_serializable(self.store(), move |tx| {
                async move {
                    let Some(probe) = tx.booking(&booking_id).await else {
                        return Err(EngineError::BookingNotFound(booking_id));
                    };
                    let mut keys = vec![format!("client:{}", probe.client_id)];
                    if let Some(staff_id) = probe.staff_id {
                        keys.push(format!("staff:{staff_id}"));
                    }
                    for item in tx.line_items(&booking_id).await {
                        keys.push(format!("staff:{}", item.staff_id));
                    }
                    tx.acquire_locks(&keys).await;

                    let Some(fresh) = tx.booking(&booking_id).await else {
                        return Err(EngineError::BookingNotFound(booking_id));
                    };
                    if !fresh.status.is_active() {
                        return Err(EngineError::InvalidTransition {
                            booking_id,
                            from: fresh.status,
                            to: BookingStatus::Canceled,
                        });
                    }
                    let now = OffsetDateTime::now_utc();
                    tx.cancel_active(booking_id, now);
                    Ok(Booking {
                        status: BookingStatus::Canceled,
                        canceled_at: Some(now),
                        ..fresh
                    })
                }
                .boxed()
            })
            .await?;

        metrics::counter!(observability::BOOKINGS_CANCELED_TOTAL).increment(1);
        self.notify_hub()
            .send(stored.salon_id, &BookingEvent::Canceled { booking_id: stored.id });
        Ok(stored)
    }

    /// Confirm a provisional hold once the client verifies. Fails cleanly
    /// with an invalid transition if the sweep canceled the hold first.
    pub async fn confirm_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let stored = self
            .coordinator()
            .run_serializable(self.store(), move |tx| {
                async move {
                    let Some(probe) = tx.booking(&booking_id).await else {
                        return Err(EngineError::BookingNotFound(booking_id));
                    };
                    let mut keys = vec![format!("client:{}", probe.client_id)];
                    if let Some(staff_id) = probe.staff_id {
                        keys.push(format!("staff:{staff_id}"));
                    }
                    tx.acquire_locks(&keys).await;

                    let Some(fresh) = tx.booking(&booking_id).await else {
                        return Err(EngineError::BookingNotFound(booking_id));
                    };
                    if fresh.status != BookingStatus::Pending {
                        return Err(EngineError::InvalidTransition {
                            booking_id,
                            from: fresh.status,
                            to: BookingStatus::Confirmed,
                        });
                    }
                    tx.confirm_pending(booking_id);
                    Ok(Booking { status: BookingStatus::Confirmed, ..fresh })
                }
                .boxed()
            })
            .await?;

        metrics::counter!(observability::BOOKINGS_CONFIRMED_TOTAL).increment(1);
        self.notify_hub().send(
            stored.salon_id,
            &BookingEvent::Committed {
                booking_id: stored.id,
                staff_id: stored.staff_id,
                interval: stored.interval(),
                status: stored.status,
            },
        );
        if let Some(client) = self.store().client(&stored.client_id)
            && let Err(e) = self.notifier().booking_confirmation(&client, &stored).await
        {
            // Never rolls back a confirmed booking.
            warn!("confirmation notice failed for booking {}: {e}", stored.id);
        }
        Ok(stored)
    }

    /// Post-commit phase: broadcast the event, then run the notify leg of
    /// the two-phase flow. A failed verification request deprovisions the
    /// hold it was meant to activate.
    async fn finish_commit(
        &self,
        client: &Client,
        booking: Booking,
    ) -> Result<Booking, EngineError> {
        self.notify_hub().send(
            booking.salon_id,
            &BookingEvent::Committed {
                booking_id: booking.id,
                staff_id: booking.staff_id,
                interval: booking.interval(),
                status: booking.status,
            },
        );

        if booking.status == BookingStatus::Pending {
            metrics::counter!(observability::BOOKINGS_PENDING_TOTAL).increment(1);
            if let Err(e) = self.notifier().verification_request(client, &booking).await {
                error!(
                    "verification notice failed for booking {}; releasing the hold: {e}",
                    booking.id
                );
                if let Err(cancel_err) = self.cancel_booking(booking.id).await {
                    error!(
                        "compensating cancel failed for booking {}: {cancel_err}",
                        booking.id
                    );
                }
                return Err(EngineError::NotificationFailed(e.to_string()));
            }
        } else {
            metrics::counter!(observability::BOOKINGS_CONFIRMED_TOTAL).increment(1);
            if let Err(e) = self.notifier().booking_confirmation(client, &booking).await {
                warn!("confirmation notice failed for booking {}: {e}", booking.id);
            }
        }
        Ok(booking)
    }
}

fn initial_status(client: &Client) -> BookingStatus {
    if client.verified {
        BookingStatus::Confirmed
    } else {
        BookingStatus::Pending
    }
}

/// Client-side checks, coarse rule first so the caller gets the specific
/// "you already have an appointment here" message before a generic conflict.
async fn guard_client(tx: &Tx, booking: &Booking) -> Result<(), EngineError> {
    let open = tx
        .open_salon_bookings_for_client(&booking.client_id, &booking.salon_id, booking.created_at)
        .await;
    if !open.is_empty() {
        return Err(EngineError::AlreadyBooked { salon_id: booking.salon_id });
    }

    let span = booking.interval();
    let existing = tx
        .active_bookings_overlapping(ConflictScope::Client, &booking.client_id, &span, None)
        .await;
    if let Some(hit) = find_conflicts(&span, booking.client_id, ConflictScope::Client, &existing, None)
        .into_iter()
        .next()
    {
        return Err(EngineError::ClientConflict {
            client_id: booking.client_id,
            interval: hit.interval,
        });
    }
    Ok(())
}

/// Staff-side check over both single-service bookings and multi-service
/// line items, against fresh reads taken inside the transaction.
async fn guard_staff(tx: &Tx, staff_id: Ulid, span: &TimeInterval) -> Result<(), EngineError> {
    let bookings = tx
        .active_bookings_overlapping(ConflictScope::Staff, &staff_id, span, None)
        .await;
    if let Some(hit) = find_conflicts(span, staff_id, ConflictScope::Staff, &bookings, None)
        .into_iter()
        .next()
    {
        return Err(EngineError::StaffConflict { staff_id, interval: hit.interval });
    }

    let items = tx.active_line_items_overlapping(&staff_id, span, None).await;
    if let Some(hit) = find_item_conflicts(span, staff_id, &items, None).into_iter().next() {
        return Err(EngineError::StaffConflict { staff_id, interval: hit.interval });
    }
    Ok(())
}

fn log_outcome(op: &str, result: &Result<Booking, EngineError>) {
    match result {
        Ok(booking) => {
            debug!(booking = %booking.id, status = ?booking.status, "{op} committed");
        }
        Err(e) if e.is_conflict() => {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            debug!("{op} rejected: {e}");
        }
        Err(e) if e.is_business() => debug!("{op} invalid: {e}"),
        Err(e) => warn!("{op} failed: {e}"),
    }
}
