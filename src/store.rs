use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::{OwnedMutexGuard, RwLock};
use ulid::Ulid;

use crate::engine::{ConflictScope, EngineError, LockManager};
use crate::interval::{overlaps_decomposed, TimeInterval};
use crate::model::{
    Absence, AbsenceStatus, Booking, BookingService, BookingStatus, Client, Salon, Service, Staff,
};

/// Authoritative in-memory store. Master data (salons, staff, services,
/// clients, absences) is administered externally and read-only to the
/// engine; the booking table is the one shared mutable resource and all
/// writes to it go through a [`Tx`].
pub struct BookingStore {
    salons: DashMap<Ulid, Salon>,
    staff: DashMap<Ulid, Staff>,
    services: DashMap<Ulid, Service>,
    clients: DashMap<Ulid, Client>,
    absences: DashMap<Ulid, Absence>,
    bookings: RwLock<BookingTable>,
    transactional: bool,
}

struct BookingTable {
    /// Bumped once per committed write batch; the optimistic serialization
    /// point for the whole table.
    version: u64,
    rows: HashMap<Ulid, Booking>,
    line_items: HashMap<Ulid, Vec<BookingService>>,
}

impl BookingTable {
    fn new() -> Self {
        Self {
            version: 0,
            rows: HashMap::new(),
            line_items: HashMap::new(),
        }
    }
}

impl Default for BookingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BookingStore {
    pub fn new() -> Self {
        Self::with_transactions(true)
    }

    /// Degraded mode: commits skip the serialization check. Callers get no
    /// isolation guarantee and the coordinator will not retry.
    pub fn without_transactions() -> Self {
        Self::with_transactions(false)
    }

    fn with_transactions(transactional: bool) -> Self {
        Self {
            salons: DashMap::new(),
            staff: DashMap::new(),
            services: DashMap::new(),
            clients: DashMap::new(),
            absences: DashMap::new(),
            bookings: RwLock::new(BookingTable::new()),
            transactional,
        }
    }

    pub fn supports_transactions(&self) -> bool {
        self.transactional
    }

    // ── Master data ──────────────────────────────────────────

    pub fn upsert_salon(&self, salon: Salon) {
        self.salons.insert(salon.id, salon);
    }

    pub fn salon(&self, id: &Ulid) -> Option<Salon> {
        self.salons.get(id).map(|e| e.value().clone())
    }

    pub fn upsert_staff(&self, staff: Staff) {
        self.staff.insert(staff.id, staff);
    }

    pub fn staff_member(&self, id: &Ulid) -> Option<Staff> {
        self.staff.get(id).map(|e| e.value().clone())
    }

    /// Active staff of one salon, ordered by id for deterministic
    /// "any available" resolution.
    pub fn active_staff(&self, salon_id: &Ulid) -> Vec<Staff> {
        let mut out: Vec<Staff> = self
            .staff
            .iter()
            .filter(|e| e.value().salon_id == *salon_id && e.value().active)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|s| s.id);
        out
    }

    pub fn upsert_service(&self, service: Service) {
        self.services.insert(service.id, service);
    }

    pub fn service(&self, id: &Ulid) -> Option<Service> {
        self.services.get(id).map(|e| e.value().clone())
    }

    pub fn upsert_client(&self, client: Client) {
        self.clients.insert(client.id, client);
    }

    pub fn client(&self, id: &Ulid) -> Option<Client> {
        self.clients.get(id).map(|e| e.value().clone())
    }

    pub fn set_client_verified(&self, id: &Ulid, verified: bool) -> bool {
        match self.clients.get_mut(id) {
            Some(mut c) => {
                c.verified = verified;
                true
            }
            None => false,
        }
    }

    pub fn upsert_absence(&self, absence: Absence) {
        self.absences.insert(absence.id, absence);
    }

    pub fn approved_absences(&self, staff_id: &Ulid, window: &TimeInterval) -> Vec<Absence> {
        let mut out: Vec<Absence> = self
            .absences
            .iter()
            .filter(|e| {
                let a = e.value();
                a.staff_id == *staff_id
                    && a.status == AbsenceStatus::Approved
                    && a.interval().overlaps(window)
            })
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|a| a.start);
        out
    }

    // ── Booking reads ────────────────────────────────────────

    pub async fn booking(&self, id: &Ulid) -> Option<Booking> {
        self.bookings.read().await.rows.get(id).cloned()
    }

    pub async fn line_items(&self, booking_id: &Ulid) -> Vec<BookingService> {
        self.bookings
            .read()
            .await
            .line_items
            .get(booking_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Active bookings of one staff member or client overlapping `window`.
    /// The scan evaluates the decomposed overlap clauses, standing in for an
    /// indexed range filter in a SQL-backed store.
    pub async fn active_bookings_overlapping(
        &self,
        scope: ConflictScope,
        subject: &Ulid,
        window: &TimeInterval,
        exclude: Option<Ulid>,
    ) -> Vec<Booking> {
        let table = self.bookings.read().await;
        let mut out: Vec<Booking> = table
            .rows
            .values()
            .filter(|b| b.status.is_active())
            .filter(|b| match scope {
                ConflictScope::Staff => b.staff_id == Some(*subject),
                ConflictScope::Client => b.client_id == *subject,
            })
            .filter(|b| exclude != Some(b.id))
            .filter(|b| overlaps_decomposed(&b.interval(), window))
            .cloned()
            .collect();
        out.sort_by_key(|b| b.start_time);
        out
    }

    /// Active multi-service line items assigned to one staff member
    /// overlapping `window`. Activity follows the parent booking's status.
    pub async fn active_line_items_overlapping(
        &self,
        staff_id: &Ulid,
        window: &TimeInterval,
        exclude: Option<Ulid>,
    ) -> Vec<BookingService> {
        let table = self.bookings.read().await;
        let mut out = Vec::new();
        for (booking_id, items) in &table.line_items {
            let Some(parent) = table.rows.get(booking_id) else {
                continue;
            };
            if !parent.status.is_active() || exclude == Some(*booking_id) {
                continue;
            }
            for item in items {
                if item.staff_id == *staff_id && overlaps_decomposed(&item.interval(), window) {
                    out.push(item.clone());
                }
            }
        }
        out.sort_by_key(|i| i.start_time);
        out
    }

    /// Open bookings counting against the one-appointment-per-salon client
    /// rule: still active in the client-facing sense and not yet ended.
    pub async fn open_salon_bookings_for_client(
        &self,
        client_id: &Ulid,
        salon_id: &Ulid,
        now: OffsetDateTime,
    ) -> Vec<Booking> {
        let table = self.bookings.read().await;
        let mut out: Vec<Booking> = table
            .rows
            .values()
            .filter(|b| {
                b.client_id == *client_id
                    && b.salon_id == *salon_id
                    && b.status.holds_client_slot()
                    && b.end_time > now
            })
            .cloned()
            .collect();
        out.sort_by_key(|b| b.start_time);
        out
    }

    pub async fn bookings_version(&self) -> u64 {
        self.bookings.read().await.version
    }

    // ── Transactions ─────────────────────────────────────────

    pub async fn begin(self: &Arc<Self>, locks: LockManager) -> Tx {
        let begin_version = self.bookings.read().await.version;
        Tx {
            store: self.clone(),
            locks,
            begin_version,
            writes: Vec::new(),
            guards: Vec::new(),
        }
    }

    /// Conditional bulk cancel of stale provisional holds: PENDING, not
    /// already canceled, owned by an unverified client, created before
    /// `cutoff`. One write batch, idempotent, safe concurrently with the
    /// composer: a booking confirmed in between simply fails the status
    /// predicate.
    pub(crate) async fn cancel_stale_pending(
        &self,
        cutoff: OffsetDateTime,
        now: OffsetDateTime,
    ) -> u64 {
        let mut table = self.bookings.write().await;
        let mut canceled = 0u64;
        for booking in table.rows.values_mut() {
            if booking.status != BookingStatus::Pending || booking.canceled_at.is_some() {
                continue;
            }
            if booking.created_at >= cutoff {
                continue;
            }
            let verified = self
                .clients
                .get(&booking.client_id)
                .map(|c| c.verified)
                .unwrap_or(false);
            if verified {
                continue;
            }
            booking.status = BookingStatus::Canceled;
            booking.canceled_at = Some(now);
            canceled += 1;
        }
        if canceled > 0 {
            table.version += 1;
        }
        canceled
    }
}

enum WriteOp {
    Insert {
        booking: Booking,
        items: Vec<BookingService>,
    },
    SetStatus {
        booking_id: Ulid,
        expect: Expect,
        to: BookingStatus,
        canceled_at: Option<OffsetDateTime>,
    },
}

enum Expect {
    Active,
    Exactly(BookingStatus),
}

/// One unit of work against the booking table. Reads are fresh (current
/// committed state); writes are buffered and applied atomically at commit,
/// which fails with a retryable serialization conflict if any other commit
/// landed since `begin`. Advisory lock guards acquired through the
/// transaction are released when it is dropped, commit or abort alike.
pub struct Tx {
    store: Arc<BookingStore>,
    locks: LockManager,
    begin_version: u64,
    writes: Vec<WriteOp>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl Tx {
    /// Acquire exclusive, transaction-scoped advisory locks for every
    /// distinct non-empty key, in sorted order. Must run before the reads
    /// that feed conflict detection.
    pub async fn acquire_locks(&mut self, keys: &[String]) {
        let mut guards = self.locks.acquire(keys).await;
        self.guards.append(&mut guards);
    }

    pub async fn booking(&self, id: &Ulid) -> Option<Booking> {
        self.store.booking(id).await
    }

    pub async fn line_items(&self, booking_id: &Ulid) -> Vec<BookingService> {
        self.store.line_items(booking_id).await
    }

    pub async fn active_bookings_overlapping(
        &self,
        scope: ConflictScope,
        subject: &Ulid,
        window: &TimeInterval,
        exclude: Option<Ulid>,
    ) -> Vec<Booking> {
        self.store
            .active_bookings_overlapping(scope, subject, window, exclude)
            .await
    }

    pub async fn active_line_items_overlapping(
        &self,
        staff_id: &Ulid,
        window: &TimeInterval,
        exclude: Option<Ulid>,
    ) -> Vec<BookingService> {
        self.store
            .active_line_items_overlapping(staff_id, window, exclude)
            .await
    }

    pub async fn open_salon_bookings_for_client(
        &self,
        client_id: &Ulid,
        salon_id: &Ulid,
        now: OffsetDateTime,
    ) -> Vec<Booking> {
        self.store
            .open_salon_bookings_for_client(client_id, salon_id, now)
            .await
    }

    pub fn insert_booking(&mut self, booking: Booking, items: Vec<BookingService>) {
        self.writes.push(WriteOp::Insert { booking, items });
    }

    /// Cancel a booking that is still active when the transaction commits.
    pub fn cancel_active(&mut self, booking_id: Ulid, at: OffsetDateTime) {
        self.writes.push(WriteOp::SetStatus {
            booking_id,
            expect: Expect::Active,
            to: BookingStatus::Canceled,
            canceled_at: Some(at),
        });
    }

    /// Confirm a booking that is still PENDING when the transaction commits.
    pub fn confirm_pending(&mut self, booking_id: Ulid) {
        self.writes.push(WriteOp::SetStatus {
            booking_id,
            expect: Expect::Exactly(BookingStatus::Pending),
            to: BookingStatus::Confirmed,
            canceled_at: None,
        });
    }

    pub async fn commit(mut self) -> Result<(), EngineError> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let mut table = self.store.bookings.write().await;
        if self.store.transactional && table.version != self.begin_version {
            return Err(EngineError::SerializationConflict);
        }

        // Validate every conditional write before applying any of them.
        for op in &self.writes {
            if let WriteOp::SetStatus { booking_id, expect, to, .. } = op {
                let Some(row) = table.rows.get(booking_id) else {
                    return Err(EngineError::BookingNotFound(*booking_id));
                };
                let ok = match expect {
                    Expect::Active => row.status.is_active(),
                    Expect::Exactly(status) => row.status == *status,
                };
                if !ok {
                    return Err(EngineError::InvalidTransition {
                        booking_id: *booking_id,
                        from: row.status,
                        to: *to,
                    });
                }
            }
        }

        for op in self.writes.drain(..) {
            match op {
                WriteOp::Insert { booking, items } => {
                    if !items.is_empty() {
                        table.line_items.insert(booking.id, items);
                    }
                    table.rows.insert(booking.id, booking);
                }
                WriteOp::SetStatus { booking_id, to, canceled_at, .. } => {
                    let row = table
                        .rows
                        .get_mut(&booking_id)
                        .expect("status precondition validated above");
                    row.status = to;
                    if canceled_at.is_some() {
                        row.canceled_at = canceled_at;
                    }
                }
            }
        }
        table.version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn booking_at(
        staff_id: Ulid,
        client_id: Ulid,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Booking {
        Booking {
            id: Ulid::new(),
            salon_id: Ulid::new(),
            client_id,
            staff_id: Some(staff_id),
            service_id: Some(Ulid::new()),
            start_time: start,
            end_time: end,
            duration_min: 30,
            price_cents: 4_500,
            status: BookingStatus::Confirmed,
            canceled_at: None,
            created_at: start,
            is_multi_service: false,
            notes: None,
        }
    }

    async fn insert(store: &Arc<BookingStore>, booking: Booking) {
        let mut tx = store.begin(LockManager::new()).await;
        tx.insert_booking(booking, Vec::new());
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn commit_bumps_version_once_per_batch() {
        let store = Arc::new(BookingStore::new());
        assert_eq!(store.bookings_version().await, 0);

        let staff = Ulid::new();
        let mut tx = store.begin(LockManager::new()).await;
        tx.insert_booking(
            booking_at(
                staff,
                Ulid::new(),
                datetime!(2030-06-03 10:00 UTC),
                datetime!(2030-06-03 11:00 UTC),
            ),
            Vec::new(),
        );
        tx.insert_booking(
            booking_at(
                staff,
                Ulid::new(),
                datetime!(2030-06-03 12:00 UTC),
                datetime!(2030-06-03 13:00 UTC),
            ),
            Vec::new(),
        );
        tx.commit().await.unwrap();
        assert_eq!(store.bookings_version().await, 1);
    }

    #[tokio::test]
    async fn read_only_transaction_commits_without_version_bump() {
        let store = Arc::new(BookingStore::new());
        let tx = store.begin(LockManager::new()).await;
        tx.commit().await.unwrap();
        assert_eq!(store.bookings_version().await, 0);
    }

    #[tokio::test]
    async fn concurrent_commit_is_a_serialization_conflict() {
        let store = Arc::new(BookingStore::new());
        let staff = Ulid::new();

        let mut tx1 = store.begin(LockManager::new()).await;
        let mut tx2 = store.begin(LockManager::new()).await;
        tx1.insert_booking(
            booking_at(
                staff,
                Ulid::new(),
                datetime!(2030-06-03 10:00 UTC),
                datetime!(2030-06-03 11:00 UTC),
            ),
            Vec::new(),
        );
        tx2.insert_booking(
            booking_at(
                staff,
                Ulid::new(),
                datetime!(2030-06-03 14:00 UTC),
                datetime!(2030-06-03 15:00 UTC),
            ),
            Vec::new(),
        );

        tx1.commit().await.unwrap();
        let err = tx2.commit().await.unwrap_err();
        assert_eq!(err, EngineError::SerializationConflict);
    }

    #[tokio::test]
    async fn non_transactional_store_skips_the_version_check() {
        let store = Arc::new(BookingStore::without_transactions());
        assert!(!store.supports_transactions());
        let staff = Ulid::new();

        let mut tx1 = store.begin(LockManager::new()).await;
        let mut tx2 = store.begin(LockManager::new()).await;
        tx1.insert_booking(
            booking_at(
                staff,
                Ulid::new(),
                datetime!(2030-06-03 10:00 UTC),
                datetime!(2030-06-03 11:00 UTC),
            ),
            Vec::new(),
        );
        tx2.insert_booking(
            booking_at(
                staff,
                Ulid::new(),
                datetime!(2030-06-03 14:00 UTC),
                datetime!(2030-06-03 15:00 UTC),
            ),
            Vec::new(),
        );
        tx1.commit().await.unwrap();
        tx2.commit().await.unwrap();
    }

    #[tokio::test]
    async fn staff_scope_scan_matches_only_that_staff() {
        let store = Arc::new(BookingStore::new());
        let staff_a = Ulid::new();
        let staff_b = Ulid::new();
        insert(
            &store,
            booking_at(
                staff_a,
                Ulid::new(),
                datetime!(2030-06-03 10:00 UTC),
                datetime!(2030-06-03 11:00 UTC),
            ),
        )
        .await;
        insert(
            &store,
            booking_at(
                staff_b,
                Ulid::new(),
                datetime!(2030-06-03 10:00 UTC),
                datetime!(2030-06-03 11:00 UTC),
            ),
        )
        .await;

        let window = TimeInterval::new(
            datetime!(2030-06-03 00:00 UTC),
            datetime!(2030-06-04 00:00 UTC),
        );
        let hits = store
            .active_bookings_overlapping(ConflictScope::Staff, &staff_a, &window, None)
            .await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].staff_id, Some(staff_a));
    }

    #[tokio::test]
    async fn canceled_rows_do_not_show_in_active_scans() {
        let store = Arc::new(BookingStore::new());
        let staff = Ulid::new();
        let mut b = booking_at(
            staff,
            Ulid::new(),
            datetime!(2030-06-03 10:00 UTC),
            datetime!(2030-06-03 11:00 UTC),
        );
        b.status = BookingStatus::Canceled;
        insert(&store, b).await;

        let window = TimeInterval::new(
            datetime!(2030-06-03 00:00 UTC),
            datetime!(2030-06-04 00:00 UTC),
        );
        assert!(
            store
                .active_bookings_overlapping(ConflictScope::Staff, &staff, &window, None)
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn cancel_active_refuses_already_canceled_rows() {
        let store = Arc::new(BookingStore::new());
        let booking = booking_at(
            Ulid::new(),
            Ulid::new(),
            datetime!(2030-06-03 10:00 UTC),
            datetime!(2030-06-03 11:00 UTC),
        );
        let id = booking.id;
        insert(&store, booking).await;

        let mut tx = store.begin(LockManager::new()).await;
        tx.cancel_active(id, datetime!(2030-06-03 10:30 UTC));
        tx.commit().await.unwrap();

        let mut tx = store.begin(LockManager::new()).await;
        tx.cancel_active(id, datetime!(2030-06-03 10:31 UTC));
        let err = tx.commit().await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn salon_wide_open_bookings_ignore_ended_and_completed() {
        let store = Arc::new(BookingStore::new());
        let salon_id = Ulid::new();
        let client_id = Ulid::new();
        let now = datetime!(2030-06-03 12:00 UTC);

        let mut past = booking_at(
            Ulid::new(),
            client_id,
            datetime!(2030-06-03 09:00 UTC),
            datetime!(2030-06-03 10:00 UTC),
        );
        past.salon_id = salon_id;
        let mut future = booking_at(
            Ulid::new(),
            client_id,
            datetime!(2030-06-03 14:00 UTC),
            datetime!(2030-06-03 15:00 UTC),
        );
        future.salon_id = salon_id;
        let mut completed = booking_at(
            Ulid::new(),
            client_id,
            datetime!(2030-06-03 16:00 UTC),
            datetime!(2030-06-03 17:00 UTC),
        );
        completed.salon_id = salon_id;
        completed.status = BookingStatus::Completed;

        insert(&store, past).await;
        insert(&store, future).await;
        insert(&store, completed).await;

        let open = store
            .open_salon_bookings_for_client(&client_id, &salon_id, now)
            .await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].start_time, datetime!(2030-06-03 14:00 UTC));
    }

    #[tokio::test]
    async fn stale_pending_sweep_is_conditional_and_idempotent() {
        let store = Arc::new(BookingStore::new());
        let client = Client { id: Ulid::new(), name: "Sam".into(), verified: false };
        store.upsert_client(client.clone());

        let mut stale = booking_at(
            Ulid::new(),
            client.id,
            datetime!(2030-06-03 10:00 UTC),
            datetime!(2030-06-03 11:00 UTC),
        );
        stale.status = BookingStatus::Pending;
        stale.created_at = datetime!(2030-06-03 08:00 UTC);
        let stale_id = stale.id;
        insert(&store, stale).await;

        let cutoff = datetime!(2030-06-03 08:30 UTC);
        let now = datetime!(2030-06-03 08:40 UTC);
        assert_eq!(store.cancel_stale_pending(cutoff, now).await, 1);
        assert_eq!(store.cancel_stale_pending(cutoff, now).await, 0);

        let row = store.booking(&stale_id).await.unwrap();
        assert_eq!(row.status, BookingStatus::Canceled);
        assert_eq!(row.canceled_at, Some(now));
    }

    #[tokio::test]
    async fn sweep_skips_verified_clients() {
        let store = Arc::new(BookingStore::new());
        let client = Client { id: Ulid::new(), name: "Vera".into(), verified: true };
        store.upsert_client(client.clone());

        let mut pending = booking_at(
            Ulid::new(),
            client.id,
            datetime!(2030-06-03 10:00 UTC),
            datetime!(2030-06-03 11:00 UTC),
        );
        pending.status = BookingStatus::Pending;
        pending.created_at = datetime!(2030-06-03 08:00 UTC);
        insert(&store, pending).await;

        let cutoff = datetime!(2030-06-03 08:30 UTC);
        assert_eq!(store.cancel_stale_pending(cutoff, cutoff).await, 0);
    }
}
