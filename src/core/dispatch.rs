use crate::core::fleet::FleetRegistry;
use crate::core::lockers::LockerRegistry;
use crate::core::network::PortNetwork;
use crate::core::orders::{OrderBook, Settlement};
use crate::core::planner::{self, DeferReason, Deferral, Plan, PlanningSnapshot, ProposedLeg};
use crate::domain::model::{
    Assignment, AssignmentId, AssignmentStatus, BoxId, DispatchPolicy, Locker, Order, OrderId,
    PortId, SeaplaneId,
};
use crate::domain::ports::PolicyProvider;
use crate::utils::error::{DispatchError, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    Committed(Assignment),
    Deferred(DeferReason),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedOrder {
    pub order: OrderId,
    pub error: String,
}

/// Summary of one dispatch cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub assignments: Vec<Assignment>,
    pub deferred: Vec<Deferral>,
    pub failed: Vec<FailedOrder>,
}

impl CycleReport {
    pub fn boxes_dispatched(&self) -> u32 {
        self.assignments.iter().map(|a| a.boxes).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrivalReport {
    pub assignment: Assignment,
    pub delivered: u32,
    pub settlement: Settlement,
    pub remainder: Option<Order>,
}

/// Turns plans into committed legs and processes their arrival.
///
/// The engine owns no entity; it only calls the registries' operations.
/// `LockerRegistry::reserve` and `FleetRegistry::depart` are the only commit
/// points, so overlapping cycles never share a locker or a seaplane.
pub struct DispatchEngine {
    network: Arc<PortNetwork>,
    lockers: Arc<LockerRegistry>,
    fleet: Arc<FleetRegistry>,
    orders: Arc<OrderBook>,
    policy: DispatchPolicy,
    ledger: DashMap<AssignmentId, Assignment>,
}

impl DispatchEngine {
    pub fn new(
        network: Arc<PortNetwork>,
        lockers: Arc<LockerRegistry>,
        fleet: Arc<FleetRegistry>,
        orders: Arc<OrderBook>,
        policy: &dyn PolicyProvider,
    ) -> Self {
        Self {
            network,
            lockers,
            fleet,
            orders,
            policy: policy.dispatch_policy(),
            ledger: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    pub fn snapshot(&self) -> PlanningSnapshot {
        PlanningSnapshot {
            orders: self.orders.dispatchable(),
            seaplanes: self.fleet.idle(),
            empty_lockers: self.lockers.empty_counts(),
        }
    }

    /// Plans against current state without committing anything.
    pub fn preview(&self) -> Plan {
        planner::plan(&self.snapshot(), &self.network)
    }

    /// One pass over the backlog: plan, then commit leg by leg.
    pub fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        let plan = self.preview();
        let mut report = CycleReport {
            started_at: now,
            assignments: Vec::new(),
            deferred: plan.deferred,
            failed: plan
                .failed
                .into_iter()
                .map(|(order, e)| FailedOrder {
                    order,
                    error: e.to_string(),
                })
                .collect(),
        };

        for leg in plan.legs {
            match self.commit(&leg, now) {
                Ok(CommitOutcome::Committed(assignment)) => report.assignments.push(assignment),
                Ok(CommitOutcome::Deferred(reason)) => report.deferred.push(Deferral {
                    order: leg.order,
                    reason,
                    boxes_remaining: leg.boxes,
                }),
                Err(e) if e.is_retryable() => {
                    tracing::warn!("Leg for order {} postponed: {}", leg.order, e);
                    report.deferred.push(Deferral {
                        order: leg.order,
                        reason: DeferReason::Contention,
                        boxes_remaining: leg.boxes,
                    });
                }
                Err(e) => {
                    tracing::error!("Leg for order {} failed: {}", leg.order, e);
                    report.failed.push(FailedOrder {
                        order: leg.order,
                        error: e.to_string(),
                    });
                }
            }
        }

        let waiting: BTreeSet<OrderId> = report.deferred.iter().map(|d| d.order).collect();
        for order in waiting {
            if let Some(attempts) = self.orders.note_attempt(order) {
                if self.policy.max_attempts.is_some_and(|max| attempts > max) {
                    tracing::warn!(
                        "Order {} still waiting after {} cycles; it stays in the backlog",
                        order,
                        attempts
                    );
                }
            }
        }

        tracing::info!(
            "Cycle done: {} legs ({} boxes), {} deferred, {} failed",
            report.assignments.len(),
            report.boxes_dispatched(),
            report.deferred.len(),
            report.failed.len()
        );
        report
    }

    /// Commits one proposed leg: reserve lockers, depart the seaplane, book
    /// the boxes on the order. Any failure undoes the earlier steps.
    pub fn commit(&self, leg: &ProposedLeg, now: DateTime<Utc>) -> Result<CommitOutcome> {
        let seaplane = match self.fleet.seaplane(&leg.seaplane) {
            Ok(seaplane) => seaplane,
            Err(DispatchError::UnknownSeaplane(_)) => {
                return Ok(CommitOutcome::Deferred(DeferReason::Contention))
            }
            Err(e) => return Err(e),
        };
        if seaplane.current_location != Some(leg.origin) {
            return Ok(CommitOutcome::Deferred(DeferReason::Contention));
        }
        let flight_time = self.network.flight_time(&seaplane, leg.origin, leg.destination)?;

        let candidates = self.orders.pending_boxes(leg.order, leg.boxes);
        if candidates.is_empty() {
            return Ok(CommitOutcome::Deferred(DeferReason::Contention));
        }

        let mut reserved: Vec<Locker> = Vec::with_capacity(candidates.len());
        for box_id in &candidates {
            match self.lockers.reserve(leg.destination, *box_id, leg.order) {
                Ok(locker) => reserved.push(locker),
                Err(DispatchError::NoLockerAvailable { .. }) => break,
                Err(e) => {
                    self.cancel_all(&reserved);
                    return Err(e);
                }
            }
        }
        if reserved.is_empty() {
            return Ok(CommitOutcome::Deferred(DeferReason::NoLockerAvailable));
        }
        let boxes = reserved.len() as u32;
        let shortfall = leg.locker_shortfall || reserved.len() < candidates.len();
        let box_ids: Vec<BoxId> = reserved.iter().filter_map(|l| l.box_id()).collect();

        match self.fleet.depart(&leg.seaplane, leg.destination) {
            Ok(origin) if origin == leg.origin => {}
            Ok(origin) => {
                self.return_seaplane(&leg.seaplane, origin);
                self.cancel_all(&reserved);
                return Ok(CommitOutcome::Deferred(DeferReason::Contention));
            }
            Err(DispatchError::InvalidTransition { .. } | DispatchError::UnknownSeaplane(_)) => {
                self.cancel_all(&reserved);
                return Ok(CommitOutcome::Deferred(DeferReason::Contention));
            }
            Err(e) => {
                self.cancel_all(&reserved);
                return Err(e);
            }
        }

        if let Err(e) = self.orders.record_dispatch(leg.order, &box_ids, shortfall) {
            self.return_seaplane(&leg.seaplane, leg.origin);
            self.cancel_all(&reserved);
            return Err(e);
        }

        let assignment = Assignment {
            id: AssignmentId::new(),
            order: leg.order,
            seaplane: leg.seaplane.clone(),
            origin: leg.origin,
            destination: leg.destination,
            boxes,
            box_ids,
            lockers: reserved.iter().map(|l| l.id).collect(),
            distance_km: leg.distance_km,
            estimated_fuel_l: leg.distance_km * seaplane.fuel_consumption_km,
            departed_at: now,
            eta: now + flight_time,
            arrived_at: None,
            status: AssignmentStatus::InFlight,
        };
        self.ledger.insert(assignment.id, assignment.clone());

        tracing::info!(
            "Seaplane {} departed {} -> {} with {} boxes of order {}{}",
            assignment.seaplane,
            assignment.origin,
            assignment.destination,
            boxes,
            assignment.order,
            if shortfall { " (locker shortfall)" } else { "" }
        );
        Ok(CommitOutcome::Committed(assignment))
    }

    fn cancel_all(&self, reserved: &[Locker]) {
        for locker in reserved {
            if let Err(e) = self.lockers.cancel_reservation(locker.id) {
                tracing::warn!("Could not cancel reservation on locker {}: {}", locker.id, e);
            }
        }
    }

    fn return_seaplane(&self, id: &SeaplaneId, port: PortId) {
        if let Err(e) = self.fleet.arrive(id, port) {
            tracing::warn!("Could not return seaplane {} to {}: {}", id, port, e);
        }
    }

    /// Marks the ledger entry finished exactly once.
    fn close(&self, id: AssignmentId, status: AssignmentStatus, now: DateTime<Utc>) -> Result<Assignment> {
        let mut entry = self
            .ledger
            .get_mut(&id)
            .ok_or_else(|| DispatchError::UnknownAssignment(id.to_string()))?;
        if entry.status != AssignmentStatus::InFlight {
            return Err(DispatchError::invalid_transition(
                "assignment",
                id,
                entry.status,
                status,
            ));
        }
        entry.status = status;
        entry.arrived_at = Some(now);
        Ok(entry.clone())
    }

    /// Processes a landed leg: lockers become OCCUPIED, the seaplane is
    /// AT_PORT at the destination, and the order settles if this was its
    /// last open leg. An undelivered remainder is filed as a new order.
    pub fn arrive(&self, id: AssignmentId, now: DateTime<Utc>) -> Result<ArrivalReport> {
        let assignment = self.close(id, AssignmentStatus::Completed, now)?;

        let mut stored = Vec::with_capacity(assignment.box_ids.len());
        for (locker, box_id) in assignment.lockers.iter().zip(&assignment.box_ids) {
            match self.lockers.confirm_occupied(*locker) {
                Ok(_) => stored.push(*box_id),
                Err(e) => tracing::warn!("Box {} not stored in locker {}: {}", box_id, locker, e),
            }
        }
        let delivered = stored.len() as u32;

        if let Err(e) = self.fleet.arrive(&assignment.seaplane, assignment.destination) {
            tracing::warn!("Seaplane {} arrival not recorded: {}", assignment.seaplane, e);
        }

        let settlement = self
            .orders
            .record_arrival(assignment.order, &assignment.box_ids, &stored)?;
        let remainder = self.requeue(assignment.order, settlement)?;

        tracing::info!(
            "Seaplane {} landed at {}: {}/{} boxes stored ({:?})",
            assignment.seaplane,
            assignment.destination,
            delivered,
            assignment.boxes,
            settlement
        );
        Ok(ArrivalReport {
            assignment,
            delivered,
            settlement,
            remainder,
        })
    }

    /// Lands every flying leg whose ETA has passed.
    pub fn arrive_due(&self, now: DateTime<Utc>) -> Vec<ArrivalReport> {
        let mut due: Vec<(DateTime<Utc>, AssignmentId)> = self
            .ledger
            .iter()
            .filter(|a| a.status == AssignmentStatus::InFlight && a.eta <= now)
            .map(|a| (a.eta, a.id))
            .collect();
        due.sort();

        due.into_iter()
            .filter_map(|(_, id)| match self.arrive(id, now) {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::warn!("Arrival of {} skipped: {}", id, e);
                    None
                }
            })
            .collect()
    }

    /// Calls off a flying leg. Reservations are cancelled, the seaplane is
    /// put back at its origin and the boxes return to the order's pool; the
    /// order itself stays IN_TRANSIT.
    pub fn abort(&self, id: AssignmentId, now: DateTime<Utc>) -> Result<Assignment> {
        let assignment = self.close(id, AssignmentStatus::Aborted, now)?;

        for locker in &assignment.lockers {
            if let Err(e) = self.lockers.cancel_reservation(*locker) {
                tracing::warn!("Locker {} kept its state on abort: {}", locker, e);
            }
        }
        self.return_seaplane(&assignment.seaplane, assignment.origin);

        let settlement = self.orders.record_abort(assignment.order, &assignment.box_ids)?;
        self.requeue(assignment.order, settlement)?;

        tracing::info!(
            "Leg {} aborted; seaplane {} back at {}",
            id,
            assignment.seaplane,
            assignment.origin
        );
        Ok(assignment)
    }

    fn requeue(&self, order: OrderId, settlement: Settlement) -> Result<Option<Order>> {
        match settlement {
            Settlement::PartiallyDelivered { remainder } => self
                .orders
                .requeue_remainder(order, remainder, &self.policy)
                .map(Some),
            Settlement::Open | Settlement::Delivered => Ok(None),
        }
    }

    pub fn assignment(&self, id: AssignmentId) -> Result<Assignment> {
        self.ledger
            .get(&id)
            .map(|a| a.clone())
            .ok_or_else(|| DispatchError::UnknownAssignment(id.to_string()))
    }

    pub fn assignments(&self) -> Vec<Assignment> {
        let mut all: Vec<Assignment> = self.ledger.iter().map(|a| a.value().clone()).collect();
        all.sort_by(|a, b| a.departed_at.cmp(&b.departed_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn in_flight(&self) -> Vec<Assignment> {
        self.assignments()
            .into_iter()
            .filter(|a| a.status == AssignmentStatus::InFlight)
            .collect()
    }

    pub fn open_assignment_for(&self, seaplane: &SeaplaneId) -> Option<Assignment> {
        self.ledger
            .iter()
            .find(|a| a.status == AssignmentStatus::InFlight && &a.seaplane == seaplane)
            .map(|a| a.value().clone())
    }
}
