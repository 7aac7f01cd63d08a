use crate::utils::error::{DispatchError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// 申報重量與品項重量加總的容許誤差 (kg)
pub const WEIGHT_TOLERANCE_KG: f64 = 0.01;

/// 未設定油箱容量時的預設值 (公升)
pub const DEFAULT_FUEL_CAPACITY_L: f64 = 8_000.0;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(LockerId);
uuid_id!(OrderId);
uuid_id!(ProductId);
uuid_id!(ClientId);
uuid_id!(BoxId);
uuid_id!(AssignmentId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortId(pub u32);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port-{}", self.0)
    }
}

/// Registration mark, e.g. `HB-LSR`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeaplaneId(pub String);

impl fmt::Display for SeaplaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SeaplaneId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    pub id: PortId,
    pub name: String,
    pub island: String,
    pub lat: f64,
    pub lon: f64,
    /// 與此港口的 Locker 數量一致，只在新增/移除 Locker 時重算
    pub locker_count: usize,
    pub warehouse: bool,
}

// ---------------------------------------------------------------------------
// Locker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockerStatus {
    Empty,
    Occupied,
    Reserved,
    Maintenance,
}

impl fmt::Display for LockerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Empty => "EMPTY",
            Self::Occupied => "OCCUPIED",
            Self::Reserved => "RESERVED",
            Self::Maintenance => "MAINTENANCE",
        })
    }
}

/// Locker state with its payload; the variant decides which optional
/// fields exist, so `box_id` and `maintenance_reason` cannot drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockerState {
    Empty,
    Reserved { box_id: BoxId, order: OrderId },
    Occupied { box_id: BoxId, order: OrderId },
    Maintenance { reason: String },
}

impl LockerState {
    pub fn status(&self) -> LockerStatus {
        match self {
            Self::Empty => LockerStatus::Empty,
            Self::Reserved { .. } => LockerStatus::Reserved,
            Self::Occupied { .. } => LockerStatus::Occupied,
            Self::Maintenance { .. } => LockerStatus::Maintenance,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockerEvent {
    Reserve { box_id: BoxId, order: OrderId },
    ConfirmOccupied,
    Release,
    CancelReservation,
    SetMaintenance { reason: String },
    ClearMaintenance,
}

impl fmt::Display for LockerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reserve { .. } => "reserve",
            Self::ConfirmOccupied => "confirm_occupied",
            Self::Release => "release",
            Self::CancelReservation => "cancel_reservation",
            Self::SetMaintenance { .. } => "set_maintenance",
            Self::ClearMaintenance => "clear_maintenance",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Locker {
    pub id: LockerId,
    pub port: PortId,
    pub number: u32,
    #[serde(flatten)]
    pub state: LockerState,
    pub last_used: Option<DateTime<Utc>>,
}

impl Locker {
    pub fn new(port: PortId, number: u32) -> Self {
        Self {
            id: LockerId::new(),
            port,
            number,
            state: LockerState::Empty,
            last_used: None,
        }
    }

    pub fn status(&self) -> LockerStatus {
        self.state.status()
    }

    pub fn box_id(&self) -> Option<BoxId> {
        match &self.state {
            LockerState::Reserved { box_id, .. } | LockerState::Occupied { box_id, .. } => {
                Some(*box_id)
            }
            _ => None,
        }
    }

    pub fn reserved_for(&self) -> Option<OrderId> {
        match &self.state {
            LockerState::Reserved { order, .. } | LockerState::Occupied { order, .. } => {
                Some(*order)
            }
            _ => None,
        }
    }

    pub fn maintenance_reason(&self) -> Option<&str> {
        match &self.state {
            LockerState::Maintenance { reason } => Some(reason),
            _ => None,
        }
    }

    /// Applies one event of the locker state machine. Every (state, event)
    /// pair not listed below is rejected with `InvalidTransition` and the
    /// locker is left untouched.
    pub fn apply(&mut self, event: LockerEvent, now: DateTime<Utc>) -> Result<()> {
        if let LockerEvent::SetMaintenance { reason } = &event {
            if reason.trim().is_empty() {
                return Err(DispatchError::InvalidArgument {
                    field: "maintenance_reason".to_string(),
                    reason: "a reason is required to put a locker in maintenance".to_string(),
                });
            }
        }

        let next = match (&self.state, &event) {
            (LockerState::Empty, LockerEvent::Reserve { box_id, order }) => {
                LockerState::Reserved {
                    box_id: *box_id,
                    order: *order,
                }
            }
            (LockerState::Reserved { box_id, order }, LockerEvent::ConfirmOccupied) => {
                LockerState::Occupied {
                    box_id: *box_id,
                    order: *order,
                }
            }
            (LockerState::Occupied { .. }, LockerEvent::Release) => LockerState::Empty,
            (LockerState::Reserved { .. }, LockerEvent::CancelReservation) => LockerState::Empty,
            (LockerState::Maintenance { .. }, LockerEvent::ClearMaintenance) => LockerState::Empty,
            (state, LockerEvent::SetMaintenance { reason })
                if state.status() != LockerStatus::Maintenance =>
            {
                LockerState::Maintenance {
                    reason: reason.trim().to_string(),
                }
            }
            (state, event) => {
                return Err(DispatchError::invalid_transition(
                    "locker",
                    self.id,
                    state.status(),
                    event,
                ))
            }
        };

        if event == LockerEvent::Release {
            self.last_used = Some(now);
        }
        self.state = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Seaplane
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeaplaneStatus {
    Available,
    AtPort,
    InFlight,
    Maintenance,
}

impl SeaplaneStatus {
    pub fn is_idle(self) -> bool {
        matches!(self, Self::Available | Self::AtPort)
    }
}

impl fmt::Display for SeaplaneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Available => "AVAILABLE",
            Self::AtPort => "AT_PORT",
            Self::InFlight => "IN_FLIGHT",
            Self::Maintenance => "MAINTENANCE",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeaplaneEvent {
    Depart { destination: PortId },
    Arrive { port: PortId },
    EnterMaintenance,
    ReturnToService,
}

impl fmt::Display for SeaplaneEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Depart { destination } => write!(f, "depart to {}", destination),
            Self::Arrive { port } => write!(f, "arrive at {}", port),
            Self::EnterMaintenance => f.write_str("enter_maintenance"),
            Self::ReturnToService => f.write_str("return_to_service"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flight {
    pub origin: PortId,
    pub destination: PortId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seaplane {
    pub id: SeaplaneId,
    pub model: String,
    pub status: SeaplaneStatus,
    pub box_capacity: u32,
    /// 每公里耗油 (公升)
    pub fuel_consumption_km: f64,
    pub cruise_speed_kmh: f64,
    pub fuel_capacity_l: f64,
    pub max_payload_kg: Option<f64>,
    /// 飛行中為 None
    pub current_location: Option<PortId>,
    pub flight: Option<Flight>,
}

impl Seaplane {
    /// Range on a full tank; every trip is assumed to start full.
    pub fn remaining_range_km(&self) -> f64 {
        if self.fuel_consumption_km <= 0.0 {
            return f64::INFINITY;
        }
        self.fuel_capacity_l / self.fuel_consumption_km
    }

    pub fn route(&self) -> bool {
        self.status == SeaplaneStatus::InFlight
    }

    /// Box capacity once the payload limit is applied for boxes of the
    /// given unit weight.
    pub fn effective_capacity(&self, weight_per_box_kg: f64) -> u32 {
        match self.max_payload_kg {
            Some(limit) if weight_per_box_kg > 0.0 => {
                let by_weight = (limit / weight_per_box_kg).floor();
                if by_weight < self.box_capacity as f64 {
                    by_weight.max(0.0) as u32
                } else {
                    self.box_capacity
                }
            }
            _ => self.box_capacity,
        }
    }

    pub fn apply(&mut self, event: SeaplaneEvent) -> Result<()> {
        match (self.status, &event) {
            (status, SeaplaneEvent::Depart { destination }) if status.is_idle() => {
                let origin = self.current_location.ok_or_else(|| {
                    DispatchError::invalid_transition("seaplane", &self.id, "UNLOCATED", &event)
                })?;
                self.status = SeaplaneStatus::InFlight;
                self.current_location = None;
                self.flight = Some(Flight {
                    origin,
                    destination: *destination,
                });
            }
            (SeaplaneStatus::InFlight, SeaplaneEvent::Arrive { port }) => {
                self.status = SeaplaneStatus::AtPort;
                self.current_location = Some(*port);
                self.flight = None;
            }
            (status, SeaplaneEvent::EnterMaintenance) if status.is_idle() => {
                self.status = SeaplaneStatus::Maintenance;
            }
            (SeaplaneStatus::Maintenance, SeaplaneEvent::ReturnToService) => {
                self.status = SeaplaneStatus::Available;
            }
            (status, event) => {
                return Err(DispatchError::invalid_transition(
                    "seaplane", &self.id, status, event,
                ))
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Client / Product
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    Researcher,
    Institution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub name: String,
    pub role: ClientRole,
    pub specialty: String,
    pub study: String,
    pub email: String,
    pub order_history: Vec<OrderId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub unit_price: f64,
    pub weight_kg: f64,
    pub stock_available: u32,
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn demoted(self) -> Self {
        match self {
            Self::Urgent => Self::High,
            Self::High => Self::Normal,
            Self::Normal | Self::Low => Self::Low,
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(DispatchError::InvalidArgument {
                field: "priority".to_string(),
                reason: format!("unknown priority '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    InTransit,
    Delivered,
    PartiallyDelivered,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::PartiallyDelivered)
    }

    /// Transition table; `None` means the pair is not permitted.
    pub fn next(self, event: OrderEvent) -> Option<OrderStatus> {
        match (self, event) {
            (Self::Pending | Self::InTransit, OrderEvent::Dispatch) => Some(Self::InTransit),
            (Self::InTransit, OrderEvent::Deliver) => Some(Self::Delivered),
            (Self::InTransit, OrderEvent::DeliverPartially) => Some(Self::PartiallyDelivered),
            _ => None,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::InTransit => "IN_TRANSIT",
            Self::Delivered => "DELIVERED",
            Self::PartiallyDelivered => "PARTIALLY_DELIVERED",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderEvent {
    Dispatch,
    Deliver,
    DeliverPartially,
}

impl fmt::Display for OrderEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Dispatch => "dispatch",
            Self::Deliver => "deliver",
            Self::DeliverPartially => "deliver_partially",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product: ProductId,
    pub quantity: u32,
}

/// Inbound order submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client: ClientId,
    pub destination: PortId,
    pub items: Vec<OrderItem>,
    pub priority: Priority,
    pub box_count: u32,
    pub total_weight_kg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub client: ClientId,
    pub created_at: DateTime<Utc>,
    /// 進件序號，建立時間相同時的排序依據
    pub seq: u64,
    pub status: OrderStatus,
    pub priority: Priority,
    pub destination: PortId,
    pub items: Vec<OrderItem>,
    pub box_count: u32,
    pub total_weight_kg: f64,
    pub boxes_delivered: u32,
    pub boxes_undispatched: u32,
    pub boxes_in_flight: u32,
    /// 目的港 Locker 不足，剩餘箱數改由新訂單承接
    pub locker_shortfall: bool,
    pub parent: Option<OrderId>,
    pub attempts: u32,
}

impl Order {
    pub fn transition(&mut self, event: OrderEvent) -> Result<()> {
        match self.status.next(event) {
            Some(next) => {
                self.status = next;
                Ok(())
            }
            None => Err(DispatchError::invalid_transition(
                "order",
                self.id,
                self.status,
                event,
            )),
        }
    }

    pub fn weight_per_box(&self) -> f64 {
        if self.box_count == 0 {
            return 0.0;
        }
        self.total_weight_kg / self.box_count as f64
    }

    /// Still has boxes waiting for a seaplane.
    pub fn is_dispatchable(&self) -> bool {
        !self.status.is_terminal() && self.boxes_undispatched > 0 && !self.locker_shortfall
    }

    /// Every box has either landed or been written off as remainder.
    pub fn is_settled(&self) -> bool {
        self.boxes_in_flight == 0 && (self.boxes_undispatched == 0 || self.locker_shortfall)
    }
}

// ---------------------------------------------------------------------------
// Box
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoxStatus {
    /// 等待派送
    #[default]
    Pending,
    InTransit,
    Delivered,
    /// 落地時未能放入 Locker
    Undelivered,
    /// 轉入剩餘訂單
    Requeued,
    Cancelled,
}

impl BoxStatus {
    pub fn can_move_to(self, next: BoxStatus) -> bool {
        use BoxStatus::*;
        matches!(
            (self, next),
            (Pending, InTransit)
                | (InTransit, Delivered)
                | (InTransit, Undelivered)
                | (InTransit, Pending)
                | (Pending | Undelivered, Requeued)
                | (Pending, Cancelled)
        )
    }
}

impl fmt::Display for BoxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "PENDING",
            Self::InTransit => "IN_TRANSIT",
            Self::Delivered => "DELIVERED",
            Self::Undelivered => "UNDELIVERED",
            Self::Requeued => "REQUEUED",
            Self::Cancelled => "CANCELLED",
        })
    }
}

/// One physical box of an order, numbered from 1 within that order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CargoBox {
    pub id: BoxId,
    pub order: OrderId,
    pub client: ClientId,
    pub number: u32,
    pub status: BoxStatus,
    pub content: Option<String>,
}

impl CargoBox {
    pub fn move_to(&mut self, next: BoxStatus) -> Result<()> {
        if !self.status.can_move_to(next) {
            return Err(DispatchError::invalid_transition(
                "box",
                self.id,
                self.status,
                format!("move to {}", next),
            ));
        }
        self.status = next;
        Ok(())
    }
}

/// Dispatch queue order: priority descending, then creation ascending, then
/// intake sequence.
pub fn queue_order(
    a: (Priority, DateTime<Utc>, u64),
    b: (Priority, DateTime<Utc>, u64),
) -> Ordering {
    b.0.cmp(&a.0)
        .then_with(|| a.1.cmp(&b.1))
        .then_with(|| a.2.cmp(&b.2))
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequeuePolicy {
    /// 剩餘訂單沿用原優先序
    #[default]
    Keep,
    /// 剩餘訂單降一級
    Demote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchPolicy {
    pub requeue: RequeuePolicy,
    /// Soft limit: exceeding it only logs a warning, the order stays queued.
    pub max_attempts: Option<u32>,
    pub default_fuel_capacity_l: f64,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            requeue: RequeuePolicy::Keep,
            max_attempts: None,
            default_fuel_capacity_l: DEFAULT_FUEL_CAPACITY_L,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    InFlight,
    Completed,
    Aborted,
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InFlight => "IN_FLIGHT",
            Self::Completed => "COMPLETED",
            Self::Aborted => "ABORTED",
        })
    }
}

/// One committed leg: order boxes on a seaplane towards reserved lockers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub order: OrderId,
    pub seaplane: SeaplaneId,
    pub origin: PortId,
    pub destination: PortId,
    pub boxes: u32,
    pub box_ids: Vec<BoxId>,
    pub lockers: Vec<LockerId>,
    pub distance_km: f64,
    pub estimated_fuel_l: f64,
    pub departed_at: DateTime<Utc>,
    pub eta: DateTime<Utc>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub status: AssignmentStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seaplane() -> Seaplane {
        Seaplane {
            id: "HB-LSR".into(),
            model: "DHC-6 Twin Otter".to_string(),
            status: SeaplaneStatus::Available,
            box_capacity: 100,
            fuel_consumption_km: 25.0,
            cruise_speed_kmh: 250.0,
            fuel_capacity_l: DEFAULT_FUEL_CAPACITY_L,
            max_payload_kg: None,
            current_location: Some(PortId(1)),
            flight: None,
        }
    }

    #[test]
    fn test_locker_lifecycle_keeps_payload_consistent() {
        let now = Utc::now();
        let mut locker = Locker::new(PortId(1), 1);
        let box_id = BoxId::new();
        let order = OrderId::new();

        locker
            .apply(LockerEvent::Reserve { box_id, order }, now)
            .unwrap();
        assert_eq!(locker.status(), LockerStatus::Reserved);
        assert_eq!(locker.box_id(), Some(box_id));

        locker.apply(LockerEvent::ConfirmOccupied, now).unwrap();
        assert_eq!(locker.status(), LockerStatus::Occupied);
        assert_eq!(locker.reserved_for(), Some(order));

        locker.apply(LockerEvent::Release, now).unwrap();
        assert_eq!(locker.status(), LockerStatus::Empty);
        assert_eq!(locker.box_id(), None);
        assert_eq!(locker.last_used, Some(now));
    }

    #[test]
    fn test_locker_rejects_unlisted_pairs() {
        let now = Utc::now();
        let mut locker = Locker::new(PortId(1), 1);

        for event in [
            LockerEvent::ConfirmOccupied,
            LockerEvent::Release,
            LockerEvent::CancelReservation,
            LockerEvent::ClearMaintenance,
        ] {
            let err = locker.apply(event, now).unwrap_err();
            assert!(matches!(err, DispatchError::InvalidTransition { .. }));
            assert_eq!(locker.status(), LockerStatus::Empty);
        }
    }

    #[test]
    fn test_locker_maintenance_requires_reason() {
        let now = Utc::now();
        let mut locker = Locker::new(PortId(1), 1);

        let err = locker
            .apply(
                LockerEvent::SetMaintenance {
                    reason: "   ".to_string(),
                },
                now,
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidArgument { .. }));

        locker
            .apply(
                LockerEvent::SetMaintenance {
                    reason: "broken hinge".to_string(),
                },
                now,
            )
            .unwrap();
        assert_eq!(locker.maintenance_reason(), Some("broken hinge"));
        assert_eq!(locker.box_id(), None);

        let again = locker.apply(
            LockerEvent::SetMaintenance {
                reason: "still broken".to_string(),
            },
            now,
        );
        assert!(again.is_err());

        locker.apply(LockerEvent::ClearMaintenance, now).unwrap();
        assert_eq!(locker.maintenance_reason(), None);
    }

    #[test]
    fn test_seaplane_depart_and_arrive() {
        let mut plane = seaplane();
        plane
            .apply(SeaplaneEvent::Depart {
                destination: PortId(2),
            })
            .unwrap();
        assert!(plane.route());
        assert_eq!(plane.current_location, None);
        assert_eq!(
            plane.flight,
            Some(Flight {
                origin: PortId(1),
                destination: PortId(2)
            })
        );

        let err = plane
            .apply(SeaplaneEvent::Depart {
                destination: PortId(3),
            })
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));

        plane.apply(SeaplaneEvent::Arrive { port: PortId(2) }).unwrap();
        assert_eq!(plane.status, SeaplaneStatus::AtPort);
        assert_eq!(plane.current_location, Some(PortId(2)));
    }

    #[test]
    fn test_seaplane_in_maintenance_cannot_depart() {
        let mut plane = seaplane();
        plane.apply(SeaplaneEvent::EnterMaintenance).unwrap();
        assert!(plane
            .apply(SeaplaneEvent::Depart {
                destination: PortId(2)
            })
            .is_err());
        plane.apply(SeaplaneEvent::ReturnToService).unwrap();
        assert_eq!(plane.status, SeaplaneStatus::Available);
    }

    #[test]
    fn test_effective_capacity_respects_payload() {
        let mut plane = seaplane();
        assert_eq!(plane.effective_capacity(10.0), 100);
        plane.max_payload_kg = Some(250.0);
        assert_eq!(plane.effective_capacity(10.0), 25);
        assert_eq!(plane.effective_capacity(0.0), 100);
    }

    #[test]
    fn test_order_status_is_monotonic() {
        use OrderEvent::*;
        use OrderStatus::*;

        assert_eq!(Pending.next(Dispatch), Some(InTransit));
        assert_eq!(InTransit.next(Dispatch), Some(InTransit));
        assert_eq!(InTransit.next(DeliverPartially), Some(PartiallyDelivered));
        assert_eq!(Pending.next(Deliver), None);
        for terminal in [Delivered, PartiallyDelivered] {
            for event in [Dispatch, Deliver, DeliverPartially] {
                assert_eq!(terminal.next(event), None);
            }
        }
    }

    #[test]
    fn test_queue_order_prefers_priority_then_age() {
        let early = Utc::now();
        let late = early + chrono::Duration::seconds(5);

        assert_eq!(
            queue_order((Priority::High, late, 2), (Priority::Normal, early, 1)),
            Ordering::Less
        );
        assert_eq!(
            queue_order((Priority::Normal, early, 1), (Priority::Normal, late, 2)),
            Ordering::Less
        );
        assert_eq!(
            queue_order((Priority::Normal, early, 3), (Priority::Normal, early, 2)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_box_moves_follow_dispatch() {
        let mut cargo = CargoBox {
            id: BoxId::new(),
            order: OrderId::new(),
            client: ClientId::new(),
            number: 1,
            status: BoxStatus::Pending,
            content: None,
        };

        assert!(cargo.move_to(BoxStatus::Delivered).is_err());
        cargo.move_to(BoxStatus::InTransit).unwrap();
        cargo.move_to(BoxStatus::Pending).unwrap();
        cargo.move_to(BoxStatus::InTransit).unwrap();
        cargo.move_to(BoxStatus::Delivered).unwrap();

        for next in [BoxStatus::Pending, BoxStatus::Requeued, BoxStatus::Cancelled] {
            let err = cargo.move_to(next).unwrap_err();
            assert!(matches!(err, DispatchError::InvalidTransition { .. }));
            assert_eq!(cargo.status, BoxStatus::Delivered);
        }
    }

    #[test]
    fn test_priority_parsing_and_demotion() {
        assert_eq!("urgent".parse::<Priority>().unwrap(), Priority::Urgent);
        assert_eq!("NORMAL".parse::<Priority>().unwrap(), Priority::Normal);
        assert!("soon".parse::<Priority>().is_err());
        assert_eq!(Priority::Urgent.demoted(), Priority::High);
        assert_eq!(Priority::Low.demoted(), Priority::Low);
    }
}
