use crate::core::fleet::rank_candidates;
use crate::core::network::PortNetwork;
use crate::domain::model::{queue_order, Order, OrderId, PortId, Seaplane, SeaplaneId};
use crate::utils::error::DispatchError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Point-in-time view the planner works on. Taken without holding any lock;
/// the commit step re-checks everything it relies on.
#[derive(Debug, Clone, Default)]
pub struct PlanningSnapshot {
    pub orders: Vec<Order>,
    pub seaplanes: Vec<Seaplane>,
    pub empty_lockers: HashMap<PortId, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedLeg {
    pub order: OrderId,
    pub seaplane: SeaplaneId,
    pub origin: PortId,
    pub destination: PortId,
    pub boxes: u32,
    /// Fewer lockers than the seaplane could carry
    pub locker_shortfall: bool,
    pub distance_km: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferReason {
    NoLockerAvailable,
    NoReachableSeaplane,
    /// Another cycle committed the seaplane or lockers first
    Contention,
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoLockerAvailable => "no locker available at destination",
            Self::NoReachableSeaplane => "no idle seaplane can reach the destination",
            Self::Contention => "resources taken by a concurrent cycle",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deferral {
    pub order: OrderId,
    pub reason: DeferReason,
    pub boxes_remaining: u32,
}

#[derive(Debug, Default)]
pub struct Plan {
    pub legs: Vec<ProposedLeg>,
    pub deferred: Vec<Deferral>,
    pub failed: Vec<(OrderId, DispatchError)>,
}

/// Greedy per-order assignment over a snapshot. Deterministic: same
/// snapshot, same plan.
///
/// Orders are served in queue order. For each one the planner keeps adding
/// legs until its boxes are covered: the nearest reachable seaplane that can
/// take everything left, otherwise the largest one (nearest on ties). Each
/// leg is cut down to the free lockers at the destination; a leg cut that
/// way ends the order's planning and marks it short.
pub fn plan(snapshot: &PlanningSnapshot, network: &PortNetwork) -> Plan {
    let mut queue: Vec<&Order> = snapshot
        .orders
        .iter()
        .filter(|o| o.is_dispatchable())
        .collect();
    queue.sort_by(|a, b| {
        queue_order(
            (a.priority, a.created_at, a.seq),
            (b.priority, b.created_at, b.seq),
        )
    });

    let mut idle: Vec<Seaplane> = snapshot
        .seaplanes
        .iter()
        .filter(|s| s.status.is_idle() && s.current_location.is_some())
        .cloned()
        .collect();
    let mut free = snapshot.empty_lockers.clone();
    let mut plan = Plan::default();

    for order in queue {
        match plan_order(order, &mut idle, &mut free, network) {
            Ok((legs, deferral)) => {
                plan.legs.extend(legs);
                plan.deferred.extend(deferral);
            }
            Err(e) => plan.failed.push((order.id, e)),
        }
    }

    plan
}

fn plan_order(
    order: &Order,
    idle: &mut Vec<Seaplane>,
    free: &mut HashMap<PortId, usize>,
    network: &PortNetwork,
) -> Result<(Vec<ProposedLeg>, Option<Deferral>), DispatchError> {
    let destination = order.destination;
    if !network.contains(destination) {
        return Err(DispatchError::UnknownPort(destination.to_string()));
    }

    let per_box = order.weight_per_box();
    let mut remaining = order.boxes_undispatched;
    let mut legs = Vec::new();

    while remaining > 0 {
        let free_here = free.get(&destination).copied().unwrap_or(0) as u32;
        if free_here == 0 {
            return Ok((legs, Some(defer(order, DeferReason::NoLockerAvailable, remaining))));
        }

        let mut candidates = Vec::new();
        for (distance, seaplane) in rank_candidates(idle.iter(), 1, destination, network)? {
            let capacity = seaplane.effective_capacity(per_box);
            let Some(origin) = seaplane.current_location else {
                continue;
            };
            if capacity >= 1 && network.reachable(&seaplane, origin, destination)? {
                candidates.push((distance, seaplane, capacity));
            }
        }

        // 已依距離排序：先找能一次載完的，否則取載量最大的
        let chosen = candidates
            .iter()
            .find(|(_, _, capacity)| *capacity >= remaining)
            .or_else(|| {
                candidates
                    .iter()
                    .rev()
                    .max_by_key(|(_, _, capacity)| *capacity)
            });
        let Some((distance, seaplane, capacity)) = chosen else {
            return Ok((legs, Some(defer(order, DeferReason::NoReachableSeaplane, remaining))));
        };

        let wanted = remaining.min(*capacity);
        let boxes = wanted.min(free_here);
        let short = boxes < wanted;
        let origin = seaplane.current_location.unwrap_or(destination);

        legs.push(ProposedLeg {
            order: order.id,
            seaplane: seaplane.id.clone(),
            origin,
            destination,
            boxes,
            locker_shortfall: short,
            distance_km: *distance,
        });

        let taken = seaplane.id.clone();
        idle.retain(|s| s.id != taken);
        free.insert(destination, (free_here - boxes) as usize);
        remaining -= boxes;

        if short {
            break;
        }
    }

    Ok((legs, None))
}

fn defer(order: &Order, reason: DeferReason, boxes_remaining: u32) -> Deferral {
    Deferral {
        order: order.id,
        reason,
        boxes_remaining,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{
        ClientId, OrderStatus, Port, Priority, SeaplaneStatus, DEFAULT_FUEL_CAPACITY_L,
    };
    use chrono::{Duration, Utc};

    fn network() -> PortNetwork {
        let network = PortNetwork::new();
        for (id, name, lat, lon) in [
            (1, "Puerto Baquerizo Moreno", -0.9025, -89.609167),
            (2, "Puerto Ayora", -0.7400, -90.3117),
            (3, "Puerto Villamil", -0.9567, -90.9672),
            (4, "Anse Darwin", 1.6780, -92.0030),
        ] {
            network
                .add_port(Port {
                    id: PortId(id),
                    name: name.to_string(),
                    island: String::new(),
                    lat,
                    lon,
                    locker_count: 0,
                    warehouse: false,
                })
                .unwrap();
        }
        network
    }

    fn seaplane(id: &str, capacity: u32, at: u32) -> Seaplane {
        Seaplane {
            id: id.into(),
            model: "DHC-6 Twin Otter".to_string(),
            status: SeaplaneStatus::Available,
            box_capacity: capacity,
            fuel_consumption_km: 25.0,
            cruise_speed_kmh: 250.0,
            fuel_capacity_l: DEFAULT_FUEL_CAPACITY_L,
            max_payload_kg: None,
            current_location: Some(PortId(at)),
            flight: None,
        }
    }

    fn order(seq: u64, priority: Priority, destination: u32, boxes: u32) -> Order {
        Order {
            id: OrderId::new(),
            client: ClientId::new(),
            created_at: Utc::now() + Duration::seconds(seq as i64),
            seq,
            status: OrderStatus::Pending,
            priority,
            destination: PortId(destination),
            items: Vec::new(),
            box_count: boxes,
            total_weight_kg: boxes as f64 * 10.0,
            boxes_delivered: 0,
            boxes_undispatched: boxes,
            boxes_in_flight: 0,
            locker_shortfall: false,
            parent: None,
            attempts: 0,
        }
    }

    fn lockers(entries: &[(u32, usize)]) -> HashMap<PortId, usize> {
        entries.iter().map(|(p, n)| (PortId(*p), *n)).collect()
    }

    #[test]
    fn test_short_lockers_reduce_the_leg() {
        let network = network();
        let o = order(1, Priority::Normal, 2, 3);
        let snapshot = PlanningSnapshot {
            orders: vec![o.clone()],
            seaplanes: vec![seaplane("HB-LSA", 3, 1)],
            empty_lockers: lockers(&[(2, 2)]),
        };

        let plan = plan(&snapshot, &network);
        assert_eq!(plan.legs.len(), 1);
        assert_eq!(plan.legs[0].boxes, 2);
        assert!(plan.legs[0].locker_shortfall);
        assert!(plan.deferred.is_empty());
    }

    #[test]
    fn test_priority_beats_submission_order() {
        let network = network();
        let normal = order(1, Priority::Normal, 2, 1);
        let high = order(2, Priority::High, 2, 1);
        let snapshot = PlanningSnapshot {
            orders: vec![normal.clone(), high.clone()],
            seaplanes: vec![seaplane("HB-LSA", 5, 1)],
            empty_lockers: lockers(&[(2, 10)]),
        };

        let plan = plan(&snapshot, &network);
        assert_eq!(plan.legs.len(), 1);
        assert_eq!(plan.legs[0].order, high.id);
        assert_eq!(plan.deferred[0].order, normal.id);
        assert_eq!(plan.deferred[0].reason, DeferReason::NoReachableSeaplane);
    }

    #[test]
    fn test_oversized_order_is_split_largest_first() {
        let network = network();
        let big = order(1, Priority::Normal, 2, 10);
        let snapshot = PlanningSnapshot {
            orders: vec![big],
            seaplanes: vec![
                seaplane("HB-LSA", 4, 2),
                seaplane("HB-LSB", 6, 1),
                seaplane("HB-LSC", 2, 3),
            ],
            empty_lockers: lockers(&[(2, 20)]),
        };

        let plan = plan(&snapshot, &network);
        let legs: Vec<(&str, u32)> = plan
            .legs
            .iter()
            .map(|l| (l.seaplane.0.as_str(), l.boxes))
            .collect();
        assert_eq!(legs, vec![("HB-LSB", 6), ("HB-LSA", 4)]);
        assert!(plan.deferred.is_empty());
    }

    #[test]
    fn test_nearest_fitting_seaplane_wins() {
        let network = network();
        let snapshot = PlanningSnapshot {
            orders: vec![order(1, Priority::Normal, 2, 3)],
            seaplanes: vec![seaplane("HB-FAR", 50, 3), seaplane("HB-NEAR", 5, 2)],
            empty_lockers: lockers(&[(2, 5)]),
        };

        let plan = plan(&snapshot, &network);
        assert_eq!(plan.legs[0].seaplane, SeaplaneId::from("HB-NEAR"));
        assert_eq!(plan.legs[0].distance_km, 0.0);
    }

    #[test]
    fn test_unreachable_destination_defers() {
        let network = network();
        let snapshot = PlanningSnapshot {
            orders: vec![order(1, Priority::Urgent, 4, 1)],
            seaplanes: vec![seaplane("HB-LSA", 5, 1)],
            empty_lockers: lockers(&[(4, 5)]),
        };

        let plan = plan(&snapshot, &network);
        assert!(plan.legs.is_empty());
        assert_eq!(plan.deferred[0].reason, DeferReason::NoReachableSeaplane);
    }

    #[test]
    fn test_full_port_defers_and_unknown_port_fails() {
        let network = network();
        let full = order(1, Priority::Normal, 2, 1);
        let lost = order(2, Priority::Normal, 99, 1);
        let snapshot = PlanningSnapshot {
            orders: vec![full.clone(), lost.clone()],
            seaplanes: vec![seaplane("HB-LSA", 5, 1)],
            empty_lockers: lockers(&[(2, 0)]),
        };

        let plan = plan(&snapshot, &network);
        assert_eq!(plan.deferred[0].reason, DeferReason::NoLockerAvailable);
        assert_eq!(plan.failed.len(), 1);
        assert_eq!(plan.failed[0].0, lost.id);
    }

    #[test]
    fn test_payload_limit_caps_leg_size() {
        let network = network();
        let mut plane = seaplane("HB-LSA", 10, 1);
        plane.max_payload_kg = Some(30.0);
        let snapshot = PlanningSnapshot {
            orders: vec![order(1, Priority::Normal, 2, 5)],
            seaplanes: vec![plane],
            empty_lockers: lockers(&[(2, 10)]),
        };

        let plan = plan(&snapshot, &network);
        assert_eq!(plan.legs[0].boxes, 3);
        assert_eq!(plan.deferred[0].boxes_remaining, 2);
    }
}
