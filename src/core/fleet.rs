use crate::core::network::PortNetwork;
use crate::domain::model::{PortId, Seaplane, SeaplaneEvent, SeaplaneId, SeaplaneStatus};
use crate::utils::error::{DispatchError, Result};
use crate::utils::validation::validate_non_empty_string;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Partial update; `None` leaves the field as is.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeaplanePatch {
    pub model: Option<String>,
    pub box_capacity: Option<u32>,
    pub fuel_consumption_km: Option<f64>,
    pub cruise_speed_kmh: Option<f64>,
    pub max_payload_kg: Option<f64>,
    pub status: Option<SeaplaneStatus>,
}

fn validate_performance(seaplane: &Seaplane) -> Result<()> {
    validate_non_empty_string("model", &seaplane.model)?;
    if seaplane.box_capacity < 1 {
        return Err(DispatchError::InvalidArgument {
            field: "box_capacity".to_string(),
            reason: "a seaplane carries at least one box".to_string(),
        });
    }
    let payload = seaplane.max_payload_kg.map(|kg| ("max_payload_kg", kg));
    for (field, value) in [
        ("fuel_consumption_km", seaplane.fuel_consumption_km),
        ("cruise_speed_kmh", seaplane.cruise_speed_kmh),
        ("fuel_capacity_l", seaplane.fuel_capacity_l),
    ]
    .into_iter()
    .chain(payload)
    {
        if !(value > 0.0 && value.is_finite()) {
            return Err(DispatchError::InvalidArgument {
                field: field.to_string(),
                reason: format!("must be a positive number, got {}", value),
            });
        }
    }
    Ok(())
}

/// Idle seaplanes with at least `min_capacity` boxes, nearest to `near`
/// first; equal distances fall back to the registration mark.
pub fn rank_candidates<'a>(
    seaplanes: impl IntoIterator<Item = &'a Seaplane>,
    min_capacity: u32,
    near: PortId,
    network: &PortNetwork,
) -> Result<Vec<(f64, Seaplane)>> {
    let mut ranked = Vec::new();
    for seaplane in seaplanes {
        if !seaplane.status.is_idle() || seaplane.box_capacity < min_capacity {
            continue;
        }
        let Some(location) = seaplane.current_location else {
            continue;
        };
        ranked.push((network.distance(location, near)?, seaplane.clone()));
    }
    ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
    Ok(ranked)
}

#[derive(Debug, Default)]
pub struct FleetRegistry {
    seaplanes: DashMap<SeaplaneId, Seaplane>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, seaplane: Seaplane) -> Result<()> {
        validate_performance(&seaplane)?;

        let flying = seaplane.status == SeaplaneStatus::InFlight;
        if flying != seaplane.current_location.is_none() || flying != seaplane.flight.is_some() {
            return Err(DispatchError::InvalidArgument {
                field: "current_location".to_string(),
                reason: format!(
                    "seaplane {} must have a position unless it is in flight",
                    seaplane.id
                ),
            });
        }

        match self.seaplanes.entry(seaplane.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(DispatchError::DuplicateEntity {
                kind: "seaplane",
                id: seaplane.id.to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::info!(
                    "Registered seaplane {} ({}, {} boxes)",
                    seaplane.id,
                    seaplane.model,
                    seaplane.box_capacity
                );
                slot.insert(seaplane);
                Ok(())
            }
        }
    }

    pub fn update(&self, id: &SeaplaneId, patch: SeaplanePatch) -> Result<Seaplane> {
        let mut entry = self
            .seaplanes
            .get_mut(id)
            .ok_or_else(|| DispatchError::UnknownSeaplane(id.to_string()))?;

        let mut next = entry.clone();
        if let Some(status) = patch.status {
            if status != next.status {
                if next.status == SeaplaneStatus::InFlight {
                    return Err(DispatchError::invalid_transition(
                        "seaplane",
                        id,
                        next.status,
                        format!("update status to {}", status),
                    ));
                }
                if status == SeaplaneStatus::InFlight {
                    return Err(DispatchError::InvalidArgument {
                        field: "status".to_string(),
                        reason: "IN_FLIGHT is only reachable by departing".to_string(),
                    });
                }
                next.status = status;
            }
        }
        if let Some(model) = patch.model {
            next.model = model;
        }
        if let Some(capacity) = patch.box_capacity {
            next.box_capacity = capacity;
        }
        if let Some(consumption) = patch.fuel_consumption_km {
            next.fuel_consumption_km = consumption;
        }
        if let Some(speed) = patch.cruise_speed_kmh {
            next.cruise_speed_kmh = speed;
        }
        if let Some(payload) = patch.max_payload_kg {
            next.max_payload_kg = Some(payload);
        }
        validate_performance(&next)?;

        *entry = next.clone();
        Ok(next)
    }

    pub fn remove(&self, id: &SeaplaneId) -> Result<Seaplane> {
        let removed = self.seaplanes.remove_if(id, |_, s| s.status != SeaplaneStatus::InFlight);
        match removed {
            Some((_, seaplane)) => Ok(seaplane),
            None if self.seaplanes.contains_key(id) => Err(DispatchError::Conflict {
                reason: format!("seaplane {} is in flight", id),
            }),
            None => Err(DispatchError::UnknownSeaplane(id.to_string())),
        }
    }

    pub fn seaplane(&self, id: &SeaplaneId) -> Result<Seaplane> {
        self.seaplanes
            .get(id)
            .map(|s| s.clone())
            .ok_or_else(|| DispatchError::UnknownSeaplane(id.to_string()))
    }

    pub fn seaplanes(&self) -> Vec<Seaplane> {
        let mut all: Vec<Seaplane> = self.seaplanes.iter().map(|s| s.value().clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Snapshot of AVAILABLE and AT_PORT seaplanes.
    pub fn idle(&self) -> Vec<Seaplane> {
        let mut idle: Vec<Seaplane> = self
            .seaplanes
            .iter()
            .filter(|s| s.status.is_idle())
            .map(|s| s.value().clone())
            .collect();
        idle.sort_by(|a, b| a.id.cmp(&b.id));
        idle
    }

    pub fn find_available(
        &self,
        min_capacity: u32,
        near: PortId,
        network: &PortNetwork,
    ) -> Result<Vec<Seaplane>> {
        let idle = self.idle();
        Ok(rank_candidates(&idle, min_capacity, near, network)?
            .into_iter()
            .map(|(_, seaplane)| seaplane)
            .collect())
    }

    /// Atomic commit point for a seaplane: AVAILABLE/AT_PORT -> IN_FLIGHT.
    /// Returns the port it left from.
    pub fn depart(&self, id: &SeaplaneId, destination: PortId) -> Result<PortId> {
        let mut seaplane = self
            .seaplanes
            .get_mut(id)
            .ok_or_else(|| DispatchError::UnknownSeaplane(id.to_string()))?;
        let origin = seaplane.current_location;
        seaplane.apply(SeaplaneEvent::Depart { destination })?;

        let origin = origin.unwrap_or(destination);
        tracing::debug!("Seaplane {} departed {} for {}", id, origin, destination);
        Ok(origin)
    }

    pub fn arrive(&self, id: &SeaplaneId, port: PortId) -> Result<Seaplane> {
        self.apply(id, SeaplaneEvent::Arrive { port })
    }

    pub fn set_maintenance(&self, id: &SeaplaneId) -> Result<Seaplane> {
        self.apply(id, SeaplaneEvent::EnterMaintenance)
    }

    pub fn return_to_service(&self, id: &SeaplaneId) -> Result<Seaplane> {
        self.apply(id, SeaplaneEvent::ReturnToService)
    }

    fn apply(&self, id: &SeaplaneId, event: SeaplaneEvent) -> Result<Seaplane> {
        let mut seaplane = self
            .seaplanes
            .get_mut(id)
            .ok_or_else(|| DispatchError::UnknownSeaplane(id.to_string()))?;
        seaplane.apply(event)?;
        Ok(seaplane.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{Port, DEFAULT_FUEL_CAPACITY_L};
    use std::sync::{Arc, Barrier};

    fn network() -> PortNetwork {
        let network = PortNetwork::new();
        for (id, name, lat, lon) in [
            (1, "Puerto Baquerizo Moreno", -0.9025, -89.609167),
            (2, "Puerto Ayora", -0.7400, -90.3117),
            (3, "Punta Cormorant", -1.2333, -90.4167),
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

    fn seaplane(id: &str, capacity: u32, status: SeaplaneStatus, at: Option<u32>) -> Seaplane {
        Seaplane {
            id: id.into(),
            model: "Cessna 208 Caravan".to_string(),
            status,
            box_capacity: capacity,
            fuel_consumption_km: 20.0,
            cruise_speed_kmh: 280.0,
            fuel_capacity_l: DEFAULT_FUEL_CAPACITY_L,
            max_payload_kg: None,
            current_location: at.map(PortId),
            flight: None,
        }
    }

    fn fleet() -> FleetRegistry {
        let fleet = FleetRegistry::new();
        fleet
            .register(seaplane("HB-LSA", 100, SeaplaneStatus::Available, Some(1)))
            .unwrap();
        fleet
            .register(seaplane("HB-LSB", 50, SeaplaneStatus::AtPort, Some(2)))
            .unwrap();
        fleet
            .register(seaplane("HB-LSC", 100, SeaplaneStatus::Maintenance, Some(2)))
            .unwrap();
        fleet
            .register(seaplane("HB-LSD", 75, SeaplaneStatus::AtPort, Some(3)))
            .unwrap();
        fleet
    }

    #[test]
    fn test_find_available_sorts_by_distance_and_filters() {
        let network = network();
        let fleet = fleet();

        let near_ayora = fleet.find_available(1, PortId(2), &network).unwrap();
        let ids: Vec<&str> = near_ayora.iter().map(|s| s.id.0.as_str()).collect();
        assert_eq!(ids, vec!["HB-LSB", "HB-LSD", "HB-LSA"]);

        let big = fleet.find_available(60, PortId(2), &network).unwrap();
        let ids: Vec<&str> = big.iter().map(|s| s.id.0.as_str()).collect();
        assert_eq!(ids, vec!["HB-LSD", "HB-LSA"]);

        assert!(fleet.find_available(101, PortId(2), &network).unwrap().is_empty());
    }

    #[test]
    fn test_depart_and_arrive_update_position() {
        let fleet = fleet();
        let id = SeaplaneId::from("HB-LSA");

        let origin = fleet.depart(&id, PortId(2)).unwrap();
        assert_eq!(origin, PortId(1));
        let flying = fleet.seaplane(&id).unwrap();
        assert!(flying.route());
        assert_eq!(flying.current_location, None);

        let err = fleet.depart(&id, PortId(3)).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));

        let landed = fleet.arrive(&id, PortId(2)).unwrap();
        assert_eq!(landed.status, SeaplaneStatus::AtPort);
        assert_eq!(landed.current_location, Some(PortId(2)));
    }

    #[test]
    fn test_maintenance_blocks_departure() {
        let fleet = fleet();
        let err = fleet.depart(&"HB-LSC".into(), PortId(1)).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));

        fleet.return_to_service(&"HB-LSC".into()).unwrap();
        assert!(fleet.depart(&"HB-LSC".into(), PortId(1)).is_ok());
    }

    #[test]
    fn test_update_refuses_status_change_in_flight() {
        let fleet = fleet();
        let id = SeaplaneId::from("HB-LSB");
        fleet.depart(&id, PortId(1)).unwrap();

        let err = fleet
            .update(
                &id,
                SeaplanePatch {
                    status: Some(SeaplaneStatus::Available),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));

        let updated = fleet
            .update(
                &id,
                SeaplanePatch {
                    model: Some("Grumman G-21 Goose".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.model, "Grumman G-21 Goose");

        let err = fleet.remove(&id).unwrap_err();
        assert!(matches!(err, DispatchError::Conflict { .. }));
    }

    #[test]
    fn test_register_validates_and_rejects_duplicates() {
        let fleet = fleet();
        assert!(matches!(
            fleet.register(seaplane("HB-LSA", 10, SeaplaneStatus::Available, Some(1))),
            Err(DispatchError::DuplicateEntity { .. })
        ));
        assert!(fleet
            .register(seaplane("HB-ZERO", 0, SeaplaneStatus::Available, Some(1)))
            .is_err());
        assert!(fleet
            .register(seaplane("HB-LOST", 10, SeaplaneStatus::Available, None))
            .is_err());
    }

    #[test]
    fn test_payload_limit_must_be_positive() {
        let fleet = fleet();
        for kg in [0.0, -450.0, f64::NAN, f64::INFINITY] {
            let mut heavy = seaplane("HB-LSP", 10, SeaplaneStatus::Available, Some(1));
            heavy.max_payload_kg = Some(kg);
            assert!(matches!(
                fleet.register(heavy),
                Err(DispatchError::InvalidArgument { ref field, .. }) if field == "max_payload_kg"
            ));
        }

        let mut caravan = seaplane("HB-LSP", 10, SeaplaneStatus::Available, Some(1));
        caravan.max_payload_kg = Some(1_400.0);
        fleet.register(caravan).unwrap();

        let refused = fleet.update(
            &"HB-LSP".into(),
            SeaplanePatch {
                max_payload_kg: Some(0.0),
                ..Default::default()
            },
        );
        assert!(refused.is_err());
        assert_eq!(
            fleet.seaplane(&"HB-LSP".into()).unwrap().max_payload_kg,
            Some(1_400.0)
        );
    }

    #[test]
    fn test_concurrent_depart_commits_once() {
        let fleet = Arc::new(fleet());
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [PortId(2), PortId(3)]
            .into_iter()
            .map(|destination| {
                let fleet = Arc::clone(&fleet);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    fleet.depart(&"HB-LSA".into(), destination)
                })
            })
            .collect();

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.is_ok())
            .count();
        assert_eq!(granted, 1);
    }
}
