use crate::domain::model::{Port, PortId, Seaplane};
use crate::utils::error::{DispatchError, Result};
use dashmap::DashMap;
use parking_lot::RwLock;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two coordinates (haversine).
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}

#[derive(Debug, Clone, Default)]
pub struct PortFilter {
    pub id: Option<PortId>,
    pub name: Option<String>,
    /// 島名子字串，不分大小寫
    pub island: Option<String>,
}

impl PortFilter {
    fn matches(&self, port: &Port) -> bool {
        if let Some(id) = self.id {
            if port.id != id {
                return false;
            }
        }
        if let Some(name) = &self.name {
            if &port.name != name {
                return false;
            }
        }
        if let Some(island) = &self.island {
            if !port
                .island
                .to_lowercase()
                .contains(&island.to_lowercase())
            {
                return false;
            }
        }
        true
    }
}

/// Fully connected graph of ports. Seaplanes fly point to point over open
/// water, so the edge weight is just the great-circle distance.
#[derive(Debug, Default)]
pub struct PortNetwork {
    ports: DashMap<PortId, Port>,
    warehouse: RwLock<Option<PortId>>,
}

impl PortNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_port(&self, port: Port) -> Result<()> {
        if self.ports.contains_key(&port.id) {
            return Err(DispatchError::DuplicateEntity {
                kind: "port",
                id: port.id.to_string(),
            });
        }
        if self.port_by_name(&port.name).is_some() {
            return Err(DispatchError::DuplicateEntity {
                kind: "port",
                id: port.name.clone(),
            });
        }

        if port.warehouse {
            let mut warehouse = self.warehouse.write();
            if let Some(existing) = *warehouse {
                return Err(DispatchError::DuplicateEntity {
                    kind: "warehouse",
                    id: existing.to_string(),
                });
            }
            *warehouse = Some(port.id);
        }

        tracing::debug!("Provisioned port {} ({}, {})", port.id, port.name, port.island);
        self.ports.insert(port.id, port);
        Ok(())
    }

    pub fn next_id(&self) -> PortId {
        let max = self.ports.iter().map(|p| p.key().0).max().unwrap_or(0);
        PortId(max + 1)
    }

    pub fn port(&self, id: PortId) -> Result<Port> {
        self.ports
            .get(&id)
            .map(|p| p.clone())
            .ok_or_else(|| DispatchError::UnknownPort(id.to_string()))
    }

    pub fn port_by_name(&self, name: &str) -> Option<Port> {
        self.ports
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value().clone())
    }

    pub fn contains(&self, id: PortId) -> bool {
        self.ports.contains_key(&id)
    }

    pub fn ports(&self, filter: &PortFilter) -> Vec<Port> {
        let mut ports: Vec<Port> = self
            .ports
            .iter()
            .filter(|p| filter.matches(p.value()))
            .map(|p| p.value().clone())
            .collect();
        ports.sort_by_key(|p| p.id);
        ports
    }

    pub fn warehouse(&self) -> Option<PortId> {
        *self.warehouse.read()
    }

    /// Runs `f` while holding the port's entry; concurrent updates of the
    /// same port are applied one after the other.
    pub fn update_port<T>(&self, id: PortId, f: impl FnOnce(&mut Port) -> Result<T>) -> Result<T> {
        let mut port = self
            .ports
            .get_mut(&id)
            .ok_or_else(|| DispatchError::UnknownPort(id.to_string()))?;
        f(&mut port)
    }

    fn coordinates(&self, id: PortId) -> Result<(f64, f64)> {
        self.ports
            .get(&id)
            .map(|p| (p.lat, p.lon))
            .ok_or_else(|| DispatchError::UnknownPort(id.to_string()))
    }

    pub fn distance(&self, from: PortId, to: PortId) -> Result<f64> {
        let (lat1, lon1) = self.coordinates(from)?;
        let (lat2, lon2) = self.coordinates(to)?;
        if from == to {
            return Ok(0.0);
        }
        Ok(haversine_km(lat1, lon1, lat2, lon2))
    }

    /// Full-tank range check for a single leg.
    pub fn reachable(&self, seaplane: &Seaplane, from: PortId, to: PortId) -> Result<bool> {
        let distance = self.distance(from, to)?;
        Ok(distance * seaplane.fuel_consumption_km <= seaplane.fuel_capacity_l)
    }

    pub fn flight_time(
        &self,
        seaplane: &Seaplane,
        from: PortId,
        to: PortId,
    ) -> Result<chrono::Duration> {
        if seaplane.cruise_speed_kmh <= 0.0 {
            return Err(DispatchError::InvalidArgument {
                field: "cruise_speed_kmh".to_string(),
                reason: format!("seaplane {} has no cruise speed", seaplane.id),
            });
        }
        let hours = self.distance(from, to)? / seaplane.cruise_speed_kmh;
        Ok(chrono::Duration::seconds((hours * 3600.0).round() as i64))
    }

    pub fn nearest(
        &self,
        from: PortId,
        candidates: impl IntoIterator<Item = PortId>,
    ) -> Result<Option<PortId>> {
        let mut best: Option<(f64, PortId)> = None;
        for candidate in candidates {
            let d = self.distance(from, candidate)?;
            match best {
                Some((best_d, best_id)) if (best_d, best_id) <= (d, candidate) => {}
                _ => best = Some((d, candidate)),
            }
        }
        Ok(best.map(|(_, id)| id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{SeaplaneStatus, DEFAULT_FUEL_CAPACITY_L};

    fn port(id: u32, name: &str, island: &str, lat: f64, lon: f64) -> Port {
        Port {
            id: PortId(id),
            name: name.to_string(),
            island: island.to_string(),
            lat,
            lon,
            locker_count: 0,
            warehouse: false,
        }
    }

    fn network() -> PortNetwork {
        let network = PortNetwork::new();
        network
            .add_port(port(1, "Puerto Baquerizo Moreno", "San Cristóbal", -0.9025, -89.609167))
            .unwrap();
        network
            .add_port(port(2, "Puerto Ayora", "Santa Cruz", -0.7400, -90.3117))
            .unwrap();
        network
            .add_port(port(3, "Canal de Itabaca", "Santa Cruz", -0.4583, -90.2708))
            .unwrap();
        network
            .add_port(port(4, "Anse Darwin", "Darwin", 1.6780, -92.0030))
            .unwrap();
        network
    }

    fn twin_otter(fuel_capacity_l: f64) -> Seaplane {
        Seaplane {
            id: "HB-LSR".into(),
            model: "DHC-6 Twin Otter".to_string(),
            status: SeaplaneStatus::Available,
            box_capacity: 100,
            fuel_consumption_km: 25.0,
            cruise_speed_kmh: 250.0,
            fuel_capacity_l,
            max_payload_kg: None,
            current_location: Some(PortId(1)),
            flight: None,
        }
    }

    #[test]
    fn test_distance_is_symmetric_and_plausible() {
        let network = network();
        let ab = network.distance(PortId(1), PortId(2)).unwrap();
        let ba = network.distance(PortId(2), PortId(1)).unwrap();

        assert_eq!(ab, ba);
        assert!(ab > 75.0 && ab < 85.0, "got {}", ab);
        assert_eq!(network.distance(PortId(2), PortId(2)).unwrap(), 0.0);
    }

    #[test]
    fn test_unknown_port_is_reported() {
        let network = network();
        let err = network.distance(PortId(1), PortId(99)).unwrap_err();
        assert!(matches!(err, DispatchError::UnknownPort(_)));
        assert!(network.reachable(&twin_otter(1.0), PortId(99), PortId(1)).is_err());
    }

    #[test]
    fn test_reachability_uses_full_tank_range() {
        let network = network();
        let plane = twin_otter(DEFAULT_FUEL_CAPACITY_L);

        assert!(network.reachable(&plane, PortId(1), PortId(2)).unwrap());
        // Darwin lies ~390 km from San Cristóbal, beyond 8,000 L / 25 L/km.
        assert!(!network.reachable(&plane, PortId(1), PortId(4)).unwrap());

        let exact = network.distance(PortId(1), PortId(2)).unwrap() * 25.0;
        assert!(network.reachable(&twin_otter(exact), PortId(1), PortId(2)).unwrap());
    }

    #[test]
    fn test_port_filters() {
        let network = network();
        let santa_cruz = network.ports(&PortFilter {
            island: Some("santa CRUZ".to_string()),
            ..Default::default()
        });
        assert_eq!(santa_cruz.len(), 2);

        let by_name = network.ports(&PortFilter {
            name: Some("Anse Darwin".to_string()),
            ..Default::default()
        });
        assert_eq!(by_name[0].id, PortId(4));
        assert_eq!(network.next_id(), PortId(5));
    }

    #[test]
    fn test_duplicate_port_and_single_warehouse() {
        let network = network();
        assert!(network
            .add_port(port(9, "Puerto Ayora", "Santa Cruz", 0.0, 0.0))
            .is_err());

        let mut base = port(10, "Base", "Baltra", -0.4511, -90.2653);
        base.warehouse = true;
        network.add_port(base).unwrap();
        assert_eq!(network.warehouse(), Some(PortId(10)));

        let mut second = port(11, "Second base", "Baltra", -0.45, -90.26);
        second.warehouse = true;
        assert!(network.add_port(second).is_err());
    }

    #[test]
    fn test_nearest_and_flight_time() {
        let network = network();
        let nearest = network
            .nearest(PortId(2), [PortId(1), PortId(3), PortId(4)])
            .unwrap();
        assert_eq!(nearest, Some(PortId(3)));

        let plane = twin_otter(DEFAULT_FUEL_CAPACITY_L);
        let minutes = network
            .flight_time(&plane, PortId(1), PortId(2))
            .unwrap()
            .num_minutes();
        assert!((17..=21).contains(&minutes), "got {}", minutes);
    }
}
