use crate::core::dispatch::{ArrivalReport, CycleReport, DispatchEngine};
use crate::core::fleet::{FleetRegistry, SeaplanePatch};
use crate::core::lockers::LockerRegistry;
use crate::core::network::{PortFilter, PortNetwork};
use crate::core::orders::{BoxFilter, NewClient, NewProduct, OrderBook, OrderFilter};
use crate::core::planner::Plan;
use crate::domain::model::{
    Assignment, AssignmentId, BoxId, CargoBox, Client, ClientId, Locker, LockerId, LockerStatus,
    Order, OrderId, OrderRequest, Port, PortId, Product, ProductId, Seaplane, SeaplaneId,
    SeaplaneStatus,
};
use crate::domain::ports::{PolicyProvider, Storage};
use crate::utils::error::{DispatchError, Result};
use crate::utils::validation::{validate_coordinates, validate_non_empty_string};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPort {
    pub name: String,
    pub island: String,
    pub lat: f64,
    pub lon: f64,
    pub lockers: usize,
    pub warehouse: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSeaplane {
    pub id: SeaplaneId,
    pub model: String,
    pub box_capacity: u32,
    pub fuel_consumption_km: f64,
    pub cruise_speed_kmh: f64,
    /// 未指定時採用政策預設油箱容量
    pub fuel_capacity_l: Option<f64>,
    pub max_payload_kg: Option<f64>,
    /// 未指定時停在倉庫港
    pub location: Option<PortId>,
    pub maintenance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortView {
    #[serde(flatten)]
    pub port: Port,
    pub lockers: Vec<Locker>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeaplaneView {
    #[serde(flatten)]
    pub seaplane: Seaplane,
    pub location: Option<String>,
    pub route: bool,
    pub assignment: Option<AssignmentId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemView {
    pub product: ProductId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub weight_kg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    pub client_name: Option<String>,
    pub destination_name: Option<String>,
    pub manifest: Vec<ItemView>,
}

/// Everything the outer layer can read, in one consistent-enough pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub ports: Vec<PortView>,
    pub seaplanes: Vec<SeaplaneView>,
    pub clients: Vec<Client>,
    pub products: Vec<Product>,
    pub orders: Vec<OrderView>,
    pub archived_orders: Vec<OrderView>,
    pub boxes: Vec<CargoBox>,
    pub assignments: Vec<Assignment>,
}

/// Entry point for a transport layer: every inbound operation and every
/// read-only projection goes through here.
pub struct DispatchService {
    network: Arc<PortNetwork>,
    lockers: Arc<LockerRegistry>,
    fleet: Arc<FleetRegistry>,
    orders: Arc<OrderBook>,
    engine: DispatchEngine,
    new_orders: Arc<Notify>,
}

impl DispatchService {
    pub fn new(policy: &dyn PolicyProvider) -> Self {
        let network = Arc::new(PortNetwork::new());
        let lockers = Arc::new(LockerRegistry::new());
        let fleet = Arc::new(FleetRegistry::new());
        let orders = Arc::new(OrderBook::new());
        let engine = DispatchEngine::new(
            Arc::clone(&network),
            Arc::clone(&lockers),
            Arc::clone(&fleet),
            Arc::clone(&orders),
            policy,
        );

        Self {
            network,
            lockers,
            fleet,
            orders,
            engine,
            new_orders: Arc::new(Notify::new()),
        }
    }

    pub fn network(&self) -> &PortNetwork {
        &self.network
    }

    pub fn lockers(&self) -> &LockerRegistry {
        &self.lockers
    }

    pub fn fleet(&self) -> &FleetRegistry {
        &self.fleet
    }

    pub fn orders(&self) -> &OrderBook {
        &self.orders
    }

    pub fn engine(&self) -> &DispatchEngine {
        &self.engine
    }

    /// Fires once per accepted order; the scheduler listens on it.
    pub fn new_order_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.new_orders)
    }

    // ---------------------------------------------------------------------
    // Ports & lockers
    // ---------------------------------------------------------------------

    pub fn add_port(&self, new: NewPort) -> Result<Port> {
        validate_non_empty_string("name", &new.name)?;
        validate_coordinates(&new.name, new.lat, new.lon)?;

        let port = Port {
            id: self.network.next_id(),
            name: new.name,
            island: new.island,
            lat: new.lat,
            lon: new.lon,
            locker_count: 0,
            warehouse: new.warehouse,
        };
        self.network.add_port(port.clone())?;
        self.with_locker_count(port.id, || {
            self.lockers.provision(port.id, new.lockers);
            Ok(())
        })?;
        self.network.port(port.id)
    }

    pub fn add_locker(&self, port: PortId) -> Result<Locker> {
        self.with_locker_count(port, || Ok(self.lockers.add_locker(port)))
    }

    pub fn remove_locker(&self, id: LockerId) -> Result<Locker> {
        let port = self.lockers.locker(id)?.port;
        self.with_locker_count(port, || self.lockers.remove_locker(id))
    }

    /// Changes a port's lockers and recounts them under the port's entry,
    /// so `locker_count` always matches the registry.
    fn with_locker_count<T>(&self, port: PortId, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.network.update_port(port, |p| {
            let out = f()?;
            p.locker_count = self.lockers.count(p.id);
            Ok(out)
        })
    }

    pub fn set_locker_maintenance(&self, id: LockerId, reason: &str) -> Result<Locker> {
        self.lockers.set_maintenance(id, reason)
    }

    pub fn clear_locker_maintenance(&self, id: LockerId) -> Result<Locker> {
        self.lockers.clear_maintenance(id)
    }

    /// The recipient collected the box.
    pub fn release_locker(&self, id: LockerId) -> Result<Locker> {
        self.lockers.release(id)
    }

    pub fn update_locker_status(
        &self,
        id: LockerId,
        status: LockerStatus,
        reason: Option<&str>,
    ) -> Result<Locker> {
        self.lockers.update_status(id, status, reason)
    }

    // ---------------------------------------------------------------------
    // Fleet
    // ---------------------------------------------------------------------

    pub fn register_seaplane(&self, new: NewSeaplane) -> Result<Seaplane> {
        let location = match new.location.or_else(|| self.network.warehouse()) {
            Some(port) if self.network.contains(port) => port,
            Some(port) => return Err(DispatchError::UnknownPort(port.to_string())),
            None => {
                return Err(DispatchError::InvalidArgument {
                    field: "location".to_string(),
                    reason: format!("seaplane {} has no base and no warehouse is set", new.id),
                })
            }
        };

        let seaplane = Seaplane {
            id: new.id,
            model: new.model,
            status: if new.maintenance {
                SeaplaneStatus::Maintenance
            } else {
                SeaplaneStatus::Available
            },
            box_capacity: new.box_capacity,
            fuel_consumption_km: new.fuel_consumption_km,
            cruise_speed_kmh: new.cruise_speed_kmh,
            fuel_capacity_l: new
                .fuel_capacity_l
                .unwrap_or(self.engine.policy().default_fuel_capacity_l),
            max_payload_kg: new.max_payload_kg,
            current_location: Some(location),
            flight: None,
        };
        self.fleet.register(seaplane.clone())?;
        Ok(seaplane)
    }

    pub fn update_seaplane(&self, id: &SeaplaneId, patch: SeaplanePatch) -> Result<Seaplane> {
        self.fleet.update(id, patch)
    }

    pub fn remove_seaplane(&self, id: &SeaplaneId) -> Result<Seaplane> {
        if let Some(open) = self.engine.open_assignment_for(id) {
            return Err(DispatchError::Conflict {
                reason: format!("seaplane {} is flying leg {}", id, open.id),
            });
        }
        self.fleet.remove(id)
    }

    pub fn set_seaplane_maintenance(&self, id: &SeaplaneId) -> Result<Seaplane> {
        self.fleet.set_maintenance(id)
    }

    pub fn return_seaplane_to_service(&self, id: &SeaplaneId) -> Result<Seaplane> {
        self.fleet.return_to_service(id)
    }

    // ---------------------------------------------------------------------
    // Catalog, clients, orders
    // ---------------------------------------------------------------------

    pub fn add_product(&self, new: NewProduct) -> Result<Product> {
        self.orders.add_product(new)
    }

    pub fn restock(&self, id: ProductId, quantity: u32) -> Result<Product> {
        self.orders.restock(id, quantity)
    }

    pub fn register_client(&self, new: NewClient) -> Result<Client> {
        self.orders.register_client(new)
    }

    pub fn remove_client(&self, id: ClientId) -> Result<Client> {
        self.orders.remove_client(id)
    }

    pub fn submit_order(&self, request: OrderRequest) -> Result<Order> {
        if !self.network.contains(request.destination) {
            return Err(DispatchError::UnknownPort(request.destination.to_string()));
        }
        let order = self.orders.submit(request)?;
        self.new_orders.notify_one();
        Ok(order)
    }

    pub fn withdraw_order(&self, id: OrderId) -> Result<Order> {
        self.orders.withdraw(id)
    }

    pub fn delete_order(&self, id: OrderId) -> Result<Order> {
        self.orders.delete(id)
    }

    pub fn boxes(&self, filter: &BoxFilter) -> Vec<CargoBox> {
        self.orders.boxes(filter)
    }

    pub fn cargo_box(&self, id: BoxId) -> Result<CargoBox> {
        self.orders.cargo_box(id)
    }

    /// 登記箱內物品，空字串清除
    pub fn set_box_content(&self, id: BoxId, content: &str) -> Result<CargoBox> {
        self.orders.set_box_content(id, content)
    }

    // ---------------------------------------------------------------------
    // Dispatch
    // ---------------------------------------------------------------------

    pub fn preview(&self) -> Plan {
        self.engine.preview()
    }

    pub fn run_cycle(&self, now: DateTime<Utc>) -> CycleReport {
        self.engine.run_cycle(now)
    }

    pub fn arrive(&self, id: AssignmentId, now: DateTime<Utc>) -> Result<ArrivalReport> {
        self.engine.arrive(id, now)
    }

    pub fn arrive_due(&self, now: DateTime<Utc>) -> Vec<ArrivalReport> {
        self.engine.arrive_due(now)
    }

    pub fn abort(&self, id: AssignmentId, now: DateTime<Utc>) -> Result<Assignment> {
        self.engine.abort(id, now)
    }

    // ---------------------------------------------------------------------
    // Read side
    // ---------------------------------------------------------------------

    pub fn port_views(&self, filter: &PortFilter) -> Vec<PortView> {
        self.network
            .ports(filter)
            .into_iter()
            .map(|port| PortView {
                lockers: self.lockers.lockers(Some(port.id), None),
                port,
            })
            .collect()
    }

    pub fn seaplane_views(&self) -> Vec<SeaplaneView> {
        self.fleet
            .seaplanes()
            .into_iter()
            .map(|seaplane| SeaplaneView {
                location: seaplane
                    .current_location
                    .and_then(|id| self.network.port(id).ok())
                    .map(|p| p.name),
                route: seaplane.route(),
                assignment: self.engine.open_assignment_for(&seaplane.id).map(|a| a.id),
                seaplane,
            })
            .collect()
    }

    pub fn order_views(&self, filter: &OrderFilter) -> Vec<OrderView> {
        self.orders
            .orders(filter)
            .into_iter()
            .map(|order| self.order_view(order))
            .collect()
    }

    fn order_view(&self, order: Order) -> OrderView {
        let manifest = order
            .items
            .iter()
            .filter_map(|item| {
                self.orders.product(item.product).ok().map(|p| ItemView {
                    product: p.id,
                    name: p.name,
                    quantity: item.quantity,
                    unit_price: p.unit_price,
                    weight_kg: p.weight_kg,
                })
            })
            .collect();

        OrderView {
            client_name: self.orders.client(order.client).ok().map(|c| c.name),
            destination_name: self.network.port(order.destination).ok().map(|p| p.name),
            manifest,
            order,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            taken_at: Utc::now(),
            ports: self.port_views(&PortFilter::default()),
            seaplanes: self.seaplane_views(),
            clients: self.orders.clients(),
            products: self.orders.products(),
            orders: self.order_views(&OrderFilter::default()),
            archived_orders: self
                .orders
                .archived()
                .into_iter()
                .map(|o| self.order_view(o))
                .collect(),
            boxes: self.orders.boxes(&BoxFilter::default()),
            assignments: self.engine.assignments(),
        }
    }

    pub async fn save_snapshot(&self, storage: &dyn Storage, path: &str) -> Result<usize> {
        let data = serde_json::to_vec_pretty(&self.snapshot())?;
        storage.write_file(path, &data).await?;
        tracing::info!("Snapshot written to {} ({} bytes)", path, data.len());
        Ok(data.len())
    }
}
