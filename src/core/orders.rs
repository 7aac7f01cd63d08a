use crate::domain::model::{
    queue_order, BoxId, BoxStatus, CargoBox, Client, ClientId, ClientRole, DispatchPolicy, Order,
    OrderEvent, OrderId, OrderRequest, OrderStatus, Product, ProductId, RequeuePolicy,
    WEIGHT_TOLERANCE_KG,
};
use crate::utils::error::{DispatchError, Result};
use crate::utils::validation::validate_non_empty_string;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub unit_price: f64,
    pub weight_kg: f64,
    pub stock_available: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClient {
    pub name: String,
    pub role: ClientRole,
    pub specialty: String,
    pub study: String,
    pub email: String,
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub client: Option<ClientId>,
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct BoxFilter {
    pub order: Option<OrderId>,
    pub client: Option<ClientId>,
    pub status: Option<BoxStatus>,
}

/// What an arrival or abort did to the order as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// 仍有箱子在途或待派送
    Open,
    Delivered,
    PartiallyDelivered { remainder: u32 },
}

/// Order intake, product stock and the client directory.
///
/// Orders are never deleted: withdrawn and archived orders move to a
/// separate archive map and stay readable.
#[derive(Debug, Default)]
pub struct OrderBook {
    orders: DashMap<OrderId, Order>,
    archive: DashMap<OrderId, Order>,
    catalog: Mutex<HashMap<ProductId, Product>>,
    clients: DashMap<ClientId, Client>,
    /// 箱子狀態只在持有所屬訂單的 entry 鎖時變更
    boxes: DashMap<BoxId, CargoBox>,
    seq: AtomicU64,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------

    pub fn add_product(&self, new: NewProduct) -> Result<Product> {
        validate_non_empty_string("name", &new.name)?;
        if !(new.weight_kg > 0.0 && new.weight_kg.is_finite()) {
            return Err(DispatchError::InvalidArgument {
                field: "weight_kg".to_string(),
                reason: format!("must be positive, got {}", new.weight_kg),
            });
        }
        if !(new.unit_price >= 0.0 && new.unit_price.is_finite()) {
            return Err(DispatchError::InvalidArgument {
                field: "unit_price".to_string(),
                reason: format!("must not be negative, got {}", new.unit_price),
            });
        }

        let product = Product {
            id: ProductId::new(),
            name: new.name,
            description: new.description,
            unit_price: new.unit_price,
            weight_kg: new.weight_kg,
            stock_available: new.stock_available,
        };
        self.catalog.lock().insert(product.id, product.clone());
        Ok(product)
    }

    pub fn restock(&self, id: ProductId, quantity: u32) -> Result<Product> {
        let mut catalog = self.catalog.lock();
        let product = catalog
            .get_mut(&id)
            .ok_or_else(|| DispatchError::UnknownProduct(id.to_string()))?;
        product.stock_available = product.stock_available.saturating_add(quantity);
        Ok(product.clone())
    }

    pub fn product(&self, id: ProductId) -> Result<Product> {
        self.catalog
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownProduct(id.to_string()))
    }

    pub fn products(&self) -> Vec<Product> {
        let mut products: Vec<Product> = self.catalog.lock().values().cloned().collect();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        products
    }

    // -----------------------------------------------------------------
    // Clients
    // -----------------------------------------------------------------

    pub fn register_client(&self, new: NewClient) -> Result<Client> {
        validate_non_empty_string("name", &new.name)?;
        if !new.email.contains('@') {
            return Err(DispatchError::InvalidArgument {
                field: "email".to_string(),
                reason: format!("'{}' is not an email address", new.email),
            });
        }

        let client = Client {
            id: ClientId::new(),
            name: new.name,
            role: new.role,
            specialty: new.specialty,
            study: new.study,
            email: new.email,
            order_history: Vec::new(),
        };
        self.clients.insert(client.id, client.clone());
        Ok(client)
    }

    pub fn remove_client(&self, id: ClientId) -> Result<Client> {
        let open = self
            .orders
            .iter()
            .filter(|o| o.client == id && !o.status.is_terminal())
            .count();
        if open > 0 {
            return Err(DispatchError::Conflict {
                reason: format!("client {} still has {} open order(s)", id, open),
            });
        }
        self.clients
            .remove(&id)
            .map(|(_, client)| client)
            .ok_or_else(|| DispatchError::UnknownClient(id.to_string()))
    }

    pub fn client(&self, id: ClientId) -> Result<Client> {
        self.clients
            .get(&id)
            .map(|c| c.clone())
            .ok_or_else(|| DispatchError::UnknownClient(id.to_string()))
    }

    pub fn clients(&self) -> Vec<Client> {
        let mut clients: Vec<Client> = self.clients.iter().map(|c| c.value().clone()).collect();
        clients.sort_by(|a, b| a.name.cmp(&b.name));
        clients
    }

    // -----------------------------------------------------------------
    // Intake
    // -----------------------------------------------------------------

    /// Validates the request and takes the stock for every item in one step.
    /// Nothing is decremented unless the whole order is accepted.
    pub fn submit(&self, request: OrderRequest) -> Result<Order> {
        if !self.clients.contains_key(&request.client) {
            return Err(DispatchError::UnknownClient(request.client.to_string()));
        }
        if request.items.is_empty() {
            return Err(DispatchError::invalid_order("an order needs at least one item"));
        }
        if request.items.iter().any(|item| item.quantity < 1) {
            return Err(DispatchError::invalid_order("item quantities start at 1"));
        }
        if request.box_count < 1 {
            return Err(DispatchError::invalid_order("declared box count must be at least 1"));
        }

        let total_quantity: u64 = request.items.iter().map(|i| i.quantity as u64).sum();
        if request.box_count as u64 > total_quantity {
            return Err(DispatchError::invalid_order(format!(
                "declared {} boxes but the items only fill {}",
                request.box_count, total_quantity
            )));
        }

        // 同一商品可能出現在多行
        let mut wanted: HashMap<ProductId, u64> = HashMap::new();
        for item in &request.items {
            *wanted.entry(item.product).or_default() += item.quantity as u64;
        }

        {
            let mut catalog = self.catalog.lock();

            let mut computed_weight = 0.0;
            for (product_id, quantity) in &wanted {
                let product = catalog
                    .get(product_id)
                    .ok_or_else(|| DispatchError::UnknownProduct(product_id.to_string()))?;
                if (product.stock_available as u64) < *quantity {
                    return Err(DispatchError::invalid_order(format!(
                        "insufficient stock for '{}': {} requested, {} available",
                        product.name, quantity, product.stock_available
                    )));
                }
                computed_weight += product.weight_kg * *quantity as f64;
            }

            if (computed_weight - request.total_weight_kg).abs() > WEIGHT_TOLERANCE_KG {
                return Err(DispatchError::invalid_order(format!(
                    "declared weight {:.2} kg does not match item weight {:.2} kg",
                    request.total_weight_kg, computed_weight
                )));
            }

            for (product_id, quantity) in &wanted {
                if let Some(product) = catalog.get_mut(product_id) {
                    // quantity <= stock_available, so it fits in u32
                    product.stock_available -= *quantity as u32;
                }
            }
        }

        let order = Order {
            id: OrderId::new(),
            client: request.client,
            created_at: Utc::now(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            status: OrderStatus::Pending,
            priority: request.priority,
            destination: request.destination,
            items: request.items,
            box_count: request.box_count,
            total_weight_kg: request.total_weight_kg,
            boxes_delivered: 0,
            boxes_undispatched: request.box_count,
            boxes_in_flight: 0,
            locker_shortfall: false,
            parent: None,
            attempts: 0,
        };
        self.file_boxes(&order);
        self.insert(order.clone());

        tracing::info!(
            "Order {} accepted: {} boxes, {:.2} kg to {} ({:?})",
            order.id,
            order.box_count,
            order.total_weight_kg,
            order.destination,
            order.priority
        );
        Ok(order)
    }

    /// One PENDING box per declared box, filed before the order becomes
    /// visible to the planner.
    fn file_boxes(&self, order: &Order) {
        for number in 1..=order.box_count {
            let cargo = CargoBox {
                id: BoxId::new(),
                order: order.id,
                client: order.client,
                number,
                status: BoxStatus::Pending,
                content: None,
            };
            self.boxes.insert(cargo.id, cargo);
        }
    }

    fn insert(&self, order: Order) {
        let (id, client) = (order.id, order.client);
        self.orders.insert(id, order);
        match self.clients.get_mut(&client) {
            Some(mut entry) => entry.order_history.push(id),
            None => tracing::warn!("Client {} vanished before order {} was filed", client, id),
        }
    }

    /// Cancels a PENDING order, gives its stock back and archives it.
    pub fn withdraw(&self, id: OrderId) -> Result<Order> {
        let (_, order) = self
            .orders
            .remove_if(&id, |_, o| o.status == OrderStatus::Pending)
            .ok_or_else(|| self.not_removable(id, "withdraw"))?;

        {
            let mut catalog = self.catalog.lock();
            for item in &order.items {
                if let Some(product) = catalog.get_mut(&item.product) {
                    product.stock_available = product.stock_available.saturating_add(item.quantity);
                }
            }
        }

        self.move_boxes(id, &[BoxStatus::Pending], BoxStatus::Cancelled);
        tracing::info!("Order {} withdrawn", id);
        self.archive.insert(id, order.clone());
        Ok(order)
    }

    /// Moves a terminal order out of the live book.
    pub fn archive(&self, id: OrderId) -> Result<Order> {
        let (_, order) = self
            .orders
            .remove_if(&id, |_, o| o.status.is_terminal())
            .ok_or_else(|| self.not_removable(id, "archive"))?;
        self.archive.insert(id, order.clone());
        Ok(order)
    }

    /// Delete as the transport layer sees it: withdraw while PENDING,
    /// archive once terminal, refuse while IN_TRANSIT.
    pub fn delete(&self, id: OrderId) -> Result<Order> {
        match self.order(id)?.status {
            OrderStatus::Pending => self.withdraw(id),
            OrderStatus::InTransit => Err(self.not_removable(id, "delete")),
            OrderStatus::Delivered | OrderStatus::PartiallyDelivered => self.archive(id),
        }
    }

    fn not_removable(&self, id: OrderId, event: &str) -> DispatchError {
        match self.orders.get(&id) {
            Some(order) => DispatchError::invalid_transition("order", id, order.status, event),
            None => DispatchError::UnknownOrder(id.to_string()),
        }
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    pub fn order(&self, id: OrderId) -> Result<Order> {
        self.orders
            .get(&id)
            .or_else(|| self.archive.get(&id))
            .map(|o| o.clone())
            .ok_or_else(|| DispatchError::UnknownOrder(id.to_string()))
    }

    pub fn orders(&self, filter: &OrderFilter) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| filter.client.map_or(true, |c| o.client == c))
            .filter(|o| filter.status.map_or(true, |s| o.status == s))
            .map(|o| o.value().clone())
            .collect();
        orders.sort_by_key(|o| o.seq);
        orders
    }

    pub fn archived(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.archive.iter().map(|o| o.value().clone()).collect();
        orders.sort_by_key(|o| o.seq);
        orders
    }

    pub fn cargo_box(&self, id: BoxId) -> Result<CargoBox> {
        self.boxes
            .get(&id)
            .map(|b| b.clone())
            .ok_or_else(|| DispatchError::UnknownBox(id.to_string()))
    }

    pub fn boxes(&self, filter: &BoxFilter) -> Vec<CargoBox> {
        let mut boxes: Vec<CargoBox> = self
            .boxes
            .iter()
            .filter(|b| filter.order.map_or(true, |o| b.order == o))
            .filter(|b| filter.client.map_or(true, |c| b.client == c))
            .filter(|b| filter.status.map_or(true, |s| b.status == s))
            .map(|b| b.value().clone())
            .collect();
        boxes.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.number.cmp(&b.number)));
        boxes
    }

    /// Lowest-numbered PENDING boxes of the order, at most `limit`.
    pub fn pending_boxes(&self, order: OrderId, limit: u32) -> Vec<BoxId> {
        self.boxes(&BoxFilter {
            order: Some(order),
            status: Some(BoxStatus::Pending),
            ..Default::default()
        })
        .into_iter()
        .take(limit as usize)
        .map(|b| b.id)
        .collect()
    }

    pub fn set_box_content(&self, id: BoxId, content: &str) -> Result<CargoBox> {
        let mut cargo = self
            .boxes
            .get_mut(&id)
            .ok_or_else(|| DispatchError::UnknownBox(id.to_string()))?;
        let content = content.trim();
        cargo.content = (!content.is_empty()).then(|| content.to_string());
        Ok(cargo.clone())
    }

    /// Orders with boxes still waiting for a seaplane, in queue order.
    pub fn dispatchable(&self) -> Vec<Order> {
        let mut queue: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| o.is_dispatchable())
            .map(|o| o.value().clone())
            .collect();
        queue.sort_by(|a, b| {
            queue_order(
                (a.priority, a.created_at, a.seq),
                (b.priority, b.created_at, b.seq),
            )
        });
        queue
    }

    // -----------------------------------------------------------------
    // Dispatch bookkeeping
    // -----------------------------------------------------------------

    /// Books the given PENDING boxes of the order onto a committed leg.
    /// Either every box moves IN_TRANSIT or none does.
    pub fn record_dispatch(
        &self,
        id: OrderId,
        box_ids: &[BoxId],
        locker_shortfall: bool,
    ) -> Result<Order> {
        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| DispatchError::UnknownOrder(id.to_string()))?;

        let boxes = box_ids.len() as u32;
        if order.locker_shortfall || boxes == 0 || order.boxes_undispatched < boxes {
            return Err(DispatchError::Conflict {
                reason: format!(
                    "order {} has {} undispatched boxes, leg wants {}",
                    id, order.boxes_undispatched, boxes
                ),
            });
        }
        for box_id in box_ids {
            let ready = self
                .boxes
                .get(box_id)
                .is_some_and(|b| b.order == id && b.status == BoxStatus::Pending);
            if !ready {
                return Err(DispatchError::Conflict {
                    reason: format!("box {} of order {} is no longer pending", box_id, id),
                });
            }
        }

        order.transition(OrderEvent::Dispatch)?;
        self.move_listed(box_ids, BoxStatus::InTransit)?;
        order.boxes_undispatched -= boxes;
        order.boxes_in_flight += boxes;
        order.locker_shortfall |= locker_shortfall;
        Ok(order.clone())
    }

    /// A leg landed; `delivered` lists the boxes of `dispatched` that
    /// reached a locker.
    pub fn record_arrival(
        &self,
        id: OrderId,
        dispatched: &[BoxId],
        delivered: &[BoxId],
    ) -> Result<Settlement> {
        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| DispatchError::UnknownOrder(id.to_string()))?;

        let (stored, missing): (Vec<BoxId>, Vec<BoxId>) =
            dispatched.iter().copied().partition(|b| delivered.contains(b));
        let (dispatched, delivered) = (dispatched.len() as u32, stored.len() as u32);
        if order.status != OrderStatus::InTransit || order.boxes_in_flight < dispatched {
            return Err(DispatchError::invalid_transition(
                "order",
                id,
                order.status,
                format!("arrival of {} boxes", dispatched),
            ));
        }

        self.move_listed(&stored, BoxStatus::Delivered)?;
        self.move_listed(&missing, BoxStatus::Undelivered)?;
        order.boxes_in_flight -= dispatched;
        order.boxes_delivered += delivered;
        if delivered < dispatched {
            order.locker_shortfall = true;
        }
        let settlement = Self::settle(&mut order)?;
        self.settle_boxes(id, settlement);
        Ok(settlement)
    }

    /// A leg was called off before landing; its boxes go back to the pool.
    pub fn record_abort(&self, id: OrderId, box_ids: &[BoxId]) -> Result<Settlement> {
        let mut order = self
            .orders
            .get_mut(&id)
            .ok_or_else(|| DispatchError::UnknownOrder(id.to_string()))?;
        let boxes = box_ids.len() as u32;

        if order.status != OrderStatus::InTransit || order.boxes_in_flight < boxes {
            return Err(DispatchError::invalid_transition(
                "order",
                id,
                order.status,
                format!("abort of {} boxes", boxes),
            ));
        }

        self.move_listed(box_ids, BoxStatus::Pending)?;
        order.boxes_in_flight -= boxes;
        order.boxes_undispatched += boxes;
        // 無航段在飛時，短缺判定失效，箱子重新回到可派送池
        if order.boxes_in_flight == 0 {
            order.locker_shortfall = false;
        }
        let settlement = Self::settle(&mut order)?;
        self.settle_boxes(id, settlement);
        Ok(settlement)
    }

    fn move_listed(&self, box_ids: &[BoxId], next: BoxStatus) -> Result<()> {
        for box_id in box_ids {
            self.boxes
                .get_mut(box_id)
                .ok_or_else(|| DispatchError::UnknownBox(box_id.to_string()))?
                .move_to(next)?;
        }
        Ok(())
    }

    /// Moves every box of the order currently in one of `from` to `next`.
    fn move_boxes(&self, order: OrderId, from: &[BoxStatus], next: BoxStatus) {
        for mut cargo in self.boxes.iter_mut() {
            if cargo.order == order && from.contains(&cargo.status) {
                cargo.status = next;
            }
        }
    }

    fn settle_boxes(&self, id: OrderId, settlement: Settlement) {
        if let Settlement::PartiallyDelivered { .. } = settlement {
            self.move_boxes(
                id,
                &[BoxStatus::Pending, BoxStatus::Undelivered],
                BoxStatus::Requeued,
            );
        }
    }

    fn settle(order: &mut Order) -> Result<Settlement> {
        if order.status != OrderStatus::InTransit || !order.is_settled() {
            return Ok(Settlement::Open);
        }

        if order.boxes_delivered >= order.box_count {
            order.transition(OrderEvent::Deliver)?;
            return Ok(Settlement::Delivered);
        }

        order.transition(OrderEvent::DeliverPartially)?;
        order.boxes_undispatched = 0;
        Ok(Settlement::PartiallyDelivered {
            remainder: order.box_count - order.boxes_delivered,
        })
    }

    /// Files the undelivered part of `parent` as a new PENDING order. The
    /// manifest stays with the parent; the remainder carries only box count
    /// and a prorated weight.
    pub fn requeue_remainder(
        &self,
        parent: OrderId,
        remainder: u32,
        policy: &DispatchPolicy,
    ) -> Result<Order> {
        let original = self.order(parent)?;
        if remainder == 0 || remainder > original.box_count {
            return Err(DispatchError::InvalidArgument {
                field: "remainder".to_string(),
                reason: format!(
                    "{} boxes cannot be re-queued from an order of {}",
                    remainder, original.box_count
                ),
            });
        }

        let priority = match policy.requeue {
            RequeuePolicy::Keep => original.priority,
            RequeuePolicy::Demote => original.priority.demoted(),
        };

        let order = Order {
            id: OrderId::new(),
            client: original.client,
            created_at: Utc::now(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            status: OrderStatus::Pending,
            priority,
            destination: original.destination,
            items: Vec::new(),
            box_count: remainder,
            total_weight_kg: original.weight_per_box() * remainder as f64,
            boxes_delivered: 0,
            boxes_undispatched: remainder,
            boxes_in_flight: 0,
            locker_shortfall: false,
            parent: Some(parent),
            attempts: 0,
        };
        self.file_boxes(&order);
        self.insert(order.clone());

        tracing::info!(
            "Re-queued {} undelivered boxes of order {} as {}",
            remainder,
            parent,
            order.id
        );
        Ok(order)
    }

    /// Counts one more cycle in which the order could not be fully served.
    pub fn note_attempt(&self, id: OrderId) -> Option<u32> {
        self.orders.get_mut(&id).map(|mut order| {
            order.attempts += 1;
            order.attempts
        })
    }
}
