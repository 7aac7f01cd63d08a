use crate::app::service::{DispatchService, NewPort, NewSeaplane};
use crate::core::orders::{NewClient, NewProduct};
use crate::domain::model::{
    ClientId, ClientRole, OrderItem, OrderRequest, Priority, ProductId, RequeuePolicy,
    DEFAULT_FUEL_CAPACITY_L,
};
use crate::domain::ports::PolicyProvider;
use crate::utils::error::{DispatchError, Result};
use crate::utils::validation::{
    validate_coordinates, validate_positive_number, validate_range, validate_required_field,
    Validate,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    pub scenario: ScenarioConfig,
    pub policy: Option<PolicyConfig>,
    #[serde(default)]
    pub ports: Vec<PortConfig>,
    #[serde(default)]
    pub seaplanes: Vec<SeaplaneConfig>,
    #[serde(default)]
    pub products: Vec<ProductConfig>,
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
    #[serde(default)]
    pub orders: Vec<OrderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub requeue_priority: Option<RequeuePolicy>,
    pub max_attempts: Option<u32>,
    pub default_fuel_capacity_l: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfig {
    pub name: String,
    pub island: String,
    pub lat: f64,
    pub lon: f64,
    pub lockers: usize,
    #[serde(default)]
    pub warehouse: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeaplaneConfig {
    pub id: String,
    pub model: String,
    pub box_capacity: u32,
    pub fuel_consumption_km: f64,
    pub cruise_speed_kmh: f64,
    pub fuel_capacity_l: Option<f64>,
    pub max_payload_kg: Option<f64>,
    /// 港口名稱；省略時停在倉庫港
    pub base: Option<String>,
    #[serde(default)]
    pub maintenance: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub unit_price: f64,
    pub weight_kg: f64,
    pub stock: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub name: String,
    pub role: ClientRole,
    #[serde(default)]
    pub specialty: String,
    #[serde(default)]
    pub study: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfig {
    pub client: String,
    pub destination: String,
    pub priority: Option<String>,
    pub boxes: u32,
    /// 省略時由品項重量計算
    pub total_weight_kg: Option<f64>,
    pub items: Vec<OrderItemConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemConfig {
    pub product: String,
    pub quantity: u32,
}

/// What `seed` loaded into the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedSummary {
    pub ports: usize,
    pub lockers: usize,
    pub seaplanes: usize,
    pub products: usize,
    pub clients: usize,
    pub orders_accepted: usize,
    pub orders_rejected: usize,
}

fn invalid(field: impl Into<String>, value: impl Into<String>, reason: impl Into<String>) -> DispatchError {
    DispatchError::InvalidConfigValueError {
        field: field.into(),
        value: value.into(),
        reason: reason.into(),
    }
}

impl TomlConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(DispatchError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| DispatchError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${DISPATCH_MAX_ATTEMPTS})，未設定的保留原字串
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| DispatchError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        if self.scenario.name.trim().is_empty() {
            return Err(invalid("scenario.name", "", "Scenario name cannot be empty"));
        }
        validate_positive_number("ports", self.ports.len(), 1)?;

        if let Some(policy) = &self.policy {
            if let Some(capacity) = policy.default_fuel_capacity_l {
                validate_range("policy.default_fuel_capacity_l", capacity, 1.0, 1_000_000.0)?;
            }
        }

        // 港口
        let mut port_names = HashSet::new();
        let mut warehouses = 0;
        for port in &self.ports {
            let field = format!("ports.{}", port.name);
            if port.name.trim().is_empty() {
                return Err(invalid("ports.name", "", "Port name cannot be empty"));
            }
            if !port_names.insert(port.name.as_str()) {
                return Err(invalid(field, port.name.clone(), "Duplicate port name"));
            }
            validate_coordinates(&field, port.lat, port.lon)?;
            if port.warehouse {
                warehouses += 1;
            }
        }
        if warehouses > 1 {
            return Err(invalid(
                "ports.warehouse",
                warehouses.to_string(),
                "At most one port can be the warehouse",
            ));
        }

        // 水上飛機
        let mut seaplane_ids = HashSet::new();
        for seaplane in &self.seaplanes {
            let field = format!("seaplanes.{}", seaplane.id);
            if !seaplane_ids.insert(seaplane.id.as_str()) {
                return Err(invalid(field, seaplane.id.clone(), "Duplicate seaplane id"));
            }
            validate_positive_number(
                &format!("{}.box_capacity", field),
                seaplane.box_capacity as usize,
                1,
            )?;
            for (name, value) in [
                ("fuel_consumption_km", seaplane.fuel_consumption_km),
                ("cruise_speed_kmh", seaplane.cruise_speed_kmh),
            ] {
                if !(value > 0.0) {
                    return Err(invalid(
                        format!("{}.{}", field, name),
                        value.to_string(),
                        "Value must be positive",
                    ));
                }
            }
            // 沒有倉庫港時必須指定基地
            if warehouses == 0 {
                validate_required_field(&format!("{}.base", field), &seaplane.base)?;
            }
            if let Some(base) = &seaplane.base {
                if !port_names.contains(base.as_str()) {
                    return Err(invalid(format!("{}.base", field), base.clone(), "Unknown port"));
                }
            }
        }

        // 訂單引用
        let products: HashSet<&str> = self.products.iter().map(|p| p.name.as_str()).collect();
        let clients: HashSet<&str> = self.clients.iter().map(|c| c.name.as_str()).collect();
        for (index, order) in self.orders.iter().enumerate() {
            let field = format!("orders[{}]", index);
            if !clients.contains(order.client.as_str()) {
                return Err(invalid(format!("{}.client", field), order.client.clone(), "Unknown client"));
            }
            if !port_names.contains(order.destination.as_str()) {
                return Err(invalid(
                    format!("{}.destination", field),
                    order.destination.clone(),
                    "Unknown port",
                ));
            }
            if let Some(priority) = &order.priority {
                priority.parse::<Priority>().map_err(|_| {
                    invalid(format!("{}.priority", field), priority.clone(), "Use low, normal, high or urgent")
                })?;
            }
            for item in &order.items {
                if !products.contains(item.product.as_str()) {
                    return Err(invalid(
                        format!("{}.items", field),
                        item.product.clone(),
                        "Unknown product",
                    ));
                }
            }
        }

        Ok(())
    }

    /// Loads every entity of the scenario into the service. Ports, fleet,
    /// catalog and clients must all load; an order that the order book
    /// rejects is logged and counted instead.
    pub fn seed(&self, service: &DispatchService) -> Result<SeedSummary> {
        let mut summary = SeedSummary::default();

        for port in &self.ports {
            let created = service.add_port(NewPort {
                name: port.name.clone(),
                island: port.island.clone(),
                lat: port.lat,
                lon: port.lon,
                lockers: port.lockers,
                warehouse: port.warehouse,
            })?;
            summary.ports += 1;
            summary.lockers += created.locker_count;
        }

        for seaplane in &self.seaplanes {
            let location = match &seaplane.base {
                Some(base) => Some(
                    service
                        .network()
                        .port_by_name(base)
                        .ok_or_else(|| DispatchError::UnknownPort(base.clone()))?
                        .id,
                ),
                None => None,
            };
            service.register_seaplane(NewSeaplane {
                id: seaplane.id.as_str().into(),
                model: seaplane.model.clone(),
                box_capacity: seaplane.box_capacity,
                fuel_consumption_km: seaplane.fuel_consumption_km,
                cruise_speed_kmh: seaplane.cruise_speed_kmh,
                fuel_capacity_l: seaplane.fuel_capacity_l,
                max_payload_kg: seaplane.max_payload_kg,
                location,
                maintenance: seaplane.maintenance,
            })?;
            summary.seaplanes += 1;
        }

        let mut products: HashMap<&str, (ProductId, f64)> = HashMap::new();
        for product in &self.products {
            let created = service.add_product(NewProduct {
                name: product.name.clone(),
                description: product.description.clone(),
                unit_price: product.unit_price,
                weight_kg: product.weight_kg,
                stock_available: product.stock,
            })?;
            products.insert(product.name.as_str(), (created.id, created.weight_kg));
            summary.products += 1;
        }

        let mut clients: HashMap<&str, ClientId> = HashMap::new();
        for client in &self.clients {
            let created = service.register_client(NewClient {
                name: client.name.clone(),
                role: client.role,
                specialty: client.specialty.clone(),
                study: client.study.clone(),
                email: client.email.clone(),
            })?;
            clients.insert(client.name.as_str(), created.id);
            summary.clients += 1;
        }

        for (index, order) in self.orders.iter().enumerate() {
            let request = self.order_request(order, service, &clients, &products)?;
            match service.submit_order(request) {
                Ok(_) => summary.orders_accepted += 1,
                Err(e) => {
                    tracing::warn!("⚠️ Scenario order #{} rejected: {}", index, e);
                    summary.orders_rejected += 1;
                }
            }
        }

        tracing::info!(
            "Scenario '{}' loaded: {} ports, {} lockers, {} seaplanes, {} orders",
            self.scenario.name,
            summary.ports,
            summary.lockers,
            summary.seaplanes,
            summary.orders_accepted
        );
        Ok(summary)
    }

    fn order_request(
        &self,
        order: &OrderConfig,
        service: &DispatchService,
        clients: &HashMap<&str, ClientId>,
        products: &HashMap<&str, (ProductId, f64)>,
    ) -> Result<OrderRequest> {
        let client = *clients
            .get(order.client.as_str())
            .ok_or_else(|| DispatchError::UnknownClient(order.client.clone()))?;
        let destination = service
            .network()
            .port_by_name(&order.destination)
            .ok_or_else(|| DispatchError::UnknownPort(order.destination.clone()))?
            .id;
        let priority = match &order.priority {
            Some(p) => p.parse()?,
            None => Priority::default(),
        };

        let mut items = Vec::with_capacity(order.items.len());
        let mut computed_weight = 0.0;
        for item in &order.items {
            let (product, weight) = *products
                .get(item.product.as_str())
                .ok_or_else(|| DispatchError::UnknownProduct(item.product.clone()))?;
            computed_weight += weight * item.quantity as f64;
            items.push(OrderItem {
                product,
                quantity: item.quantity,
            });
        }

        Ok(OrderRequest {
            client,
            destination,
            items,
            priority,
            box_count: order.boxes,
            total_weight_kg: order.total_weight_kg.unwrap_or(computed_weight),
        })
    }
}

impl PolicyProvider for TomlConfig {
    fn requeue_policy(&self) -> RequeuePolicy {
        self.policy
            .as_ref()
            .and_then(|p| p.requeue_priority)
            .unwrap_or_default()
    }

    fn max_attempts(&self) -> Option<u32> {
        self.policy.as_ref().and_then(|p| p.max_attempts)
    }

    fn default_fuel_capacity_l(&self) -> f64 {
        self.policy
            .as_ref()
            .and_then(|p| p.default_fuel_capacity_l)
            .unwrap_or(DEFAULT_FUEL_CAPACITY_L)
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{OrderStatus, PortId, SeaplaneStatus};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SCENARIO: &str = r#"
[scenario]
name = "two-port"

[policy]
requeue_priority = "demote"
max_attempts = 5

[[ports]]
name = "Puerto Baquerizo Moreno"
island = "San Cristóbal"
lat = -0.9025
lon = -89.609167
lockers = 10
warehouse = true

[[ports]]
name = "Puerto Villamil"
island = "Isabela"
lat = -0.9569
lon = -90.9672
lockers = 7

[[seaplanes]]
id = "HB-LSR"
model = "DHC-6 Twin Otter"
box_capacity = 100
fuel_consumption_km = 25.0
cruise_speed_kmh = 250.0

[[seaplanes]]
id = "HB-LSK"
model = "Grumman G-21 Goose"
box_capacity = 50
fuel_consumption_km = 18.0
cruise_speed_kmh = 280.0
base = "Puerto Villamil"
maintenance = true

[[products]]
name = "Volcanic gas sampler"
unit_price = 2500.0
weight_kg = 5.5
stock = 20

[[products]]
name = "Weather station"
unit_price = 3200.0
weight_kg = 12.0
stock = 30

[[clients]]
name = "Dr. Elena Rodriguez"
role = "researcher"
specialty = "Volcanology"
email = "e.rodriguez@galapagos-science.org"

[[orders]]
client = "Dr. Elena Rodriguez"
destination = "Puerto Villamil"
priority = "high"
boxes = 2
items = [
    { product = "Volcanic gas sampler", quantity = 3 },
    { product = "Weather station", quantity = 1 },
]

[[orders]]
client = "Dr. Elena Rodriguez"
destination = "Puerto Villamil"
boxes = 5
items = [{ product = "Volcanic gas sampler", quantity = 4 }]
"#;

    #[test]
    fn test_parse_and_policy() {
        let config = TomlConfig::from_toml_str(SCENARIO).unwrap();
        config.validate().unwrap();

        assert_eq!(config.scenario.name, "two-port");
        assert_eq!(config.requeue_policy(), RequeuePolicy::Demote);
        assert_eq!(config.max_attempts(), Some(5));
        assert_eq!(config.default_fuel_capacity_l(), DEFAULT_FUEL_CAPACITY_L);
    }

    #[test]
    fn test_seed_loads_scenario_and_rejects_bad_orders() {
        let config = TomlConfig::from_toml_str(SCENARIO).unwrap();
        let service = DispatchService::new(&config);
        let summary = config.seed(&service).unwrap();

        assert_eq!(summary.ports, 2);
        assert_eq!(summary.lockers, 17);
        assert_eq!(summary.seaplanes, 2);
        // 第二筆宣告 5 箱但只有 4 件
        assert_eq!(summary.orders_accepted, 1);
        assert_eq!(summary.orders_rejected, 1);

        let twin = service.fleet().seaplane(&"HB-LSR".into()).unwrap();
        assert_eq!(twin.current_location, Some(PortId(1)));
        let goose = service.fleet().seaplane(&"HB-LSK".into()).unwrap();
        assert_eq!(goose.status, SeaplaneStatus::Maintenance);
        assert_eq!(goose.current_location, Some(PortId(2)));

        let pending = service.orders().dispatchable();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].status, OrderStatus::Pending);
        assert!((pending[0].total_weight_kg - 28.5).abs() < 1e-9);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("SEAPLANE_TEST_MAX_ATTEMPTS", "12");

        let content = SCENARIO.replace("max_attempts = 5", "max_attempts = ${SEAPLANE_TEST_MAX_ATTEMPTS}");
        let config = TomlConfig::from_toml_str(&content).unwrap();
        assert_eq!(config.max_attempts(), Some(12));

        std::env::remove_var("SEAPLANE_TEST_MAX_ATTEMPTS");
    }

    #[test]
    fn test_validation_catches_dangling_references() {
        let broken = SCENARIO.replace("base = \"Puerto Villamil\"", "base = \"Atlantis\"");
        let config = TomlConfig::from_toml_str(&broken).unwrap();
        assert!(config.validate().is_err());

        let two_warehouses = SCENARIO.replace("lockers = 7", "lockers = 7\nwarehouse = true");
        let config = TomlConfig::from_toml_str(&two_warehouses).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_seaplane_base_required_without_warehouse() {
        let no_warehouse = SCENARIO.replace("lockers = 10\nwarehouse = true", "lockers = 10");
        let config = TomlConfig::from_toml_str(&no_warehouse).unwrap();
        match config.validate() {
            Err(DispatchError::MissingConfigError { field }) => {
                assert_eq!(field, "seaplanes.HB-LSR.base");
            }
            other => panic!("expected missing base, got {:?}", other),
        }

        let based = no_warehouse.replace(
            "cruise_speed_kmh = 250.0",
            "cruise_speed_kmh = 250.0\nbase = \"Puerto Villamil\"",
        );
        TomlConfig::from_toml_str(&based).unwrap().validate().unwrap();
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(SCENARIO.as_bytes()).unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.ports.len(), 2);
        assert!(TomlConfig::from_file("/definitely/not/here.toml").is_err());
    }
}
