use crate::domain::model::{DispatchPolicy, RequeuePolicy};
use crate::utils::error::Result;
use async_trait::async_trait;

/// Where state snapshots are written. The core never persists on its own;
/// the outer layer decides when and where.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;
    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;
}

pub trait PolicyProvider: Send + Sync {
    fn requeue_policy(&self) -> RequeuePolicy;
    fn max_attempts(&self) -> Option<u32>;
    fn default_fuel_capacity_l(&self) -> f64;

    fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            requeue: self.requeue_policy(),
            max_attempts: self.max_attempts(),
            default_fuel_capacity_l: self.default_fuel_capacity_l(),
        }
    }
}

impl PolicyProvider for DispatchPolicy {
    fn requeue_policy(&self) -> RequeuePolicy {
        self.requeue
    }

    fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    fn default_fuel_capacity_l(&self) -> f64 {
        self.default_fuel_capacity_l
    }
}
