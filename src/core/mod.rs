pub mod dispatch;
pub mod fleet;
pub mod lockers;
pub mod network;
pub mod orders;
pub mod planner;

pub use crate::domain::model::{Assignment, Locker, Order, Port, Seaplane};
pub use crate::domain::ports::{PolicyProvider, Storage};
pub use crate::utils::error::Result;
