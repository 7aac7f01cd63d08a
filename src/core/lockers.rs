use crate::domain::model::{BoxId, Locker, LockerEvent, LockerId, LockerStatus, OrderId, PortId};
use crate::utils::error::{DispatchError, Result};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct LockerPool {
    /// 依編號遞增排列
    lockers: Vec<Locker>,
    next_number: u32,
}

impl LockerPool {
    fn push_new(&mut self, port: PortId) -> Locker {
        self.next_number += 1;
        let locker = Locker::new(port, self.next_number);
        self.lockers.push(locker.clone());
        locker
    }
}

/// Authoritative locker state per port.
///
/// Each port's pool sits behind its own map entry, so a transition holds only
/// that port's shard lock: two callers racing on the same port are
/// serialized, callers on other ports are not. No call waits on anything but
/// that lock, and every failure leaves the locker untouched.
#[derive(Debug, Default)]
pub struct LockerRegistry {
    pools: DashMap<PortId, LockerPool>,
    index: DashMap<LockerId, PortId>,
}

impl LockerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the pool for a port with `count` EMPTY lockers numbered from 1.
    pub(crate) fn provision(&self, port: PortId, count: usize) -> Vec<Locker> {
        let mut pool = self.pools.entry(port).or_default();
        let created: Vec<Locker> = (0..count).map(|_| pool.push_new(port)).collect();
        for locker in &created {
            self.index.insert(locker.id, port);
        }
        created
    }

    pub(crate) fn add_locker(&self, port: PortId) -> Locker {
        let locker = self.pools.entry(port).or_default().push_new(port);
        self.index.insert(locker.id, port);
        tracing::debug!("Added locker #{} at {}", locker.number, port);
        locker
    }

    pub(crate) fn remove_locker(&self, id: LockerId) -> Result<Locker> {
        let port = self.port_of(id)?;
        let removed = {
            let mut pool = self
                .pools
                .get_mut(&port)
                .ok_or_else(|| DispatchError::UnknownLocker(id.to_string()))?;
            let position = pool
                .lockers
                .iter()
                .position(|l| l.id == id)
                .ok_or_else(|| DispatchError::UnknownLocker(id.to_string()))?;

            let status = pool.lockers[position].status();
            if status != LockerStatus::Empty {
                return Err(DispatchError::LockerNotEmpty {
                    locker: id.to_string(),
                    status: status.to_string(),
                });
            }
            pool.lockers.remove(position)
        };
        self.index.remove(&id);
        tracing::debug!("Removed locker #{} at {}", removed.number, port);
        Ok(removed)
    }

    /// Claims the lowest-numbered EMPTY locker at `port` for one box.
    pub fn reserve(&self, port: PortId, box_id: BoxId, order: OrderId) -> Result<Locker> {
        let mut pool = self
            .pools
            .get_mut(&port)
            .ok_or_else(|| DispatchError::UnknownPort(port.to_string()))?;

        let locker = pool
            .lockers
            .iter_mut()
            .find(|l| l.status() == LockerStatus::Empty)
            .ok_or_else(|| DispatchError::NoLockerAvailable {
                port: port.to_string(),
            })?;

        locker.apply(LockerEvent::Reserve { box_id, order }, Utc::now())?;
        tracing::debug!("Reserved locker #{} at {} for box {}", locker.number, port, box_id);
        Ok(locker.clone())
    }

    pub fn confirm_occupied(&self, id: LockerId) -> Result<Locker> {
        self.apply(id, LockerEvent::ConfirmOccupied)
    }

    pub fn release(&self, id: LockerId) -> Result<Locker> {
        self.apply(id, LockerEvent::Release)
    }

    pub fn cancel_reservation(&self, id: LockerId) -> Result<Locker> {
        self.apply(id, LockerEvent::CancelReservation)
    }

    pub fn set_maintenance(&self, id: LockerId, reason: &str) -> Result<Locker> {
        self.apply(
            id,
            LockerEvent::SetMaintenance {
                reason: reason.to_string(),
            },
        )
    }

    pub fn clear_maintenance(&self, id: LockerId) -> Result<Locker> {
        self.apply(id, LockerEvent::ClearMaintenance)
    }

    /// Administrative override: only an idle locker (EMPTY or MAINTENANCE)
    /// can be switched, and only to EMPTY or MAINTENANCE.
    pub fn update_status(
        &self,
        id: LockerId,
        status: LockerStatus,
        reason: Option<&str>,
    ) -> Result<Locker> {
        self.with_locker(id, |locker| {
            let current = locker.status();
            if !matches!(current, LockerStatus::Empty | LockerStatus::Maintenance) {
                return Err(DispatchError::invalid_transition(
                    "locker",
                    id,
                    current,
                    format!("update_status to {}", status),
                ));
            }

            let now = Utc::now();
            let outcome = match status {
                LockerStatus::Empty if current == LockerStatus::Maintenance => {
                    locker.apply(LockerEvent::ClearMaintenance, now)
                }
                LockerStatus::Empty => Ok(()),
                LockerStatus::Maintenance => {
                    let event = LockerEvent::SetMaintenance {
                        reason: reason.unwrap_or_default().to_string(),
                    };
                    // 已在維護中：換上新原因
                    let mut next = locker.clone();
                    if current == LockerStatus::Maintenance {
                        next.apply(LockerEvent::ClearMaintenance, now)?;
                    }
                    next.apply(event, now)?;
                    *locker = next;
                    Ok(())
                }
                LockerStatus::Reserved | LockerStatus::Occupied => {
                    Err(DispatchError::InvalidArgument {
                        field: "status".to_string(),
                        reason: format!("{} is only reachable through dispatch", status),
                    })
                }
            };
            outcome.map(|_| locker.clone())
        })
    }

    pub fn locker(&self, id: LockerId) -> Result<Locker> {
        self.with_locker(id, |locker| Ok(locker.clone()))
    }

    pub fn lockers(&self, port: Option<PortId>, status: Option<LockerStatus>) -> Vec<Locker> {
        let mut lockers: Vec<Locker> = self
            .pools
            .iter()
            .filter(|pool| port.map_or(true, |p| *pool.key() == p))
            .flat_map(|pool| {
                pool.lockers
                    .iter()
                    .filter(|l| status.map_or(true, |s| l.status() == s))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        lockers.sort_by_key(|l| (l.port, l.number));
        lockers
    }

    pub fn count(&self, port: PortId) -> usize {
        self.pools.get(&port).map_or(0, |pool| pool.lockers.len())
    }

    pub fn empty_count(&self, port: PortId) -> usize {
        self.pools.get(&port).map_or(0, |pool| {
            pool.lockers
                .iter()
                .filter(|l| l.status() == LockerStatus::Empty)
                .count()
        })
    }

    pub fn empty_counts(&self) -> HashMap<PortId, usize> {
        self.pools
            .iter()
            .map(|pool| {
                let empty = pool
                    .lockers
                    .iter()
                    .filter(|l| l.status() == LockerStatus::Empty)
                    .count();
                (*pool.key(), empty)
            })
            .collect()
    }

    fn port_of(&self, id: LockerId) -> Result<PortId> {
        self.index
            .get(&id)
            .map(|port| *port)
            .ok_or_else(|| DispatchError::UnknownLocker(id.to_string()))
    }

    fn with_locker<T>(&self, id: LockerId, f: impl FnOnce(&mut Locker) -> Result<T>) -> Result<T> {
        let port = self.port_of(id)?;
        let mut pool = self
            .pools
            .get_mut(&port)
            .ok_or_else(|| DispatchError::UnknownLocker(id.to_string()))?;
        let locker = pool
            .lockers
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| DispatchError::UnknownLocker(id.to_string()))?;
        f(locker)
    }

    fn apply(&self, id: LockerId, event: LockerEvent) -> Result<Locker> {
        let name = event.to_string();
        let locker = self.with_locker(id, |locker| {
            locker.apply(event, Utc::now())?;
            Ok(locker.clone())
        })?;
        tracing::debug!(
            "Locker #{} at {}: {} -> {}",
            locker.number,
            locker.port,
            name,
            locker.status()
        );
        Ok(locker)
    }
}
