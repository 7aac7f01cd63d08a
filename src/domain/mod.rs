// Domain layer: entities, state machines and seam traits. No locking and no I/O here.

pub mod model;
pub mod ports;
