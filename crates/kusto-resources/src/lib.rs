//! Ranked storage/queue/status-table endpoint cache (§4.4), refreshed on a
//! single-flight + TTL policy (§9 "Resource-manager periodic refresh").
//!
//! Grounded on `gazette::router::Router`: a `Mutex`-guarded shared map plus
//! per-member dial state there becomes, here, a whole-snapshot `RwLock` replaced in
//! one shot by a single-flight-guarded refresh -- the unit of caching is the entire
//! advertised resource list, not one endpoint at a time, since the service hands out
//! all three lists together in one management command.

mod endpoint;
mod manager;

pub use endpoint::{Endpoint, EndpointKind};
pub use manager::{ManagementExecutor, ResourceManager, ResourceManagerOptions};
