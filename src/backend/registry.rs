use super::{Backend, BackendDriver};
use std::sync::Arc;

/// Factory type for compiled-in drivers
pub type DriverFactory = fn() -> Arc<dyn BackendDriver>;

/// Link-time registration of a compiled-in backend driver
pub struct DriverRegistration {
    pub backend: Backend,
    pub create: DriverFactory,
}

inventory::collect!(DriverRegistration);

/// One instance of every compiled-in driver, in priority order
pub fn registered_drivers() -> Vec<Arc<dyn BackendDriver>> {
    let mut registrations: Vec<&DriverRegistration> =
        inventory::iter::<DriverRegistration>.into_iter().collect();
    registrations.sort_by_key(|r| r.backend);
    registrations.into_iter().map(|r| (r.create)()).collect()
}

/// Compiled-in backends in priority order, without duplicates
pub fn registered_backends() -> Vec<Backend> {
    let mut backends: Vec<Backend> = inventory::iter::<DriverRegistration>
        .into_iter()
        .map(|r| r.backend)
        .collect();
    backends.sort();
    backends.dedup();
    backends
}
