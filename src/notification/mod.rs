pub mod keys;
pub mod model;
pub mod store;
pub mod svc;
