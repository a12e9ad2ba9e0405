pub mod cfg;
pub mod error;
pub mod http_client;
pub mod notification;
pub mod server;
pub mod worker;
