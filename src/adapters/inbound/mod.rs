mod admin_api;
mod proxy_server;

pub use admin_api::{AdminApi, AdminState};
pub use proxy_server::{ProxyServer, ProxyState};
