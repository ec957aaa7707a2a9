use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info};
use tokio::task::JoinHandle;

use super::routes::api_routes;
use crate::controller::controller_handler::Controller;
use crate::error_handling::types::WebError;

/// HTTP JSON API over the controller.
pub struct WebServer {
    controller: Arc<Controller>,
}

impl WebServer {
    pub fn new(controller: Arc<Controller>) -> Self {
        Self { controller }
    }

    /// Binds `addr` and serves the API from a background task. Abort the
    /// returned handle to stop serving. Must be called from within a tokio
    /// runtime.
    pub fn start(&self, addr: SocketAddr) -> Result<JoinHandle<()>, WebError> {
        let bind_failed = |e: io::Error| {
            error!("Unable to bind web server on {}: {}", addr, e);
            WebError::BindFailed(format!("{}: {}", addr, e))
        };
        let listener = std::net::TcpListener::bind(addr).map_err(bind_failed)?;
        listener.set_nonblocking(true).map_err(bind_failed)?;
        let listener = tokio::net::TcpListener::from_std(listener).map_err(bind_failed)?;

        let routes = api_routes(Arc::clone(&self.controller));
        info!("Web API listening on http://{}", addr);
        Ok(tokio::spawn(async move {
            warp::serve(routes).incoming(listener).run().await;
        }))
    }
}
