//! HTTP JSON API (warp).
//!
//! | Method | Path               | Body                                  |
//! |--------|--------------------|---------------------------------------|
//! | GET    | `/packets`         | stored records, `?protocol=&ip=`      |
//! | GET    | `/packets/summary` | protocol tally of the same selection  |
//! | POST   | `/packets`         | store one JSON record, 201            |
//! | GET    | `/packets/recent`  | recent-packet feed                    |
//! | GET    | `/stats`           | statistics snapshot                   |
//! | POST   | `/stats/reset`     | snapshot after reset                  |
//! | GET    | `/capture/status`  | capture state and last fatal error    |
//! | POST   | `/capture/start`   | `?interface=`; 409 running, 503 none  |
//! | POST   | `/capture/stop`    | state                                 |
//! | GET    | `/diagnostics`     | fault counters and consumer names     |

pub mod routes;
pub mod types;
pub mod web_server;

pub use types::ApiError;
pub use web_server::WebServer;
