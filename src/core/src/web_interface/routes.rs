use std::convert::Infallible;
use std::sync::Arc;

use log::error;
use serde::Serialize;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::types::{
    ApiError, CaptureStatusResponse, DiagnosticsResponse, NewPacket, PacketQuery, StartQuery,
};
use crate::controller::controller_handler::Controller;
use crate::data_capture::types::PacketRecord;
use crate::error_handling::types::CaptureError;
use crate::statistics::aggregator::PacketSummary;
use crate::storage::packet_filter::PacketFilter;

type JsonReply = reply::WithStatus<reply::Json>;

fn with_controller(
    controller: Arc<Controller>,
) -> impl Filter<Extract = (Arc<Controller>,), Error = Infallible> + Clone {
    warp::any().map(move || Arc::clone(&controller))
}

fn json_status<T: Serialize>(body: &T, status: StatusCode) -> JsonReply {
    reply::with_status(reply::json(body), status)
}

fn api_error(message: impl Into<String>, status: StatusCode) -> JsonReply {
    json_status(&ApiError::new(message), status)
}

/// Runs a filtered storage query off the async workers. Errors are already
/// turned into replies.
async fn query_filtered(
    controller: &Controller,
    query: PacketQuery,
) -> Result<Vec<PacketRecord>, JsonReply> {
    let filter = PacketFilter::parse(
        query.protocol.as_deref().unwrap_or(""),
        query.ip.as_deref().unwrap_or(""),
    )
    .map_err(|e| api_error(e.to_string(), StatusCode::BAD_REQUEST))?;
    let storage = controller.storage();
    match tokio::task::spawn_blocking(move || storage.query_packets(&filter)).await {
        Ok(Ok(list)) => Ok(list),
        Ok(Err(e)) => Err(api_error(
            format!("Failed to load packets: {}", e),
            StatusCode::INTERNAL_SERVER_ERROR,
        )),
        Err(e) => {
            error!("packet query task failed: {}", e);
            Err(api_error("Failed to load packets", StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

fn status_body(controller: &Controller) -> CaptureStatusResponse {
    CaptureStatusResponse {
        state: controller.capture_status(),
        last_error: controller.last_capture_error().map(|e| e.to_string()),
    }
}

/// Every API route, with request logging.
pub fn api_routes(
    controller: Arc<Controller>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    list_packets_route(controller.clone())
        .or(packet_summary_route(controller.clone()))
        .or(ingest_packet_route(controller.clone()))
        .or(recent_packets_route(controller.clone()))
        .or(stats_route(controller.clone()))
        .or(reset_stats_route(controller.clone()))
        .or(capture_status_route(controller.clone()))
        .or(capture_start_route(controller.clone()))
        .or(capture_stop_route(controller.clone()))
        .or(diagnostics_route(controller))
        .with(warp::log("netlyzer::web"))
}

/// GET /packets?protocol=<label|All>&ip=<substring>
pub fn list_packets_route(
    controller: Arc<Controller>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("packets")
        .and(warp::get())
        .and(warp::query::<PacketQuery>())
        .and(with_controller(controller))
        .and_then(|query: PacketQuery, controller: Arc<Controller>| async move {
            let reply = match query_filtered(&controller, query).await {
                Ok(list) => json_status(&list, StatusCode::OK),
                Err(reply) => reply,
            };
            Ok::<_, Rejection>(reply)
        })
}

/// GET /packets/summary?protocol=<label|All>&ip=<substring>
///
/// Protocol distribution of the same selection `GET /packets` returns.
pub fn packet_summary_route(
    controller: Arc<Controller>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("packets" / "summary")
        .and(warp::get())
        .and(warp::query::<PacketQuery>())
        .and(with_controller(controller))
        .and_then(|query: PacketQuery, controller: Arc<Controller>| async move {
            let reply = match query_filtered(&controller, query).await {
                Ok(list) => json_status(&PacketSummary::from_records(&list), StatusCode::OK),
                Err(reply) => reply,
            };
            Ok::<_, Rejection>(reply)
        })
}

/// POST /packets
pub fn ingest_packet_route(
    controller: Arc<Controller>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("packets")
        .and(warp::post())
        .and(warp::body::content_length_limit(16 * 1024))
        .and(warp::body::json::<NewPacket>())
        .and(with_controller(controller))
        .and_then(|packet: NewPacket, controller: Arc<Controller>| async move {
            let record = packet.into_record();
            let stored = record.clone();
            let storage = controller.storage();
            let reply = match tokio::task::spawn_blocking(move || storage.save_packet(&stored)).await {
                Ok(Ok(())) => json_status(&record, StatusCode::CREATED),
                Ok(Err(e)) => api_error(
                    format!("Failed to save packet: {}", e),
                    StatusCode::INTERNAL_SERVER_ERROR,
                ),
                Err(e) => {
                    error!("packet save task failed: {}", e);
                    api_error("Failed to save packet", StatusCode::INTERNAL_SERVER_ERROR)
                }
            };
            Ok::<_, Rejection>(reply)
        })
}

/// GET /packets/recent
pub fn recent_packets_route(
    controller: Arc<Controller>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("packets" / "recent")
        .and(warp::get())
        .and(with_controller(controller))
        .map(|controller: Arc<Controller>| {
            json_status(&controller.recent().snapshot(), StatusCode::OK)
        })
}

/// GET /stats
pub fn stats_route(
    controller: Arc<Controller>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("stats")
        .and(warp::get())
        .and(with_controller(controller))
        .map(|controller: Arc<Controller>| {
            json_status(&controller.statistics().snapshot(), StatusCode::OK)
        })
}

/// POST /stats/reset
pub fn reset_stats_route(
    controller: Arc<Controller>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("stats" / "reset")
        .and(warp::post())
        .and(with_controller(controller))
        .map(|controller: Arc<Controller>| {
            controller.statistics().reset();
            json_status(&controller.statistics().snapshot(), StatusCode::OK)
        })
}

/// GET /capture/status
pub fn capture_status_route(
    controller: Arc<Controller>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("capture" / "status")
        .and(warp::get())
        .and(with_controller(controller))
        .map(|controller: Arc<Controller>| json_status(&status_body(&controller), StatusCode::OK))
}

/// POST /capture/start?interface=<name>
pub fn capture_start_route(
    controller: Arc<Controller>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("capture" / "start")
        .and(warp::post())
        .and(warp::query::<StartQuery>())
        .and(with_controller(controller))
        .and_then(|query: StartQuery, controller: Arc<Controller>| async move {
            let c = Arc::clone(&controller);
            let interface = query.interface.filter(|i| !i.trim().is_empty());
            let reply = match tokio::task::spawn_blocking(move || c.start_capture_on(interface)).await {
                Ok(Ok(_)) => json_status(&status_body(&controller), StatusCode::OK),
                Ok(Err(e @ CaptureError::AlreadyRunning)) => {
                    api_error(e.to_string(), StatusCode::CONFLICT)
                }
                Ok(Err(e @ CaptureError::DeviceUnavailable(_))) => {
                    api_error(e.to_string(), StatusCode::SERVICE_UNAVAILABLE)
                }
                Ok(Err(e)) => api_error(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
                Err(e) => {
                    error!("capture start task failed: {}", e);
                    api_error("Failed to start capture", StatusCode::INTERNAL_SERVER_ERROR)
                }
            };
            Ok::<_, Rejection>(reply)
        })
}

/// POST /capture/stop
pub fn capture_stop_route(
    controller: Arc<Controller>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("capture" / "stop")
        .and(warp::post())
        .and(with_controller(controller))
        .and_then(|controller: Arc<Controller>| async move {
            let c = Arc::clone(&controller);
            let reply = match tokio::task::spawn_blocking(move || c.stop_capture()).await {
                Ok(_) => json_status(&status_body(&controller), StatusCode::OK),
                Err(e) => {
                    error!("capture stop task failed: {}", e);
                    api_error("Failed to stop capture", StatusCode::INTERNAL_SERVER_ERROR)
                }
            };
            Ok::<_, Rejection>(reply)
        })
}

/// GET /diagnostics
pub fn diagnostics_route(
    controller: Arc<Controller>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("diagnostics")
        .and(warp::get())
        .and(with_controller(controller))
        .map(|controller: Arc<Controller>| {
            let body = DiagnosticsResponse {
                counters: controller.diagnostics().counters(),
                consumers: controller.dispatcher().consumer_names(),
            };
            json_status(&body, StatusCode::OK)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::config::Config;
    use crate::data_capture::backend::scripted::ScriptedBackend;
    use crate::data_capture::backend::{CaptureBackend, UnavailableBackend};
    use crate::network::types::Protocol;
    use crate::storage::memory_storage::MemoryStorage;
    use crate::storage::storage_trait::Storage;
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};

    /// 5 TCP and 2 UDP records, two of the UDP ones on 10.0.0.x.
    fn controller(backend: Arc<dyn CaptureBackend>) -> Arc<Controller> {
        let storage = Arc::new(MemoryStorage::new());
        let now = Utc::now();
        let seed = [
            ("10.0.0.1", "1.1.1.1", Protocol::TCP),
            ("192.168.0.2", "1.1.1.1", Protocol::TCP),
            ("192.168.0.3", "8.8.4.4", Protocol::TCP),
            ("192.168.0.4", "1.1.1.1", Protocol::TCP),
            ("192.168.0.5", "9.9.9.9", Protocol::TCP),
            ("10.0.0.2", "1.1.1.1", Protocol::UDP),
            ("192.168.0.9", "10.0.0.53", Protocol::UDP),
        ];
        for (i, (src, dst, p)) in seed.into_iter().enumerate() {
            storage
                .save_packet(&PacketRecord::new(now + Duration::seconds(i as i64), src, dst, p, 60))
                .unwrap();
        }
        Arc::new(Controller::with_parts(Config::default(), storage, backend).unwrap())
    }

    async fn call(
        controller: &Arc<Controller>,
        method: &str,
        path: &str,
    ) -> (StatusCode, Value) {
        let routes = api_routes(Arc::clone(controller));
        let res = warp::test::request()
            .method(method)
            .path(path)
            .reply(&routes)
            .await;
        (res.status(), serde_json::from_slice(res.body()).unwrap())
    }

    #[tokio::test]
    async fn test_list_packets_with_filters() {
        let controller = controller(Arc::new(UnavailableBackend));

        let (status, body) = call(&controller, "GET", "/packets").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 7);

        let (_, body) = call(&controller, "GET", "/packets?protocol=udp").await;
        assert_eq!(body.as_array().unwrap().len(), 2);

        let (_, body) = call(&controller, "GET", "/packets?protocol=All&ip=10.0.0").await;
        let sources: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["source_address"].as_str().unwrap())
            .collect();
        assert_eq!(sources, vec!["10.0.0.1", "10.0.0.2", "192.168.0.9"]);

        let (status, body) = call(&controller, "GET", "/packets?protocol=gopher").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("gopher"));
    }

    #[tokio::test]
    async fn test_summary_follows_the_filter() {
        let controller = controller(Arc::new(UnavailableBackend));

        let (status, body) = call(&controller, "GET", "/packets/summary").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_packets"], 7);
        assert_eq!(body["total_bytes"], 7 * 60);
        assert_eq!(body["tally"]["TCP"], 5);
        assert_eq!(body["tally"]["UDP"], 2);
        assert_eq!(body["tally"]["ICMP"], 0);
        assert_eq!(body["tcp_like"], 5);
        assert_eq!(body["other"], 0);

        let (_, body) = call(&controller, "GET", "/packets/summary?protocol=UDP").await;
        assert_eq!(body["total_packets"], 2);
        assert_eq!(body["tally"]["TCP"], 0);
        assert_eq!(body["tcp_like"], 0);

        let (_, body) = call(&controller, "GET", "/packets/summary?ip=10.0.0").await;
        assert_eq!(body["total_packets"], 3);
        assert_eq!(body["tally"]["TCP"], 1);
        assert_eq!(body["tally"]["UDP"], 2);

        let (status, _) = call(&controller, "GET", "/packets/summary?protocol=gopher").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ingest_folds_unknown_labels() {
        let controller = controller(Arc::new(UnavailableBackend));
        let routes = api_routes(Arc::clone(&controller));

        let res = warp::test::request()
            .method("POST")
            .path("/packets")
            .json(&json!({
                "source_address": "172.16.0.1",
                "destination_address": "172.16.0.2",
                "protocol": "sctp",
                "size_bytes": 120
            }))
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["protocol"], "OTHER");

        let (_, body) = call(&controller, "GET", "/packets?ip=172.16").await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(controller.storage().count_packets().unwrap(), 8);

        let res = warp::test::request()
            .method("POST")
            .path("/packets")
            .json(&json!({ "source_address": "172.16.0.1" }))
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_stats_and_reset() {
        let controller = controller(Arc::new(UnavailableBackend));
        controller
            .statistics()
            .record(&PacketRecord::new(Utc::now(), "a", "b", Protocol::HTTP, 10));

        let (_, stats) = call(&controller, "GET", "/stats").await;
        assert_eq!(stats["total_packets"], 1);
        assert_eq!(stats["tally"]["HTTP"], 1);
        assert_eq!(stats["tally"]["ICMP"], 0);

        let (status, stats) = call(&controller, "POST", "/stats/reset").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["total_packets"], 0);
    }

    #[tokio::test]
    async fn test_capture_lifecycle() {
        let controller = controller(Arc::new(ScriptedBackend::new(Vec::new())));

        let (_, status) = call(&controller, "GET", "/capture/status").await;
        assert_eq!(status["state"], "Idle");

        let (code, status) = call(&controller, "POST", "/capture/start").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(status["state"], "Running");
        assert_eq!(status["device"], "scripted0");

        let (code, _) = call(&controller, "POST", "/capture/start").await;
        assert_eq!(code, StatusCode::CONFLICT);

        let (code, status) = call(&controller, "POST", "/capture/stop").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(status["state"], "Idle");

        let (code, status) = call(&controller, "POST", "/capture/start?interface=lab2").await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(status["device"], "lab2");
        call(&controller, "POST", "/capture/stop").await;
    }

    #[tokio::test]
    async fn test_start_without_device() {
        let controller = controller(Arc::new(UnavailableBackend));
        let (code, body) = call(&controller, "POST", "/capture/start").await;
        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body["message"].as_str().unwrap().contains("unavailable"));
    }

    #[tokio::test]
    async fn test_diagnostics_and_recent_feed() {
        let controller = controller(Arc::new(UnavailableBackend));
        controller
            .recent()
            .push(PacketRecord::new(Utc::now(), "10.9.9.9", "10.0.0.1", Protocol::ICMP, 84));

        let (_, body) = call(&controller, "GET", "/diagnostics").await;
        assert_eq!(body["dropped_records"], 0);
        assert_eq!(
            body["consumers"],
            json!(["recorder", "statistics", "recent-packets"])
        );

        let (_, body) = call(&controller, "GET", "/packets/recent").await;
        assert_eq!(body[0]["protocol"], "ICMP");
        assert_eq!(body[0]["size_bytes"], 84);
    }
}
