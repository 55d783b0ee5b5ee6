use std::{net::SocketAddr, sync::Arc};

use log::{error, info};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Deserialize;
use warp::{
    http::StatusCode,
    reply::{self, Reply, Response},
    Filter, Rejection,
};

use crate::cache_manager::CacheManager;

#[derive(Debug, Deserialize)]
struct ClearRequest {
    #[serde(default)]
    ids: Vec<String>,
}

pub fn routes(
    registry: Registry,
    caches: Arc<CacheManager>,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    let health = warp::get()
        .and(warp::path("health"))
        .and(warp::path::end())
        .map(|| reply::with_status("OK", StatusCode::OK).into_response());
    let metrics = warp::get()
        .and(warp::path("metrics"))
        .and(warp::path::end())
        .map(move || encode_metrics(&registry));
    let clear = warp::post()
        .and(warp::path!("cache" / "clear"))
        .and(warp::body::json())
        .map(move |request: ClearRequest| clear_caches(&caches, request));
    health.or(metrics).unify().or(clear).unify()
}

pub async fn serve(addr: SocketAddr, registry: Registry, caches: Arc<CacheManager>) {
    info!("Admin listening on {}", addr);
    warp::serve(routes(registry, caches)).run(addr).await
}

fn encode_metrics(registry: &Registry) -> Response {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    match encoder.encode(&registry.gather(), &mut buffer) {
        Ok(()) => reply::with_header(buffer, "Content-Type", encoder.format_type()).into_response(),
        Err(err) => {
            error!("Failed to encode metrics: {:#}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn clear_caches(caches: &CacheManager, request: ClearRequest) -> Response {
    if request.ids.is_empty() {
        caches.clear_all();
        return StatusCode::OK.into_response();
    }
    match caches.clear_by_id(&request.ids) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => reply::with_status(err.to_string(), StatusCode::NOT_FOUND).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use prometheus::Registry;
    use serde_json::json;
    use warp::http::StatusCode;

    use super::routes;
    use crate::{
        cache::{ClearableCache, ResultCache},
        cache_manager::CacheManager,
        metrics::Metrics,
    };

    #[tokio::test]
    async fn should_expose_metrics() -> anyhow::Result<()> {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry)?;
        metrics.set_filter_status("adguard_dns_filter", Some(42));
        let routes = routes(registry, Arc::new(CacheManager::new()));

        let response = warp::test::request()
            .method("GET")
            .path("/metrics")
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = String::from_utf8(response.body().to_vec())?;
        assert!(body.contains(r#"filter_rules_total{filter="adguard_dns_filter"} 42"#));
        Ok(())
    }

    #[tokio::test]
    async fn should_clear_caches_by_id() {
        let manager = Arc::new(CacheManager::new());
        let first = Arc::new(ResultCache::new(10, None));
        let second = Arc::new(ResultCache::new(10, None));
        first.insert(1, 1);
        second.insert(2, 2);
        manager.add("filters/first", first.clone());
        manager.add("filters/second", second.clone());
        let routes = routes(Registry::new(), manager);

        let response = warp::test::request()
            .method("POST")
            .path("/cache/clear")
            .json(&json!({"ids": ["filters/first"]}))
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(first.len(), 0);
        assert_eq!(second.len(), 1);

        let response = warp::test::request()
            .method("POST")
            .path("/cache/clear")
            .json(&json!({"ids": []}))
            .reply(&routes)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(second.len(), 0);
    }

    #[tokio::test]
    async fn should_report_unknown_caches() {
        let routes = routes(Registry::new(), Arc::new(CacheManager::new()));

        let response = warp::test::request()
            .method("POST")
            .path("/cache/clear")
            .json(&json!({"ids": ["missing"]}))
            .reply(&routes)
            .await;

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn should_answer_health_checks() {
        let routes = routes(Registry::new(), Arc::new(CacheManager::new()));

        let response = warp::test::request().path("/health").reply(&routes).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"OK");
    }
}
