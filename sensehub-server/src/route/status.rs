use axum::{Json, extract::State, http::StatusCode};
use sensehub_proto::SensorReport;
use tracing::debug;

use crate::AppState;

pub async fn get_status(State(state): State<AppState>) -> Json<SensorReport> {
    let sensor_value = *state.sensor.read().await;
    Json(SensorReport { sensor_value })
}

/// Ingestion path for device firmware. The body is the same object
/// `get_status` serves back out.
pub async fn update(
    State(state): State<AppState>,
    Json(report): Json<SensorReport>,
) -> StatusCode {
    *state.sensor.write().await = report.sensor_value;
    debug!(sensor_value = report.sensor_value, "reading updated");

    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{self, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use crate::{AppState, app};

    #[tokio::test]
    async fn status_always_returns_sensor_value() {
        let app = app(AppState::new());

        let req = Request::builder()
            .uri("/status")
            .body(Body::empty())
            .unwrap();

        let res = app.oneshot(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let body = res.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json.get("sensor_value").unwrap().is_number());
    }

    #[tokio::test]
    async fn update_is_observed_by_status() {
        let app = app(AppState::new());

        let req = Request::builder()
            .method(http::Method::POST)
            .uri("/update")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"sensor_value": 23.5}"#))
            .unwrap();

        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let req = Request::builder()
            .uri("/status")
            .body(Body::empty())
            .unwrap();

        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = res.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["sensor_value"], 23.5);
    }

    #[tokio::test]
    async fn update_requires_json_content_type() {
        let app = app(AppState::new());

        let req = Request::builder()
            .method(http::Method::POST)
            .uri("/update")
            .body(Body::from(r#"{"sensor_value": 1.0}"#))
            .unwrap();

        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn update_rejects_garbage_body() {
        let app = app(AppState::new());

        let req = Request::builder()
            .method(http::Method::POST)
            .uri("/update")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Body::from("not json"))
            .unwrap();

        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let app = app(AppState::new());

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body = res.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn unknown_routes_fall_through_to_404() {
        let app = app(AppState::new());

        let req = Request::builder()
            .uri("/nope")
            .body(Body::empty())
            .unwrap();

        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
