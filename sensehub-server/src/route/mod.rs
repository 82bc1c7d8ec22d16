mod socket;
mod status;

use axum::Json;
use serde_json::{Value, json};

pub use socket::sensor_ws;
pub use status::{get_status, update};

pub async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
