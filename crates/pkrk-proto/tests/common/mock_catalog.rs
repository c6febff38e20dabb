#![allow(dead_code)]

use pkrk_proto::catalog::CatalogClient;
use pkrk_proto::config::{CatalogConfig, ShowsEndpoint};
use pkrk_proto::store::CatalogStore;
use serde_json::{json, Value};

/// Loopback port with nothing listening; requests fail with connection refused.
pub const UNREACHABLE_BASE_URL: &str = "http://127.0.0.1:9";

pub fn client_for(base_url: &str, shows_endpoint: ShowsEndpoint) -> CatalogClient {
    CatalogClient::new(&CatalogConfig {
        base_url: base_url.to_string(),
        shows_endpoint,
        timeout_secs: 5,
        api_token: None,
    })
    .expect("client should build")
}

pub fn store_for(base_url: &str, shows_endpoint: ShowsEndpoint) -> CatalogStore {
    CatalogStore::new(client_for(base_url, shows_endpoint))
}

pub fn category_json(id: &str, name: &str) -> Value {
    json!({
        "category_id": id,
        "display_name": name,
        "description": format!("{name} from the catalog service"),
        "background_image": format!("{id}-bg.jpg"),
        "shows": ["a", "b"],
        "featured": false
    })
}

pub fn show_json(id: &str, category: Option<&str>, episodes: &[(&str, &str)]) -> Value {
    let mut show = json!({
        "show_id": id,
        "title": format!("Show {id}"),
        "description": "remote show",
        "episodes": episodes
            .iter()
            .map(|(eid, path)| json!({
                "episode_id": eid,
                "title": format!("Episode {eid}"),
                "audio_path": path,
                "duration": "10:00"
            }))
            .collect::<Vec<_>>()
    });
    if let Some(category) = category {
        show["category_id"] = json!(category);
    }
    show
}
