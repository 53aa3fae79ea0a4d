//! Index lifecycle command line
//!
//! Runs one lifecycle operation against an Elasticsearch-compatible engine
//! and prints the JSON outcome.
//!
//! ```text
//! index-lifecycle create <name> [template.json]
//! index-lifecycle update <name> [template.json]
//! index-lifecycle delete <name>
//! index-lifecycle ready
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | INDEX_LIFECYCLE_CONFIG | - | TOML config file, replaces the variables below |
//! | ES_URL | http://127.0.0.1:9200 | Engine base URL |
//! | ES_REFRESH | 1000 | Consistency delay after writes (ms) |
//! | ES_REQUEST_TIMEOUT | 30000 | HTTP request timeout (ms) |
//! | INDEX_LIFECYCLE_CREATION_TIMEOUT_MS | 600000 | Create lease duration |
//! | INDEX_LIFECYCLE_UPDATE_TIMEOUT_MS | 172800000 | Update lease duration |
//! | INDEX_LIFECYCLE_DELETION_TIMEOUT_MS | 600000 | Delete lease duration |
//! | INDEX_LIFECYCLE_TIMEOUT_POLICY | cancel | `cancel` or `detach` |
//! | INDEX_LIFECYCLE_LOG_FORMAT | text | `text` or `json` |

use index_lifecycle::observability::{init_tracing, LogFormat};
use index_lifecycle::orchestrator::{CreateOptions, UpdateOptions};
use index_lifecycle::store::ElasticsearchStore;
use index_lifecycle::{IndexError, IndexManager, ManagerConfig};
use serde_json::{json, Value};
use tracing::info;

const USAGE: &str = "usage: index-lifecycle <create|update|delete|ready> [name] [template.json]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(LogFormat::from_env());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    };

    let config = match std::env::var("INDEX_LIFECYCLE_CONFIG") {
        Ok(path) => ManagerConfig::from_toml_file(&path)?,
        Err(_) => ManagerConfig::from_env(),
    };
    info!(url = %config.store.url, policy = ?config.timeout_policy, "Starting index lifecycle");

    let store = ElasticsearchStore::new(&config.store)?;
    let manager = IndexManager::builder(store).config(config).build();

    let template = match args.get(2) {
        Some(path) => Some(read_template(path)?),
        None => None,
    };
    let name = args.get(1).map(String::as_str);

    let outcome: Result<Value, IndexError> = match (command.as_str(), name) {
        ("create", Some(name)) => {
            let options = CreateOptions { template };
            manager.create(name, options).await.map(|o| json!(o))
        }
        ("update", Some(name)) => {
            let mut options = UpdateOptions::new();
            options.template = template;
            manager.update(name, options).await.map(|o| json!(o))
        }
        ("delete", Some(name)) => manager.delete(name).await.map(|o| json!(o)),
        ("ready", _) => manager.ready().await.map(|()| json!({ "ready": true })),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(err) => {
            println!("{}", serde_json::to_string_pretty(&err.to_json())?);
            std::process::exit(1);
        }
    }
}

fn read_template(path: &str) -> Result<Value, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
