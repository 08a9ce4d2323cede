//! Reference TCP adapter over [`docustore::StoreEngine`]. Per connection,
//! reads one JSON request per line and writes one JSON response per line —
//! the line-oriented request surface spec.md §6 describes, not an HTTP
//! API. Each connection is handled on its own thread, matching the
//! per-request-thread concurrency model of §5.

use docustore::engine::StoreEngine;
use docustore::record::Record;
use docustore::{Result, StoreConfig, StoreError};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use tracing::{error, info, warn};

fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = StoreConfig::from_env();
    let engine = match StoreEngine::new(config) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            error!(error = %e, "failed to initialize store engine");
            return Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
        }
    };
    Arc::clone(&engine).start_maintenance();

    let host = std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(7878u16);

    let listener = TcpListener::bind((host.as_str(), port))?;
    info!(host, port, "docustore server listening");

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || handle_connection(stream, engine));
            }
            Err(e) => warn!(error = %e, "failed to accept connection"),
        }
    }

    engine.stop_maintenance();
    Ok(())
}

fn handle_connection(stream: TcpStream, engine: Arc<StoreEngine>) {
    let peer = stream.peer_addr().ok();
    let reader = BufReader::new(stream.try_clone().expect("clone tcp stream"));
    let mut writer = stream;

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(?peer, error = %e, "connection read error");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Value>(&line) {
            Ok(request) => dispatch(&engine, &request),
            Err(e) => json!({ "error": format!("malformed request: {e}") }),
        };

        let Ok(mut payload) = serde_json::to_vec(&response) else {
            break;
        };
        payload.push(b'\n');
        if writer.write_all(&payload).is_err() {
            break;
        }
    }
}

fn dispatch(engine: &StoreEngine, request: &Value) -> Value {
    let action = request.get("action").and_then(Value::as_str).unwrap_or("");
    let user = request.get("userId").and_then(Value::as_str).unwrap_or("system");
    let db = request.get("dbName").and_then(Value::as_str).unwrap_or("");
    let collection = request.get("collection").and_then(Value::as_str).unwrap_or("");

    let result = match action {
        "ping" => Ok(json!({ "status": "ok" })),
        "initUserSpace" => engine.ensure_user_root(user).map(|_| json!({ "status": "ok" })),
        "createDatabase" => engine.create_database(user, db).map(|_| json!({ "status": "ok" })),
        "createCollection" => engine
            .create_collection(user, db, collection)
            .map(|_| json!({ "status": "ok" })),
        "listDatabases" => engine
            .list_databases(user)
            .map(|dbs| json!({ "status": "ok", "databases": dbs })),
        "insert" => as_record(request.get("data"))
            .and_then(|record| engine.insert(user, db, collection, record))
            .map(|id| json!({ "status": "ok", "id": id })),
        "insertVector" => as_record(request.get("data"))
            .and_then(|record| engine.insert_vector(user, db, collection, record))
            .map(|id| json!({ "status": "ok", "id": id })),
        "find" => {
            let filter = request.get("filter").cloned().unwrap_or_else(|| json!({}));
            engine
                .find(user, db, collection, &filter)
                .map(|records| json!({ "status": "ok", "records": records }))
        }
        "queryVector" => serde_json::from_value(request.clone())
            .map_err(|_| StoreError::FilterInvalid)
            .and_then(|query| engine.query_vector(user, db, collection, &query))
            .map(|records| json!({ "status": "ok", "records": records })),
        "updateOne" => {
            let filter = request.get("filter").cloned().unwrap_or_else(|| json!({}));
            let update = request.get("update").cloned().unwrap_or_else(|| json!({}));
            engine
                .update_one(user, db, collection, &filter, &update)
                .map(|updated| json!({ "status": "ok", "updated": updated }))
        }
        "deleteOne" => {
            let filter = request.get("filter").cloned().unwrap_or_else(|| json!({}));
            engine
                .delete_one(user, db, collection, &filter)
                .map(|deleted| json!({ "status": "ok", "deleted": deleted }))
        }
        "bulk" => Ok(dispatch_bulk(engine, request)),
        other => Err(StoreError::UnknownAction(other.to_string())),
    };

    result.unwrap_or_else(|e| json!({ "error": e.to_string() }))
}

fn dispatch_bulk(engine: &StoreEngine, request: &Value) -> Value {
    let ops = request.get("ops").and_then(Value::as_array).cloned().unwrap_or_default();
    let (mut inserted, mut updated, mut deleted, mut errors) = (0u64, 0u64, 0u64, 0u64);

    for op in ops {
        let action = op.get("action").and_then(Value::as_str).unwrap_or("");
        let response = dispatch(engine, &op);
        if response.get("error").is_some() {
            errors += 1;
            continue;
        }
        match action {
            "insert" | "insertVector" => inserted += 1,
            "updateOne" => updated += 1,
            "deleteOne" => deleted += 1,
            _ => {}
        }
    }

    json!({ "status": "ok", "inserted": inserted, "updated": updated, "deleted": deleted, "errors": errors })
}

fn as_record(data: Option<&Value>) -> Result<Record> {
    data.and_then(Value::as_object)
        .cloned()
        .ok_or(StoreError::FilterInvalid)
}
