#[macro_use]
extern crate rocket;

use std::{error::Error, sync::Arc};

use rocket::{serde::json::Json, State};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ima_bls::aggregator::Aggregator;
use ima_bls::committee::{CommitteeView, NetworkInfo, StaticTopology};
use ima_bls::config::AgentConfig;
use ima_bls::custodian::RpcCustodian;
use ima_bls::error::SigningError;
use ima_bls::logging::init_logging;
use ima_bls::protocol::{METHOD_SIGN_READY_HASH, METHOD_SIGN_U256, METHOD_VERIFY_AND_SIGN};
use ima_bls::proxy::NoMessageProxy;
use ima_bls::responder::Responder;

#[derive(Debug, Deserialize)]
struct RpcCall {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Serialize)]
struct RpcFault {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
struct RpcAnswer {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcFault>,
}

impl RpcAnswer {
    fn fault(id: Value, code: i64, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcFault { code, message }),
        }
    }
}

async fn dispatch_call(responder: &Responder, call: RpcCall) -> RpcAnswer {
    let reply = match call.method.as_str() {
        METHOD_VERIFY_AND_SIGN => match serde_json::from_value(call.params) {
            Ok(params) => responder.handle_verify_and_sign(params).await,
            Err(err) => return RpcAnswer::fault(call.id, -32602, err.to_string()),
        },
        METHOD_SIGN_U256 => match serde_json::from_value(call.params) {
            Ok(params) => responder.handle_bsu256(params).await,
            Err(err) => return RpcAnswer::fault(call.id, -32602, err.to_string()),
        },
        METHOD_SIGN_READY_HASH => match serde_json::from_value(call.params) {
            Ok(params) => responder.handle_sign_ready_hash(params).await,
            Err(err) => return RpcAnswer::fault(call.id, -32602, err.to_string()),
        },
        other => {
            return RpcAnswer::fault(call.id, -32601, format!("method {} not found", other));
        }
    };

    match reply.and_then(|reply| Ok(serde_json::to_value(reply)?)) {
        Ok(result) => RpcAnswer {
            jsonrpc: "2.0",
            id: call.id,
            result: Some(result),
            error: None,
        },
        Err(err) => RpcAnswer::fault(call.id, -32000, err.to_string()),
    }
}

#[post("/", format = "json", data = "<call>")]
async fn rpc(responder: &State<Responder>, call: Json<RpcCall>) -> Json<RpcAnswer> {
    Json(dispatch_call(responder, call.into_inner()).await)
}

fn load_responder(config: &AgentConfig) -> Result<Responder, SigningError> {
    let path = config
        .network_info_path
        .as_ref()
        .ok_or_else(|| SigningError::Config("network info path is not set".to_string()))?;
    let info: NetworkInfo = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let committee = CommitteeView::from_network_info(
        &info,
        config.cross_ima_mode,
        Some(config.this_node_index),
    )?;
    let topology = match &config.topology_path {
        Some(path) => StaticTopology::from_file(path)?,
        None => StaticTopology::default(),
    };

    Ok(Responder::new(
        config.clone(),
        Arc::new(committee),
        Arc::new(Aggregator::from_config(config)),
        Arc::new(RpcCustodian::from_config(config)),
        Arc::new(topology),
        Arc::new(NoMessageProxy),
    ))
}

#[rocket::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = AgentConfig::from_env()?;
    init_logging(&config.log)?;
    let responder = load_responder(&config)?;
    tracing::info!(
        address = %config.listen_address,
        port = config.listen_port,
        node = config.this_node_index,
        "IMA BLS endpoint starting"
    );

    let figment = rocket::Config::figment()
        .merge(("address", config.listen_address.clone()))
        .merge(("port", config.listen_port));
    rocket::custom(figment)
        .manage(responder)
        .mount("/", routes![rpc])
        .launch()
        .await?;
    Ok(())
}
