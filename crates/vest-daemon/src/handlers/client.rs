//! Health check and client bookkeeping.

use serde_json::json;
use tracing::info;
use vest_rpc::protocol::Response;

use super::{HandlerContext, to_value};
use crate::error::Result;

pub fn handle_ping(ctx: &mut HandlerContext<'_>) -> Result<Response> {
    Ok(Response::ok("ping")
        .with("alive", json!(true))
        .with("connected", json!(ctx.session.is_connected()))
        .with("has_device_selected", json!(ctx.session.selected().is_some()))
        .with("client_count", json!(ctx.registry.len()))
        .with("version", json!(env!("CARGO_PKG_VERSION"))))
}

pub fn handle_identify(
    ctx: &mut HandlerContext<'_>,
    name: String,
    version: Option<String>,
) -> Result<Response> {
    ctx.registry.identify(ctx.client_id, name, version);
    Ok(Response::ok("identify").with("client_id", json!(ctx.client_id.as_str())))
}

pub fn handle_list_clients(ctx: &mut HandlerContext<'_>) -> Result<Response> {
    Ok(Response::ok("list_clients").with("clients", to_value(ctx.registry.list())?))
}

pub fn handle_shutdown(ctx: &mut HandlerContext<'_>) -> Result<Response> {
    info!("Shutdown requested by {}", ctx.client_id);
    ctx.shutdown_requested = true;
    Ok(Response::ok("shutdown").with_message("Shutting down"))
}
