//! Device selection, connection and direct cell commands.

use serde_json::json;
use vest_core::{ConnectOutcome, StopReport};
use vest_rpc::protocol::{EventKind, Response};
use vest_types::{CellId, DeviceDescriptor, DeviceMatcher, Intensity};

use super::{HandlerContext, scan_events, to_value};
use crate::error::{DaemonError, Result};

/// A failed write may have closed the handle.
pub(super) fn check_still_connected(
    ctx: &mut HandlerContext<'_>,
    was_connected: Option<DeviceDescriptor>,
) {
    if was_connected.is_some() && !ctx.session.is_connected() {
        ctx.device_lost(was_connected, "device unavailable");
    }
}

pub(super) fn stop_payload(response: Response, report: &StopReport) -> Result<Response> {
    let failed: Vec<CellId> = report.failed.iter().map(|(cell, _)| *cell).collect();
    let response = response
        .with("attempted", json!(report.attempted))
        .with("failed_cells", to_value(&failed)?);
    if report.is_clean() {
        Ok(response)
    } else {
        Ok(response.with_message(format!("{} cells failed to stop", failed.len())))
    }
}

pub fn handle_list(ctx: &mut HandlerContext<'_>) -> Result<Response> {
    let scan = ctx.session.list_devices();
    for event in scan_events(ctx.sequencer, &scan) {
        ctx.emit(event);
    }
    Ok(Response::ok("list").with("devices", to_value(&scan.devices)?))
}

pub fn handle_select_device(
    ctx: &mut HandlerContext<'_>,
    bus: Option<u8>,
    address: Option<u8>,
    serial: Option<&str>,
) -> Result<Response> {
    let matcher = DeviceMatcher::from_parts(bus, address, serial).ok_or_else(|| {
        DaemonError::InvalidParams("select_device needs bus and address, or serial".to_string())
    })?;

    let scan = ctx.session.list_devices();
    for event in scan_events(ctx.sequencer, &scan) {
        ctx.emit(event);
    }

    let selection = ctx.session.select_device(&matcher)?;
    if let Some(closed) = selection.closed {
        ctx.device_lost(Some(closed), "selection changed");
    }
    ctx.emit(EventKind::DeviceSelected {
        device: selection.device.clone(),
    });

    Ok(Response::ok("select_device").with("device", to_value(&selection.device)?))
}

pub fn handle_get_selected_device(ctx: &mut HandlerContext<'_>) -> Result<Response> {
    Ok(Response::ok("get_selected_device")
        .with("device", to_value(ctx.session.selected())?)
        .with("connected", json!(ctx.session.is_connected())))
}

pub fn handle_clear_device(ctx: &mut HandlerContext<'_>) -> Result<Response> {
    let had_selection = ctx.session.selected().is_some();
    if let Some(closed) = ctx.session.clear_device() {
        ctx.device_lost(Some(closed), "selection cleared");
    }
    if had_selection {
        ctx.emit(EventKind::DeviceCleared);
    }
    Ok(Response::ok("clear_device"))
}

pub async fn handle_connect(ctx: &mut HandlerContext<'_>) -> Result<Response> {
    match ctx.session.connect().await? {
        ConnectOutcome::Opened(device) => {
            ctx.emit(EventKind::Connected {
                device: device.clone(),
            });
            Ok(Response::ok("connect").with("device", to_value(&device)?))
        }
        ConnectOutcome::AlreadyConnected(device) => Ok(Response::ok("connect")
            .with("device", to_value(&device)?)
            .with_message("Already connected")),
    }
}

pub fn handle_disconnect(ctx: &mut HandlerContext<'_>) -> Result<Response> {
    if let Some(device) = ctx.session.disconnect() {
        ctx.sequencer.cancel();
        ctx.emit(EventKind::Disconnected {
            device: Some(device),
            reason: None,
        });
    }
    Ok(Response::ok("disconnect"))
}

pub fn handle_trigger(
    ctx: &mut HandlerContext<'_>,
    cell: CellId,
    speed: Intensity,
) -> Result<Response> {
    let was_connected = ctx.session.connected_device().cloned();
    if let Err(e) = ctx.session.trigger_cell(cell, speed) {
        check_still_connected(ctx, was_connected);
        return Err(e.into());
    }

    ctx.emit(EventKind::EffectTriggered {
        cell,
        speed,
        effect_name: None,
    });
    Ok(Response::ok("trigger")
        .with("cell", json!(cell.index()))
        .with("speed", json!(speed.level())))
}

/// All cells off. A running playback keeps going.
pub fn handle_stop(ctx: &mut HandlerContext<'_>) -> Result<Response> {
    let was_connected = ctx.session.connected_device().cloned();
    let report = ctx.session.stop_all();
    check_still_connected(ctx, was_connected);
    ctx.emit(EventKind::AllStopped);
    stop_payload(Response::ok("stop"), &report)
}

pub fn handle_status(ctx: &mut HandlerContext<'_>) -> Result<Response> {
    Ok(Response::ok("status")
        .with("connected", json!(ctx.session.is_connected()))
        .with("state", to_value(ctx.session.state())?)
        .with("device", to_value(ctx.session.selected())?)
        .with("playback", to_value(ctx.sequencer.info())?))
}
