//! Effect playback commands.

use serde_json::json;
use tokio::time::Instant;
use vest_rpc::protocol::{EffectSource, EventKind, PlayEffectParams, Response};

use super::device::{check_still_connected, stop_payload};
use super::{HandlerContext, to_value};
use crate::error::{DaemonError, Result};

/// Start a pattern. The first step runs on the router's next turn, after
/// this response has been queued.
pub fn handle_play_effect(
    ctx: &mut HandlerContext<'_>,
    params: PlayEffectParams,
) -> Result<Response> {
    let source = params.into_source().map_err(DaemonError::InvalidParams)?;
    let now = Instant::now();

    let replaced = match source {
        EffectSource::Named(name) => {
            let pattern = ctx
                .library
                .get(&name)
                .cloned()
                .ok_or(DaemonError::UnknownEffect(name))?;
            ctx.sequencer.play_effect(ctx.session, pattern, now)?
        }
        EffectSource::AdHoc(pattern) => ctx.sequencer.play_effect(ctx.session, pattern, now)?,
        EffectSource::Single {
            cells,
            intensity,
            hold_ms,
        } => ctx
            .sequencer
            .play_ad_hoc(ctx.session, cells, intensity, hold_ms, now)?,
    };

    let Some(playback) = ctx.sequencer.active() else {
        return Err(DaemonError::InvalidParams("effect has no steps".to_string()));
    };
    let info = playback.info();
    let duration_ms = playback.pattern().total_duration_ms();

    ctx.emit(EventKind::EffectStarted {
        effect_name: info.effect_name.clone(),
        total_steps: info.total_steps,
    });

    Ok(Response::ok("play_effect")
        .with("effect_name", json!(info.effect_name))
        .with("total_steps", json!(info.total_steps))
        .with("duration_ms", json!(duration_ms))
        .with("replaced", json!(replaced)))
}

/// Cancel the playback, then turn every cell off. Fine when idle.
pub fn handle_stop_effect(ctx: &mut HandlerContext<'_>) -> Result<Response> {
    let was_connected = ctx.session.connected_device().cloned();
    let outcome = ctx.sequencer.stop(ctx.session);
    check_still_connected(ctx, was_connected);
    ctx.emit(EventKind::AllStopped);

    let response = Response::ok("stop_effect").with("cancelled", json!(outcome.cancelled));
    stop_payload(response, &outcome.report)
}

pub fn handle_list_effects(ctx: &mut HandlerContext<'_>) -> Result<Response> {
    Ok(Response::ok("list_effects")
        .with("effects", to_value(ctx.library.infos())?)
        .with("categories", to_value(ctx.library.categories())?))
}
