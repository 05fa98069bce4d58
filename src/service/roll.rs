//! Dice roll endpoint.
//!
//! Handles `GET /rolldice`: a request span wraps the whole call, each piece
//! of business work runs in its own nested span, and every step is logged
//! through the trace-correlated request log.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rand::Rng;

use crate::server::AppState;
use crate::telemetry::{Telemetry, TraceContext};

/// Handle a dice roll request.
pub async fn roll_dice(State(state): State<Arc<AppState>>) -> Response {
    let telemetry = &state.telemetry;
    let ctx = telemetry.tracer.context();
    let _request_span = ctx.start_span("GET /rolldice");

    telemetry
        .log
        .info(&ctx, "roll_dice: received a request on /rolldice");
    state.request_counter.add(1);

    let result = do_roll(telemetry, &ctx);
    do_important_job(telemetry, &ctx);

    // TODO: the roll range includes 7, which always fails this check; confirm
    // the intended die size before tightening either side.
    if result < 0 || result > 6 {
        telemetry
            .log
            .error(&ctx, format!("roll_dice: invalid dice value received: {result}!"));
        ctx.set_error("dice value out of range");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Something went wrong!").into_response();
    }

    telemetry
        .log
        .info(&ctx, format!("roll_dice: successfully completed with result: {result}"));
    result.to_string().into_response()
}

/// Roll the dice inside its own span, recording the value as an attribute.
pub fn do_roll(telemetry: &Telemetry, ctx: &TraceContext) -> i64 {
    telemetry.log.info(ctx, "do_roll: starting the function execution");
    let _span = ctx.start_span("do_roll");

    let result = rand::thread_rng().gen_range(1..=7);
    telemetry
        .log
        .debug(ctx, format!("do_roll: dice roll resulted in value {result}"));
    ctx.set_attribute("roll.value", result);
    ctx.add_event("Dice roll span event.");
    telemetry.log.info(ctx, "do_roll: function execution completed");
    result
}

/// Simulate a second unit of work so traces show a sibling span.
pub fn do_important_job(telemetry: &Telemetry, ctx: &TraceContext) {
    telemetry.log.info(ctx, "do_important_job: starting an important job");
    {
        let _span = ctx.start_span("do_important_job");
        let result: i64 = rand::thread_rng().gen_range(1..=10_000);
        ctx.set_attribute("important_job.result", result);
        ctx.add_event(format!("Important job completed with result {result}."));
        telemetry
            .log
            .debug(ctx, format!("do_important_job: important job result: {result}"));
    }
    telemetry
        .log
        .info(ctx, "do_important_job: function execution completed");
}
