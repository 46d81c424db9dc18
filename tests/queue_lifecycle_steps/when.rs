//! When steps for queue lifecycle BDD scenarios.

use super::world::{QueueWorld, run_async};
use chrono::TimeDelta;
use deferq::queue::{
    domain::UserId,
    services::{CallContext, DeferredCall, SCHEDULED_DELAY_KEY},
};
use eyre::WrapErr;
use rstest_bdd_macros::when;
use serde_json::Map;

fn enqueue(world: &mut QueueWorld, method: &str, call: DeferredCall) -> Result<(), eyre::Report> {
    let result = run_async(world.wiring()?.caller.model("sale").call(method, call));
    match result {
        Ok(id) => world.queued.push(id),
        Err(err) => world.last_call_error = Some(err),
    }
    Ok(())
}

#[when(r#"record {record:i64} is queued for "{method}""#)]
fn record_queued(world: &mut QueueWorld, record: i64, method: String) -> Result<(), eyre::Report> {
    let call = DeferredCall::new(CallContext::new(UserId::ROOT, Map::new())).with_records(record);
    enqueue(world, &method, call)
}

#[when(r#"record {record:i64} is queued for "{method}" with a delay of {seconds:i64} seconds"#)]
fn record_queued_with_delay(
    world: &mut QueueWorld,
    record: i64,
    method: String,
    seconds: i64,
) -> Result<(), eyre::Report> {
    let context = CallContext::new(UserId::ROOT, Map::new()).with(SCHEDULED_DELAY_KEY, seconds);
    enqueue(world, &method, DeferredCall::new(context).with_records(record))
}

#[when("record {record:i64} is deleted")]
fn record_deleted(world: &mut QueueWorld, record: i64) -> Result<(), eyre::Report> {
    world.wiring()?.model.delete(record);
    Ok(())
}

#[when("the worker drains the queue")]
fn worker_drains(world: &mut QueueWorld) -> Result<(), eyre::Report> {
    run_async(world.wiring()?.worker.run_pending()).wrap_err("drain queue")?;
    Ok(())
}

#[when("the clock advances {seconds:i64} seconds")]
fn clock_advances(world: &mut QueueWorld, seconds: i64) {
    world.clock.advance(TimeDelta::seconds(seconds));
}
