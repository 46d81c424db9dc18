//! Producer to worker round trips through the in-memory store.

use super::helpers::{QueueStack, RecordingModel, stack, start_time};
use chrono::TimeDelta;
use deferq::queue::{
    domain::{QueueTask, TaskId, UserId},
    ports::CallTarget,
    services::{CallContext, DeferredCall, QueueServiceError, RunError, RunOutcome},
};
use eyre::{WrapErr, ensure, eyre};
use rstest::rstest;
use serde_json::{Map, json};
use std::time::Duration;

fn producer() -> CallContext {
    CallContext::new(UserId::new(7), Map::new()).with("company", 3)
}

async fn stored(stack: &QueueStack, id: TaskId) -> Result<QueueTask, eyre::Report> {
    stack
        .queue
        .find(id)
        .await
        .wrap_err("look up task")?
        .ok_or_else(|| eyre!("task {id} is missing"))
}

async fn claim_next(stack: &QueueStack) -> Result<TaskId, eyre::Report> {
    stack
        .queue
        .pull(None)
        .await
        .wrap_err("pull task")?
        .task_id()
        .ok_or_else(|| eyre!("no task was claimed"))
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn deferred_call_runs_with_producer_identity(
    stack: QueueStack,
) -> Result<(), eyre::Report> {
    let call = DeferredCall::new(producer())
        .with_records(vec![1_i64, 2])
        .with_args([json!("urgent")]);
    let id = stack
        .caller
        .model("sale")
        .call("process", call)
        .await
        .wrap_err("enqueue deferred call")?;

    ensure!(claim_next(&stack).await? == id, "claimed a different task");
    stack.clock.advance(TimeDelta::seconds(2));
    let outcome = stack.runner.run_claimed(id).await.wrap_err("run task")?;

    let invocations = stack.model.invocations();
    let [invocation] = invocations.as_slice() else {
        return Err(eyre!("expected one invocation, got {invocations:?}"));
    };
    ensure!(outcome == RunOutcome::Executed, "unexpected outcome {outcome:?}");
    ensure!(invocation.target == CallTarget::Records(vec![1, 2]), "wrong target");
    ensure!(invocation.args == vec![json!("urgent")], "wrong arguments");
    ensure!(invocation.context.user() == UserId::new(7), "wrong acting user");
    ensure!(
        invocation.context.get("company") == Some(&json!(3)),
        "producer context was not carried"
    );
    let task = stored(&stack, id).await?;
    ensure!(
        task.finished_at() == Some(start_time() + TimeDelta::seconds(2)),
        "task was not finished at run time"
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn records_deleted_after_enqueue_are_dropped(stack: QueueStack) -> Result<(), eyre::Report> {
    let single = stack
        .caller
        .model("sale")
        .call("process", DeferredCall::new(producer()).with_records(4_i64))
        .await
        .wrap_err("enqueue single-record call")?;
    let many = stack
        .caller
        .model("sale")
        .call(
            "process",
            DeferredCall::new(producer()).with_records(vec![5_i64, 4, 3]),
        )
        .await
        .wrap_err("enqueue collection call")?;
    stack.model.delete(4);

    claim_next(&stack).await?;
    claim_next(&stack).await?;
    let skipped = stack.runner.run_claimed(single).await.wrap_err("run single")?;
    let executed = stack.runner.run_claimed(many).await.wrap_err("run collection")?;

    let targets: Vec<CallTarget> = stack
        .model
        .invocations()
        .into_iter()
        .map(|invocation| invocation.target)
        .collect();
    ensure!(skipped == RunOutcome::Skipped, "single call was not skipped");
    ensure!(executed == RunOutcome::Executed, "collection call was not run");
    ensure!(targets == vec![CallTarget::Records(vec![5, 3])], "got {targets:?}");
    ensure!(stored(&stack, single).await?.is_finished(), "skipped task unfinished");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn delayed_call_waits_for_its_schedule(stack: QueueStack) -> Result<(), eyre::Report> {
    let context = producer().with("queue_scheduled_at", 90);
    let id = stack
        .caller
        .model("sale")
        .call("notify", DeferredCall::new(context))
        .await
        .wrap_err("enqueue delayed call")?;

    let early = stack.queue.pull(None).await.wrap_err("early pull")?;
    ensure!(early.claimed.is_none(), "task claimed before its schedule");
    ensure!(
        early.next_wakeup == Some(Duration::from_secs(90)),
        "unexpected wake-up hint {:?}",
        early.next_wakeup
    );

    stack.clock.advance(TimeDelta::seconds(90));
    ensure!(claim_next(&stack).await? == id, "due task was not claimed");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failed_call_stays_claimed_and_unfinished() -> Result<(), eyre::Report> {
    let stack = QueueStack::new(RecordingModel::with_records([1]).failing_on("notify"));
    let id = stack
        .caller
        .model("sale")
        .call("notify", DeferredCall::new(producer()).with_records(1_i64))
        .await
        .wrap_err("enqueue failing call")?;
    claim_next(&stack).await?;

    let result = stack.runner.run_claimed(id).await;

    let task = stored(&stack, id).await?;
    ensure!(
        matches!(result, Err(RunError::Execution(_))),
        "expected an execution error, got {result:?}"
    );
    ensure!(task.dequeued_at().is_some(), "failed task lost its claim");
    ensure!(!task.is_finished(), "failed task was finished");
    ensure!(
        stack.queue.pull(None).await.wrap_err("pull again")?.claimed.is_none(),
        "failed task was handed out again"
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn non_atomic_call_runs_through_claimed_dispatch(
    stack: QueueStack,
) -> Result<(), eyre::Report> {
    let call = DeferredCall::new(producer())
        .with_records(2_i64)
        .with_kwarg("_atomic", false);
    let id = stack
        .caller
        .model("sale")
        .call("process", call)
        .await
        .wrap_err("enqueue non-atomic call")?;
    claim_next(&stack).await?;

    let outcome = stack.runner.run_claimed(id).await.wrap_err("run task")?;

    ensure!(outcome == RunOutcome::Executed, "unexpected outcome {outcome:?}");
    ensure!(stored(&stack, id).await?.is_finished(), "task not finished");
    ensure!(
        stack
            .model
            .invocations()
            .iter()
            .all(|invocation| !invocation.kwargs.contains_key("_atomic")),
        "atomic flag leaked into keyword arguments"
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn copies_are_fresh_and_runnable(stack: QueueStack) -> Result<(), eyre::Report> {
    let context = producer().with("queue_name", "mail").with("priority", 4);
    let original = stack
        .caller
        .model("sale")
        .call("notify", DeferredCall::new(context).with_records(3_i64))
        .await
        .wrap_err("enqueue original")?;
    claim_next(&stack).await?;
    stack.runner.run_claimed(original).await.wrap_err("run original")?;
    stack.clock.advance(TimeDelta::minutes(5));

    let copies = stack.queue.copy(&[original]).await.wrap_err("copy task")?;
    let [copy_id] = copies.as_slice() else {
        return Err(eyre!("expected one copy, got {copies:?}"));
    };
    let source = stored(&stack, original).await?;
    let copy = stored(&stack, *copy_id).await?;

    ensure!(copy.name() == source.name(), "copy changed queue");
    ensure!(copy.priority() == Some(4), "copy lost its priority");
    ensure!(copy.data() == source.data(), "copy changed payload");
    ensure!(copy.dequeued_at().is_none(), "copy starts claimed");
    ensure!(!copy.is_finished(), "copy starts finished");
    ensure!(
        copy.enqueued_at() == start_time() + TimeDelta::minutes(5),
        "copy kept the source enqueue time"
    );
    ensure!(claim_next(&stack).await? == *copy_id, "copy is not claimable");
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn copying_a_missing_task_fails(stack: QueueStack) -> Result<(), eyre::Report> {
    let result = stack.queue.copy(&[TaskId::new(99)]).await;

    ensure!(
        matches!(result, Err(QueueServiceError::Store(_))),
        "expected a store error, got {result:?}"
    );
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn operator_finish_closes_a_pulled_task(stack: QueueStack) -> Result<(), eyre::Report> {
    let id = stack
        .caller
        .model("sale")
        .call("process", DeferredCall::new(producer()).with_records(2_i64))
        .await
        .wrap_err("enqueue call")?;
    claim_next(&stack).await?;
    stack.clock.advance(TimeDelta::seconds(20));

    let finished = stack.queue.finish(id).await.wrap_err("finish task")?;
    stack.clock.advance(TimeDelta::seconds(20));
    let again = stack.queue.finish(id).await.wrap_err("finish twice")?;

    let expected = Some(start_time() + TimeDelta::seconds(20));
    ensure!(finished.finished_at() == expected, "unexpected completion time");
    ensure!(again.finished_at() == expected, "second finish moved completion");
    ensure!(
        stored(&stack, id).await?.finished_at() == expected,
        "completion not stored"
    );
    ensure!(stack.model.invocations().is_empty(), "finish ran the call");
    Ok(())
}
