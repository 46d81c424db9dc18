//! Given steps for queue lifecycle BDD scenarios.

use super::world::QueueWorld;
use crate::test_helpers::RecordingModel;
use rstest_bdd_macros::given;

#[given(r#"a "{model}" model allowing "{method}" with records {first:i64} to {last:i64}"#)]
fn registered_model(world: &mut QueueWorld, model: String, method: String, first: i64, last: i64) {
    world.register(&model, &[method], RecordingModel::with_records(first..=last));
}
