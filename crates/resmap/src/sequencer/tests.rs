use super::*;
use crate::command::{RowCountPolicy, StepKind};
use crate::model::InMemoryDataModel;
use crate::resource::Resource;
use crate::test_support;

fn tracked(model: &InMemoryDataModel, current: &Resource, new: &Resource) -> ChangeTracker {
    let resource_type = model.resource_type(&current.type_name).unwrap();
    let mut tracker = ChangeTracker::new(model, resource_type).unwrap();
    tracker.capture_current(current).unwrap();
    tracker.capture_new(new).unwrap();
    tracker
}

fn statements(plan: &WritePlan) -> Vec<String> {
    plan.commands().map(SqlCommand::statement_text).collect()
}

fn steps(plan: &WritePlan) -> Vec<StepKind> {
    plan.commands().map(SqlCommand::step).collect()
}

fn tag(id: i64) -> ResourceIdentity {
    ResourceIdentity::server("tags", id)
}

fn todo_item() -> Resource {
    Resource::new("todoItems")
        .with_id(1_i64)
        .with_attribute("description", "Write docs")
        .with_to_one("owner", Some(ResourceIdentity::server("people", 7_i64)))
        .with_to_many("tags", [tag(1), tag(2), tag(3)])
}

#[test]
fn unchanged_update_is_empty() {
    let model = test_support::model();
    let item = todo_item();
    let tracker = tracked(&model, &item, &item);
    let plan = CommandSequencer::new(&model)
        .plan_update(&tracker, &Id::Int(1))
        .unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.len(), 0);
}

#[test]
fn attribute_change_is_a_single_update() {
    let model = test_support::model();
    let current = todo_item();
    let new = current.clone().with_attribute("priority", 3);
    let plan = CommandSequencer::new(&model)
        .plan_update(&tracked(&model, &current, &new), &Id::Int(1))
        .unwrap();

    assert_eq!(
        statements(&plan),
        vec![r#"UPDATE "todo_items" SET "priority" = @p1 WHERE "id" = @p2"#]
    );
    let main = plan.main.as_ref().unwrap();
    assert_eq!(main.expected_rows(), RowCountPolicy::ExactlyOne);
    assert_eq!(main.parameters()[0], ("@p1".to_string(), &Value::Int(3)));
}

#[test]
fn left_side_one_to_one_with_nullable_key_releases_the_old_holder() {
    let model = test_support::model();
    let current = Resource::new("people").with_id(1_i64);
    let new = current
        .clone()
        .with_to_one("account", Some(ResourceIdentity::server("loginAccounts", 4_i64)));
    let plan = CommandSequencer::new(&model)
        .plan_update(&tracked(&model, &current, &new), &Id::Int(1))
        .unwrap();

    assert_eq!(plan.pre_steps.len(), 1);
    assert_eq!(steps(&plan), vec![StepKind::ClearOneToOne, StepKind::Update]);
    assert_eq!(
        statements(&plan),
        vec![
            r#"UPDATE "people" SET "account_id" = @p1 WHERE "account_id" = @p2"#,
            r#"UPDATE "people" SET "account_id" = @p1 WHERE "id" = @p2"#,
        ]
    );
    assert_eq!(
        plan.pre_steps[0].parameters(),
        vec![
            ("@p1".to_string(), &Value::Null),
            ("@p2".to_string(), &Value::BigInt(4)),
        ]
    );
    assert_eq!(plan.pre_steps[0].expected_rows(), RowCountPolicy::AtMostOne);
}

#[test]
fn left_side_one_to_one_with_required_key_deletes_the_old_holder() {
    let model = test_support::model();
    let current = Resource::new("people").with_id(1_i64);
    let new = current
        .clone()
        .with_to_one("badge", Some(ResourceIdentity::server("badges", 4_i64)));
    let plan = CommandSequencer::new(&model)
        .plan_update(&tracked(&model, &current, &new), &Id::Int(1))
        .unwrap();

    assert_eq!(steps(&plan), vec![StepKind::DeleteOneToOne, StepKind::Update]);
    assert_eq!(
        plan.pre_steps[0].statement_text(),
        r#"DELETE FROM "people" WHERE "badge_id" = @p1"#
    );
}

#[test]
fn right_side_one_to_one_releases_the_current_dependent() {
    let model = test_support::model();
    let current = Resource::new("people")
        .with_id(1_i64)
        .with_to_one("passport", Some(ResourceIdentity::server("passports", 3_i64)));
    let new = current
        .clone()
        .with_to_one("passport", Some(ResourceIdentity::server("passports", 4_i64)));
    let plan = CommandSequencer::new(&model)
        .plan_update(&tracked(&model, &current, &new), &Id::Int(1))
        .unwrap();

    assert_eq!(steps(&plan), vec![StepKind::ClearOneToOne, StepKind::SetToOne]);
    assert!(plan.main.is_none());
    assert_eq!(
        plan.pre_steps[0].parameters()[1],
        ("@p2".to_string(), &Value::BigInt(3))
    );
    assert_eq!(
        plan.post_steps[0].statement_text(),
        r#"UPDATE "passports" SET "person_id" = @p1 WHERE "id" = @p2"#
    );
    assert_eq!(
        plan.post_steps[0].parameters(),
        vec![
            ("@p1".to_string(), &Value::BigInt(1)),
            ("@p2".to_string(), &Value::BigInt(4)),
        ]
    );
}

#[test]
fn right_side_one_to_one_with_required_key_deletes_the_current_dependent() {
    let model = test_support::model();
    let current = Resource::new("people")
        .with_id(1_i64)
        .with_to_one("profile", Some(ResourceIdentity::server("profiles", 3_i64)));
    let new = current
        .clone()
        .with_to_one("profile", Some(ResourceIdentity::server("profiles", 4_i64)));
    let plan = CommandSequencer::new(&model)
        .plan_update(&tracked(&model, &current, &new), &Id::Int(1))
        .unwrap();

    assert_eq!(steps(&plan), vec![StepKind::DeleteOneToOne, StepKind::SetToOne]);
    assert_eq!(
        plan.pre_steps[0].statement_text(),
        r#"DELETE FROM "profiles" WHERE "id" = @p1"#
    );
}

#[test]
fn clearing_a_nullable_right_side_to_one_unsets_the_current_row() {
    let model = test_support::model();
    let current = Resource::new("people")
        .with_id(1_i64)
        .with_to_one("passport", Some(ResourceIdentity::server("passports", 3_i64)));
    let new = current.clone().with_to_one("passport", None);
    let plan = CommandSequencer::new(&model)
        .plan_update(&tracked(&model, &current, &new), &Id::Int(1))
        .unwrap();

    assert_eq!(steps(&plan), vec![StepKind::SetToOne]);
    assert_eq!(
        plan.post_steps[0].parameters(),
        vec![
            ("@p1".to_string(), &Value::Null),
            ("@p2".to_string(), &Value::BigInt(3)),
        ]
    );
}

#[test]
fn clearing_a_required_to_one_produces_no_commands() {
    let model = test_support::model();
    let current = todo_item();
    let new = current
        .clone()
        .with_attribute("description", "changed")
        .with_to_one("owner", None);
    let tracker = tracked(&model, &current, &new);
    let sequencer = CommandSequencer::new(&model);

    let err = sequencer.plan_update(&tracker, &Id::Int(1)).unwrap_err();
    assert!(err.is_required_relationship_cleared());
    let err = sequencer.plan_create(&tracker).unwrap_err();
    assert!(err.is_required_relationship_cleared());
}

#[test]
fn removing_from_a_nullable_to_many_is_one_batched_update() {
    let model = test_support::model();
    let current = todo_item();
    let new = current.clone().with_to_many("tags", [tag(3)]);
    let plan = CommandSequencer::new(&model)
        .plan_update(&tracked(&model, &current, &new), &Id::Int(1))
        .unwrap();

    assert_eq!(
        statements(&plan),
        vec![r#"UPDATE "tags" SET "todo_item_id" = @p1 WHERE "id" IN (@p2, @p3)"#]
    );
    let detach = &plan.post_steps[0];
    assert_eq!(detach.step(), StepKind::DetachToMany);
    assert_eq!(detach.expected_rows(), RowCountPolicy::Exactly(2));
    assert_eq!(detach.parameters()[0].1, &Value::Null);
}

#[test]
fn removing_from_a_required_to_many_deletes() {
    let model = test_support::model();
    let person = model.resource_type("people").unwrap();
    let plan = CommandSequencer::new(&model)
        .plan_remove_from_many(
            &person,
            "ownedTodoItems",
            &[
                ResourceIdentity::server("todoItems", 5_i64),
                ResourceIdentity::server("todoItems", 6_i64),
            ],
        )
        .unwrap();

    assert_eq!(
        statements(&plan),
        vec![r#"DELETE FROM "todo_items" WHERE "id" IN (@p1, @p2)"#]
    );
    assert_eq!(
        plan.post_steps[0].expected_rows(),
        RowCountPolicy::Exactly(2)
    );
}

#[test]
fn adding_to_a_to_many_is_one_batched_update() {
    let model = test_support::model();
    let todo = model.resource_type("todoItems").unwrap();
    let plan = CommandSequencer::new(&model)
        .plan_add_to_many(&todo, "tags", &Id::Int(1), &[tag(10), tag(11)])
        .unwrap();

    let attach = &plan.post_steps[0];
    assert_eq!(
        attach.statement_text(),
        r#"UPDATE "tags" SET "todo_item_id" = @p1 WHERE "id" IN (@p2, @p3)"#
    );
    let values: Vec<_> = attach.parameters().into_iter().map(|(_, v)| v.clone()).collect();
    assert_eq!(
        values,
        vec![Value::BigInt(1), Value::BigInt(10), Value::BigInt(11)]
    );
    assert_eq!(attach.expected_rows(), RowCountPolicy::Exactly(2));
}

#[test]
fn repeated_ids_are_written_once() {
    let model = test_support::model();
    let todo = model.resource_type("todoItems").unwrap();
    let sequencer = CommandSequencer::new(&model);

    let plan = sequencer
        .plan_remove_from_many(&todo, "tags", &[tag(4), tag(4)])
        .unwrap();
    let detach = &plan.post_steps[0];
    assert_eq!(
        detach.statement_text(),
        r#"UPDATE "tags" SET "todo_item_id" = @p1 WHERE "id" IN (@p2)"#
    );
    assert_eq!(detach.expected_rows(), RowCountPolicy::Exactly(1));
    assert!(detach.verify(1).is_ok());

    let plan = sequencer
        .plan_add_to_many(&todo, "tags", &Id::Int(1), &[tag(10), tag(11), tag(10)])
        .unwrap();
    let attach = &plan.post_steps[0];
    assert_eq!(
        attach.statement_text(),
        r#"UPDATE "tags" SET "todo_item_id" = @p1 WHERE "id" IN (@p2, @p3)"#
    );
    assert_eq!(attach.expected_rows(), RowCountPolicy::Exactly(2));
}

#[test]
fn replacing_to_many_members_detaches_before_attaching() {
    let model = test_support::model();
    let current = todo_item();
    let new = current.clone().with_to_many("tags", [tag(2), tag(3), tag(4)]);
    let plan = CommandSequencer::new(&model)
        .plan_update(&tracked(&model, &current, &new), &Id::Int(1))
        .unwrap();

    assert_eq!(
        steps(&plan),
        vec![StepKind::DetachToMany, StepKind::AttachToMany]
    );
    assert_eq!(plan.post_steps[0].expected_rows(), RowCountPolicy::Exactly(1));
    assert_eq!(plan.post_steps[1].expected_rows(), RowCountPolicy::Exactly(1));
}

#[test]
fn empty_id_lists_plan_nothing() {
    let model = test_support::model();
    let todo = model.resource_type("todoItems").unwrap();
    let sequencer = CommandSequencer::new(&model);
    assert!(sequencer
        .plan_add_to_many(&todo, "tags", &Id::Int(1), &[])
        .unwrap()
        .is_empty());
    assert!(sequencer
        .plan_remove_from_many(&todo, "tags", &[])
        .unwrap()
        .is_empty());
}

#[test]
fn to_many_operations_check_the_relationship() {
    let model = test_support::model();
    let todo = model.resource_type("todoItems").unwrap();
    let sequencer = CommandSequencer::new(&model);

    let err = sequencer
        .plan_add_to_many(&todo, "owner", &Id::Int(1), &[ResourceIdentity::server("people", 2_i64)])
        .unwrap_err();
    assert!(matches!(err, OrmError::Validation(_)));

    let err = sequencer
        .plan_add_to_many(&todo, "tags", &Id::Int(1), &[ResourceIdentity::server("people", 2_i64)])
        .unwrap_err();
    assert!(matches!(err, OrmError::ResourceTypeMismatch { .. }));

    let err = sequencer
        .plan_remove_from_many(&todo, "labels", &[tag(1)])
        .unwrap_err();
    assert!(matches!(err, OrmError::Metadata(_)));
}

#[test]
fn local_related_ids_cannot_be_written() {
    let model = test_support::model();
    let current = todo_item();
    let new = current
        .clone()
        .with_to_many("tags", [tag(1), ResourceIdentity::local("tags", "new-tag")]);
    let err = CommandSequencer::new(&model)
        .plan_update(&tracked(&model, &current, &new), &Id::Int(1))
        .unwrap_err();
    assert!(err.is_client_error());
}

#[test]
fn delete_targets_the_primary_key() {
    let model = test_support::model();
    let todo = model.resource_type("todoItems").unwrap();
    let plan = CommandSequencer::new(&model)
        .plan_delete(&todo, &Id::Int(9))
        .unwrap();
    assert_eq!(
        statements(&plan),
        vec![r#"DELETE FROM "todo_items" WHERE "id" = @p1"#]
    );
    assert_eq!(steps(&plan), vec![StepKind::Delete]);
}

#[test]
fn create_inserts_touched_columns_and_defers_post_steps() {
    let model = test_support::model();
    let todo = model.resource_type("todoItems").unwrap();
    let new = Resource::new("todoItems")
        .with_attribute("description", "New item")
        .with_to_one("owner", Some(ResourceIdentity::server("people", 7_i64)))
        .with_to_many("tags", [tag(1), tag(2)]);
    let tracker = tracked(&model, &Resource::blank(&todo), &new);

    let plan = CommandSequencer::new(&model).plan_create(&tracker).unwrap();
    assert!(plan.pre_steps.is_empty());
    assert_eq!(
        plan.insert.statement_text(),
        r#"INSERT INTO "todo_items" ("description", "owner_id") VALUES (@p1, @p2) RETURNING "id""#
    );
    assert_eq!(plan.id_kind, IdKind::Int);
    assert_eq!(plan.deferred.len(), 1);

    let post_steps = plan.deferred.resolve(&Id::Int(42)).unwrap();
    assert_eq!(
        post_steps[0].statement_text(),
        r#"UPDATE "tags" SET "todo_item_id" = @p1 WHERE "id" IN (@p2, @p3)"#
    );
    assert_eq!(post_steps[0].parameters()[0].1, &Value::BigInt(42));
}

#[test]
fn create_with_one_to_one_emits_pre_step() {
    let model = test_support::model();
    let people = model.resource_type("people").unwrap();
    let new = Resource::new("people")
        .with_attribute("firstName", "Ada")
        .with_to_one("account", Some(ResourceIdentity::server("loginAccounts", 4_i64)))
        .with_to_one("passport", Some(ResourceIdentity::server("passports", 8_i64)));
    let tracker = tracked(&model, &Resource::blank(&people), &new);

    let plan = CommandSequencer::new(&model).plan_create(&tracker).unwrap();
    // passport has no current dependent, so only the account holder is released
    assert_eq!(plan.pre_steps.len(), 1);
    assert_eq!(
        plan.pre_steps[0].statement_text(),
        r#"UPDATE "people" SET "account_id" = @p1 WHERE "account_id" = @p2"#
    );
    let post_steps = plan.deferred.resolve(&Id::Int(3)).unwrap();
    assert_eq!(post_steps.len(), 1);
    assert_eq!(post_steps[0].step(), StepKind::SetToOne);
}
