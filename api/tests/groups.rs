mod common;

use common::{data, error_code, exec_as, setup};
use entity::group_members;
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;
use uuid::Uuid;

const ASSIGN: &str = r#"
    mutation Assign($group: ID!, $user: ID!) {
        assignUserToGroup(groupId: $group, userId: $user) { groupId userId }
    }
"#;

const REMOVE: &str = r#"
    mutation Remove($group: ID!, $user: ID!) {
        removeUserFromGroup(groupId: $group, userId: $user)
    }
"#;

async fn membership_count(env: &common::TestEnv) -> u64 {
    group_members::Entity::find()
        .count(env.db.as_ref())
        .await
        .unwrap()
}

#[tokio::test]
async fn cross_org_assignment_is_forbidden_and_writes_nothing() {
    let env = setup().await;
    let before = membership_count(&env).await;
    let resp = exec_as(
        &env,
        &env.seeded.admin_a,
        ASSIGN,
        json!({ "group": env.seeded.group_eng_a.id, "user": env.seeded.staff_b.id }),
    )
    .await;
    assert_eq!(error_code(&resp).as_deref(), Some("FORBIDDEN"));
    assert_eq!(membership_count(&env).await, before);
}

#[tokio::test]
async fn removing_a_missing_membership_returns_false() {
    let env = setup().await;
    let body = data(
        exec_as(
            &env,
            &env.seeded.admin_a,
            REMOVE,
            json!({ "group": env.seeded.group_eng_a.id, "user": env.seeded.staff_a2.id }),
        )
        .await,
    );
    assert_eq!(body["removeUserFromGroup"], false);
}

#[tokio::test]
async fn assignment_is_find_or_create() {
    let env = setup().await;
    // staff_a is already a member through the seed fixtures.
    let before = membership_count(&env).await;
    let body = data(
        exec_as(
            &env,
            &env.seeded.admin_a,
            ASSIGN,
            json!({ "group": env.seeded.group_eng_a.id, "user": env.seeded.staff_a.id }),
        )
        .await,
    );
    assert_eq!(
        body["assignUserToGroup"]["userId"],
        env.seeded.staff_a.id.to_string()
    );
    assert_eq!(membership_count(&env).await, before);
}

#[tokio::test]
async fn assignment_then_removal_round_trips() {
    let env = setup().await;
    let vars = json!({ "group": env.seeded.group_eng_a.id, "user": env.seeded.staff_a2.id });

    data(exec_as(&env, &env.seeded.admin_a, ASSIGN, vars.clone()).await);
    let body = data(exec_as(&env, &env.seeded.admin_a, REMOVE, vars.clone()).await);
    assert_eq!(body["removeUserFromGroup"], true);

    // Second removal finds nothing.
    let body = data(exec_as(&env, &env.seeded.admin_a, REMOVE, vars).await);
    assert_eq!(body["removeUserFromGroup"], false);
}

#[tokio::test]
async fn group_membership_is_org_admin_only() {
    let env = setup().await;
    let vars = json!({ "group": env.seeded.group_eng_a.id, "user": env.seeded.staff_a2.id });

    let resp = exec_as(&env, &env.seeded.coordinator_a, ASSIGN, vars.clone()).await;
    assert_eq!(error_code(&resp).as_deref(), Some("FORBIDDEN"));

    let resp = exec_as(&env, &env.seeded.staff_a, REMOVE, vars).await;
    assert_eq!(error_code(&resp).as_deref(), Some("FORBIDDEN"));
}

#[tokio::test]
async fn foreign_group_is_forbidden_before_user_lookup() {
    let env = setup().await;
    let resp = exec_as(
        &env,
        &env.seeded.admin_b,
        ASSIGN,
        json!({ "group": env.seeded.group_eng_a.id, "user": env.seeded.staff_b.id }),
    )
    .await;
    assert_eq!(error_code(&resp).as_deref(), Some("FORBIDDEN"));
}

#[tokio::test]
async fn unknown_group_is_not_found() {
    let env = setup().await;
    let resp = exec_as(
        &env,
        &env.seeded.admin_a,
        ASSIGN,
        json!({ "group": Uuid::new_v4(), "user": env.seeded.staff_a.id }),
    )
    .await;
    assert_eq!(error_code(&resp).as_deref(), Some("NOT_FOUND"));
}

#[tokio::test]
async fn group_listing_stays_within_the_tenant() {
    let env = setup().await;
    let body = data(
        exec_as(&env, &env.seeded.staff_a, "{ groups { name } }", json!({})).await,
    );
    let names: Vec<&str> = body["groups"]
        .as_array()
        .unwrap()
        .iter()
        .map(|g| g["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Engineering"]);
}

#[tokio::test]
async fn group_creation_enforces_isolation_before_insert() {
    let env = setup().await;
    let mutation = r#"
        mutation Create($input: NewGroupInput!) {
            createGroup(input: $input) { name organizationId }
        }
    "#;

    let resp = exec_as(
        &env,
        &env.seeded.admin_a,
        mutation,
        json!({ "input": { "name": "Shadow", "organizationId": env.seeded.org_b.id }}),
    )
    .await;
    assert_eq!(error_code(&resp).as_deref(), Some("FORBIDDEN"));

    let body = data(
        exec_as(
            &env,
            &env.seeded.admin_a,
            mutation,
            json!({ "input": { "name": "Platform" }}),
        )
        .await,
    );
    assert_eq!(
        body["createGroup"]["organizationId"],
        env.seeded.org_a.id.to_string()
    );
}
