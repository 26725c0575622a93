mod common;

use api::auth::{Principal, RequestContext};
use common::{data, error_code, exec_anon, exec_as, exec_with_ctx, setup};
use serde_json::json;

const COURSES: &str = r#"
    query Courses($org: ID) {
        courses(organizationId: $org) { id title organizationId }
    }
"#;

#[tokio::test]
async fn unauthenticated_callers_are_rejected_first() {
    let env = setup().await;
    let resp = exec_anon(&env, "{ me { roles } }", json!({})).await;
    assert_eq!(error_code(&resp).as_deref(), Some("UNAUTHENTICATED"));

    let resp = exec_anon(&env, COURSES, json!({})).await;
    assert_eq!(error_code(&resp).as_deref(), Some("UNAUTHENTICATED"));
}

#[tokio::test]
async fn cross_tenant_course_listing_is_forbidden() {
    let env = setup().await;
    let resp = exec_as(
        &env,
        &env.seeded.coordinator_a,
        COURSES,
        json!({ "org": env.seeded.org_b.id }),
    )
    .await;
    assert_eq!(error_code(&resp).as_deref(), Some("FORBIDDEN"));
}

#[tokio::test]
async fn course_listing_defaults_to_the_callers_org() {
    let env = setup().await;
    let resp = exec_as(&env, &env.seeded.coordinator_a, COURSES, json!({})).await;
    let body = data(resp);
    let titles: Vec<&str> = body["courses"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Rust Fundamentals", "SOC 2 Awareness"]);
}

#[tokio::test]
async fn empty_org_param_is_bad_input_not_forbidden() {
    let env = setup().await;
    let resp = exec_as(
        &env,
        &env.seeded.coordinator_a,
        COURSES,
        json!({ "org": "" }),
    )
    .await;
    assert_eq!(error_code(&resp).as_deref(), Some("BAD_INPUT"));
}

#[tokio::test]
async fn course_search_filters_by_title() {
    let env = setup().await;
    let resp = exec_as(
        &env,
        &env.seeded.staff_a,
        r#"query { courses(search: "rust") { title } }"#,
        json!({}),
    )
    .await;
    let body = data(resp);
    let titles = body["courses"].as_array().unwrap();
    assert_eq!(titles.len(), 1);
    assert_eq!(titles[0]["title"], "Rust Fundamentals");
}

#[tokio::test]
async fn system_admin_lists_all_orgs_sorted_by_name() {
    let env = setup().await;
    let resp = exec_as(
        &env,
        &env.seeded.sysadmin,
        "{ organizations { name } }",
        json!({}),
    )
    .await;
    let body = data(resp);
    let names: Vec<&str> = body["organizations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Acme Learning", "Globex Corp"]);
}

#[tokio::test]
async fn org_members_cannot_list_all_organizations() {
    let env = setup().await;
    let resp = exec_as(
        &env,
        &env.seeded.admin_a,
        "{ organizations { name } }",
        json!({}),
    )
    .await;
    assert_eq!(error_code(&resp).as_deref(), Some("FORBIDDEN"));
}

#[tokio::test]
async fn system_admins_are_not_tenant_members() {
    let env = setup().await;
    let resp = exec_as(&env, &env.seeded.sysadmin, COURSES, json!({})).await;
    assert_eq!(error_code(&resp).as_deref(), Some("FORBIDDEN"));
}

#[tokio::test]
async fn single_course_reads_enforce_ownership_of_the_fetched_row() {
    let env = setup().await;
    let query = r#"query Course($id: ID!) { course(id: $id) { id title } }"#;

    // Exists but belongs to another tenant.
    let resp = exec_as(
        &env,
        &env.seeded.staff_b,
        query,
        json!({ "id": env.seeded.course_rust_a.id }),
    )
    .await;
    assert_eq!(error_code(&resp).as_deref(), Some("FORBIDDEN"));

    // Does not exist at all.
    let resp = exec_as(
        &env,
        &env.seeded.staff_b,
        query,
        json!({ "id": uuid::Uuid::new_v4() }),
    )
    .await;
    assert_eq!(error_code(&resp).as_deref(), Some("NOT_FOUND"));

    // System administrators bypass isolation.
    let resp = exec_as(
        &env,
        &env.seeded.sysadmin,
        query,
        json!({ "id": env.seeded.course_rust_a.id }),
    )
    .await;
    assert_eq!(data(resp)["course"]["title"], "Rust Fundamentals");
}

#[tokio::test]
async fn users_can_read_their_own_record_but_not_other_tenants() {
    let env = setup().await;
    let query = r#"query User($id: ID!) { user(id: $id) { id email } }"#;

    let resp = exec_as(
        &env,
        &env.seeded.staff_a,
        query,
        json!({ "id": env.seeded.staff_a.id }),
    )
    .await;
    assert_eq!(data(resp)["user"]["email"], "sam@acme.test");

    let resp = exec_as(
        &env,
        &env.seeded.staff_a,
        query,
        json!({ "id": env.seeded.admin_a.id }),
    )
    .await;
    assert_eq!(data(resp)["user"]["email"], "admin@acme.test");

    let resp = exec_as(
        &env,
        &env.seeded.staff_a,
        query,
        json!({ "id": env.seeded.staff_b.id }),
    )
    .await;
    assert_eq!(error_code(&resp).as_deref(), Some("FORBIDDEN"));

    let resp = exec_as(
        &env,
        &env.seeded.sysadmin,
        query,
        json!({ "id": env.seeded.staff_b.id }),
    )
    .await;
    assert_eq!(data(resp)["user"]["email"], "stan@globex.test");
}

#[tokio::test]
async fn organization_lookup_requires_id_or_slug() {
    let env = setup().await;
    let query = r#"query Org($id: ID, $slug: String) { organization(id: $id, slug: $slug) { slug } }"#;

    let resp = exec_as(&env, &env.seeded.admin_a, query, json!({})).await;
    assert_eq!(error_code(&resp).as_deref(), Some("BAD_INPUT"));

    let resp = exec_as(&env, &env.seeded.admin_a, query, json!({ "slug": "acme" })).await;
    assert_eq!(data(resp)["organization"]["slug"], "acme");

    let resp = exec_as(
        &env,
        &env.seeded.admin_a,
        query,
        json!({ "id": env.seeded.org_b.id }),
    )
    .await;
    assert_eq!(error_code(&resp).as_deref(), Some("FORBIDDEN"));
}

#[tokio::test]
async fn role_guard_gates_the_user_directory() {
    let env = setup().await;
    let query = "{ users { email } }";

    let resp = exec_as(&env, &env.seeded.staff_a, query, json!({})).await;
    assert_eq!(error_code(&resp).as_deref(), Some("FORBIDDEN"));

    let resp = exec_as(&env, &env.seeded.admin_a, query, json!({})).await;
    let body = data(resp);
    let emails: Vec<&str> = body["users"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["email"].as_str().unwrap())
        .collect();
    assert_eq!(
        emails,
        vec![
            "admin@acme.test",
            "coord@acme.test",
            "sam@acme.test",
            "sue@acme.test"
        ]
    );
}

#[tokio::test]
async fn impersonation_scopes_guards_to_the_acting_principal() {
    let env = setup().await;
    let ctx = RequestContext::impersonating(
        Principal::from_user(&env.seeded.sysadmin),
        Principal::from_user(&env.seeded.staff_a),
    );

    let resp = exec_with_ctx(&env, ctx.clone(), COURSES, json!({})).await;
    let body = data(resp);
    assert_eq!(body["courses"].as_array().unwrap().len(), 2);

    let resp = exec_with_ctx(&env, ctx, "{ me { impersonated roles } }", json!({})).await;
    let body = data(resp);
    assert_eq!(body["me"]["impersonated"], true);
    assert_eq!(body["me"]["roles"], json!(["STAFF"]));
}
