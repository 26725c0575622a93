use std::sync::Arc;

use api::auth::{Principal, RequestContext};
use api::metrics::MetricsCache;
use api::schema::{build_schema, AppSchema, MutationRoot, QueryRoot};
use api::seed::{seed_demo, SeededRecords};
use async_graphql::{EmptySubscription, Request, Response, Schema, Variables};
use entity::users;
use sea_orm::{ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, Statement};
use serde_json::Value;

pub struct TestEnv {
    pub db: Arc<DatabaseConnection>,
    pub schema: Schema<QueryRoot, MutationRoot, EmptySubscription>,
    pub seeded: SeededRecords,
}

pub async fn setup() -> TestEnv {
    let conn = Database::connect("sqlite::memory:").await.unwrap();
    bootstrap_sqlite(&conn).await;
    let seeded = seed_demo(&conn).await.unwrap();
    let db = Arc::new(conn);
    let AppSchema(schema) = build_schema(db.clone());
    TestEnv { db, schema, seeded }
}

pub async fn exec_anon(env: &TestEnv, query: &str, vars: Value) -> Response {
    env.schema
        .execute(
            Request::new(query)
                .variables(Variables::from_json(vars))
                .data(MetricsCache::default()),
        )
        .await
}

pub async fn exec_as(env: &TestEnv, user: &users::Model, query: &str, vars: Value) -> Response {
    let ctx = RequestContext::for_principal(Principal::from_user(user));
    exec_with_ctx(env, ctx, query, vars).await
}

pub async fn exec_with_ctx(
    env: &TestEnv,
    ctx: RequestContext,
    query: &str,
    vars: Value,
) -> Response {
    env.schema
        .execute(
            Request::new(query)
                .variables(Variables::from_json(vars))
                .data(ctx)
                .data(MetricsCache::default()),
        )
        .await
}

pub fn error_code(resp: &Response) -> Option<String> {
    let err = resp.errors.first()?;
    let ext = err.extensions.as_ref()?;
    match ext.get("code") {
        Some(async_graphql::Value::String(code)) => Some(code.clone()),
        _ => None,
    }
}

pub fn data(resp: Response) -> Value {
    assert!(
        resp.errors.is_empty(),
        "unexpected errors: {:?}",
        resp.errors
    );
    resp.data.into_json().unwrap()
}

async fn bootstrap_sqlite(db: &DatabaseConnection) {
    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        "PRAGMA foreign_keys = ON;",
    ))
    .await
    .unwrap();

    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        r#"
        CREATE TABLE orgs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            slug TEXT NOT NULL UNIQUE,
            tax_id TEXT,
            domain TEXT,
            plan TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    ))
    .await
    .unwrap();

    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        r#"
        CREATE TABLE users (
            id TEXT PRIMARY KEY,
            org_id TEXT,
            email TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            roles TEXT NOT NULL,
            status TEXT NOT NULL,
            theme TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(org_id) REFERENCES orgs(id)
        );
        "#,
    ))
    .await
    .unwrap();

    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        r#"
        CREATE TABLE "groups" (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(org_id) REFERENCES orgs(id)
        );
        "#,
    ))
    .await
    .unwrap();

    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        r#"
        CREATE TABLE group_members (
            group_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (group_id, user_id),
            FOREIGN KEY(group_id) REFERENCES "groups"(id) ON DELETE CASCADE,
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE
        );
        "#,
    ))
    .await
    .unwrap();

    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        r#"
        CREATE TABLE courses (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            category TEXT,
            level TEXT NOT NULL,
            status TEXT NOT NULL,
            duration_minutes INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(org_id) REFERENCES orgs(id)
        );
        "#,
    ))
    .await
    .unwrap();

    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        r#"
        CREATE TABLE course_topics (
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            name TEXT NOT NULL,
            summary TEXT,
            position INTEGER NOT NULL,
            dependencies TEXT NOT NULL DEFAULT '[]',
            duration_minutes INTEGER,
            created_at TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id) ON DELETE CASCADE
        );
        "#,
    ))
    .await
    .unwrap();

    db.execute(Statement::from_string(
        DatabaseBackend::Sqlite,
        r#"
        CREATE TABLE enrollments (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            status TEXT NOT NULL,
            progress REAL NOT NULL,
            score REAL,
            topic_scores TEXT NOT NULL DEFAULT '[]',
            started_at TEXT,
            completed_at TEXT,
            last_accessed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (user_id, course_id),
            FOREIGN KEY(user_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY(course_id) REFERENCES courses(id) ON DELETE CASCADE
        );
        "#,
    ))
    .await
    .unwrap();
}
