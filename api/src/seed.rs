//! Demo fixtures: two tenants with users, courses, groups, and enrollments.
//! Used by the server `seed` command and the API integration tests.

use chrono::Utc;
use entity::{course_topics, courses, enrollments, group_members, groups, orgs, users};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, DatabaseConnection, DbErr};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SeededRecords {
    pub org_a: orgs::Model,
    pub org_b: orgs::Model,
    pub sysadmin: users::Model,
    pub admin_a: users::Model,
    pub coordinator_a: users::Model,
    pub staff_a: users::Model,
    pub staff_a2: users::Model,
    pub admin_b: users::Model,
    pub staff_b: users::Model,
    pub course_rust_a: courses::Model,
    pub course_soc2_a: courses::Model,
    pub course_onboarding_b: courses::Model,
    pub topic_ownership: course_topics::Model,
    pub topic_borrowing: course_topics::Model,
    pub group_eng_a: groups::Model,
    pub group_sales_b: groups::Model,
    pub enrollment_staff_a: enrollments::Model,
    pub enrollment_staff_a2: enrollments::Model,
}

pub async fn seed_demo(db: &DatabaseConnection) -> Result<SeededRecords, DbErr> {
    let now: DateTimeWithTimeZone = Utc::now().into();

    let org_a = insert_org(db, "Acme Learning", "acme", Some("US-4411"), now).await?;
    let org_b = insert_org(db, "Globex Corp", "globex", None, now).await?;

    let sysadmin = insert_user(db, None, "root@skillforge.test", "Root Admin", "SYSTEM_ADMIN", now).await?;
    let admin_a = insert_user(db, Some(org_a.id), "admin@acme.test", "Ada Admin", "ORG_ADMIN", now).await?;
    let coordinator_a = insert_user(
        db,
        Some(org_a.id),
        "coord@acme.test",
        "Cora Coordinator",
        "COORDINATOR",
        now,
    )
    .await?;
    let staff_a = insert_user(db, Some(org_a.id), "sam@acme.test", "Sam Staff", "STAFF", now).await?;
    let staff_a2 = insert_user(db, Some(org_a.id), "sue@acme.test", "Sue Staff", "STAFF", now).await?;
    let admin_b = insert_user(db, Some(org_b.id), "admin@globex.test", "Bob Admin", "ORG_ADMIN", now).await?;
    let staff_b = insert_user(db, Some(org_b.id), "stan@globex.test", "Stan Staff", "STAFF", now).await?;

    let course_rust_a = insert_course(
        db,
        org_a.id,
        "Rust Fundamentals",
        Some("Systems"),
        courses::Status::Published,
        now,
    )
    .await?;
    let course_soc2_a = insert_course(
        db,
        org_a.id,
        "SOC 2 Awareness",
        Some("Compliance"),
        courses::Status::Published,
        now,
    )
    .await?;
    let course_onboarding_b = insert_course(
        db,
        org_b.id,
        "Globex Onboarding",
        None,
        courses::Status::Draft,
        now,
    )
    .await?;

    let topic_ownership = insert_topic(db, course_rust_a.id, "Ownership", 0, vec![], now).await?;
    let topic_borrowing = insert_topic(
        db,
        course_rust_a.id,
        "Borrowing",
        1,
        vec![topic_ownership.id.to_string()],
        now,
    )
    .await?;

    let group_eng_a = insert_group(db, org_a.id, "Engineering", now).await?;
    let group_sales_b = insert_group(db, org_b.id, "Sales", now).await?;

    group_members::ActiveModel {
        group_id: Set(group_eng_a.id),
        user_id: Set(staff_a.id),
        created_at: Set(now),
    }
    .insert(db)
    .await?;

    let enrollment_staff_a = enrollments::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(staff_a.id),
        course_id: Set(course_rust_a.id),
        status: Set(enrollments::Status::Completed),
        progress: Set(1.0),
        score: Set(Some(80.0)),
        topic_scores: Set(serde_json::json!([
            {"topicId": topic_ownership.id.to_string(), "topicName": "Ownership", "score": 85.0},
            {"topicId": topic_borrowing.id.to_string(), "topicName": "Borrowing", "score": -1.0},
        ])),
        started_at: Set(Some(now)),
        completed_at: Set(Some(now)),
        last_accessed_at: Set(Some(now)),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;

    let enrollment_staff_a2 = enrollments::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(staff_a2.id),
        course_id: Set(course_rust_a.id),
        status: Set(enrollments::Status::InProgress),
        progress: Set(0.4),
        score: Set(None),
        topic_scores: Set(serde_json::json!([])),
        started_at: Set(Some(now)),
        completed_at: Set(None),
        last_accessed_at: Set(Some(now)),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await?;

    Ok(SeededRecords {
        org_a,
        org_b,
        sysadmin,
        admin_a,
        coordinator_a,
        staff_a,
        staff_a2,
        admin_b,
        staff_b,
        course_rust_a,
        course_soc2_a,
        course_onboarding_b,
        topic_ownership,
        topic_borrowing,
        group_eng_a,
        group_sales_b,
        enrollment_staff_a,
        enrollment_staff_a2,
    })
}

async fn insert_org(
    db: &DatabaseConnection,
    name: &str,
    slug: &str,
    tax_id: Option<&str>,
    now: DateTimeWithTimeZone,
) -> Result<orgs::Model, DbErr> {
    orgs::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.into()),
        slug: Set(slug.into()),
        tax_id: Set(tax_id.map(Into::into)),
        domain: Set(Some(format!("{slug}.test"))),
        plan: Set(orgs::Plan::Team),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
}

async fn insert_user(
    db: &DatabaseConnection,
    org_id: Option<Uuid>,
    email: &str,
    display_name: &str,
    roles: &str,
    now: DateTimeWithTimeZone,
) -> Result<users::Model, DbErr> {
    users::ActiveModel {
        id: Set(Uuid::new_v4()),
        org_id: Set(org_id),
        email: Set(email.into()),
        display_name: Set(display_name.into()),
        roles: Set(roles.into()),
        status: Set(users::Status::Active),
        theme: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
}

async fn insert_course(
    db: &DatabaseConnection,
    org_id: Uuid,
    title: &str,
    category: Option<&str>,
    status: courses::Status,
    now: DateTimeWithTimeZone,
) -> Result<courses::Model, DbErr> {
    courses::ActiveModel {
        id: Set(Uuid::new_v4()),
        org_id: Set(org_id),
        title: Set(title.into()),
        description: Set(None),
        category: Set(category.map(Into::into)),
        level: Set(courses::Level::Beginner),
        status: Set(status),
        duration_minutes: Set(Some(120)),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
}

async fn insert_topic(
    db: &DatabaseConnection,
    course_id: Uuid,
    name: &str,
    position: i32,
    dependencies: Vec<String>,
    now: DateTimeWithTimeZone,
) -> Result<course_topics::Model, DbErr> {
    course_topics::ActiveModel {
        id: Set(Uuid::new_v4()),
        course_id: Set(course_id),
        name: Set(name.into()),
        summary: Set(None),
        position: Set(position),
        dependencies: Set(serde_json::json!(dependencies)),
        duration_minutes: Set(Some(30)),
        created_at: Set(now),
    }
    .insert(db)
    .await
}

async fn insert_group(
    db: &DatabaseConnection,
    org_id: Uuid,
    name: &str,
    now: DateTimeWithTimeZone,
) -> Result<groups::Model, DbErr> {
    groups::ActiveModel {
        id: Set(Uuid::new_v4()),
        org_id: Set(org_id),
        name: Set(name.into()),
        description: Set(None),
        created_at: Set(now),
    }
    .insert(db)
    .await
}
