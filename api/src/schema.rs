use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_graphql::{
    Context, EmptySubscription, Enum, Error, ErrorExtensions, InputObject, Object, Schema,
    SimpleObject, ID,
};
use chrono::{DateTime, Utc};
use entity::{course_topics, courses, enrollments, group_members, groups, orgs, users};
use platform_api::ApiError;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, Func};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, SqlErr,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::auth::{self, Member, Principal, RequestContext, Role};
use crate::metrics::{self, CourseMetrics, MetricsCache};

pub type SchemaType = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub struct AppSchema(pub SchemaType);

pub fn build_schema(db: Arc<DatabaseConnection>) -> AppSchema {
    let schema = Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(db)
        .finish();
    AppSchema(schema)
}

/// SDL snapshot; no request data is attached.
pub fn schema_sdl() -> String {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .finish()
        .sdl()
}

pub struct QueryRoot;
pub struct MutationRoot;

/// Roles allowed to manage courses, groups, and enrollments within a tenant.
const MANAGER_ROLES: &[Role] = &[Role::OrgAdmin, Role::Coordinator];

#[Object]
impl QueryRoot {
    async fn me(&self, ctx: &Context<'_>) -> async_graphql::Result<MePayload> {
        let rc = request_context(ctx);
        let viewer = auth::require_authenticated(&rc)
            .cloned()
            .map_err(|e| e.extend())?;
        let db = database(ctx)?;
        let record = users::Entity::find_by_id(viewer.id)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| not_found("user"))?;
        Ok(MePayload {
            user: UserNode::from(record),
            roles: viewer.roles.labels(),
            impersonated: rc.is_impersonated(),
        })
    }

    /// All tenants, system administrators only.
    async fn organizations(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<OrganizationNode>> {
        guard_system_admin(ctx)?;
        let db = database(ctx)?;
        let records = orgs::Entity::find()
            .order_by_asc(orgs::Column::Name)
            .all(db.as_ref())
            .await
            .map_err(db_error)?;
        Ok(records.into_iter().map(OrganizationNode::from).collect())
    }

    async fn organization(
        &self,
        ctx: &Context<'_>,
        id: Option<ID>,
        slug: Option<String>,
    ) -> async_graphql::Result<OrganizationNode> {
        let rc = request_context(ctx);
        let viewer = auth::require_authenticated(&rc)
            .cloned()
            .map_err(|e| e.extend())?;
        let db = database(ctx)?;
        let record = match (id, slug) {
            (Some(id), _) => {
                let org_id = parse_uuid(&id)?;
                orgs::Entity::find_by_id(org_id).one(db.as_ref()).await
            }
            (None, Some(slug)) => {
                orgs::Entity::find()
                    .filter(orgs::Column::Slug.eq(slug))
                    .one(db.as_ref())
                    .await
            }
            (None, None) => return Err(bad_input("either id or slug is required")),
        }
        .map_err(db_error)?
        .ok_or_else(|| not_found("organization"))?;
        if !viewer.is_system_admin() {
            let member = guard_member(ctx)?;
            auth::ensure_same_org(&member, Some(record.id)).map_err(|e| e.extend())?;
        }
        Ok(record.into())
    }

    async fn courses(
        &self,
        ctx: &Context<'_>,
        organization_id: Option<ID>,
        search: Option<String>,
    ) -> async_graphql::Result<Vec<CourseNode>> {
        let member = guard_member(ctx)?;
        let org_id = effective_org_id(&member, organization_id.as_ref())?;
        let db = database(ctx)?;
        let mut query = courses::Entity::find().filter(courses::Column::OrgId.eq(org_id));
        if let Some(filter) = sanitize_optional_filter(search) {
            let pattern = format!("%{}%", filter.to_lowercase());
            let title_expr = Expr::expr(Func::lower(Expr::col(courses::Column::Title)));
            let category_expr = Expr::expr(Func::lower(Expr::col(courses::Column::Category)));
            query = query.filter(
                Condition::any()
                    .add(title_expr.like(pattern.clone()))
                    .add(category_expr.like(pattern)),
            );
        }
        let records = query
            .order_by_asc(courses::Column::Title)
            .all(db.as_ref())
            .await
            .map_err(db_error)?;
        Ok(records.into_iter().map(CourseNode::from).collect())
    }

    async fn course(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<CourseNode> {
        let rc = request_context(ctx);
        let viewer = auth::require_authenticated(&rc)
            .cloned()
            .map_err(|e| e.extend())?;
        let db = database(ctx)?;
        let course_id = parse_uuid(&id)?;
        // Existence first, then ownership of the fetched row.
        let record = courses::Entity::find_by_id(course_id)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| not_found("course"))?;
        if !viewer.is_system_admin() {
            let member = guard_member(ctx)?;
            auth::ensure_same_org(&member, Some(record.org_id)).map_err(|e| e.extend())?;
        }
        Ok(record.into())
    }

    async fn course_topics(
        &self,
        ctx: &Context<'_>,
        course_id: ID,
    ) -> async_graphql::Result<Vec<CourseTopicNode>> {
        let member = guard_member(ctx)?;
        let db = database(ctx)?;
        let course_id = parse_uuid(&course_id)?;
        let course = courses::Entity::find_by_id(course_id)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| not_found("course"))?;
        auth::ensure_same_org(&member, Some(course.org_id)).map_err(|e| e.extend())?;
        let records = course_topics::Entity::find()
            .filter(course_topics::Column::CourseId.eq(course_id))
            .order_by_asc(course_topics::Column::Position)
            .all(db.as_ref())
            .await
            .map_err(db_error)?;
        Ok(records.into_iter().map(CourseTopicNode::from).collect())
    }

    async fn users(
        &self,
        ctx: &Context<'_>,
        organization_id: Option<ID>,
    ) -> async_graphql::Result<Vec<UserNode>> {
        let member = guard_role(ctx, MANAGER_ROLES)?;
        let org_id = effective_org_id(&member, organization_id.as_ref())?;
        let db = database(ctx)?;
        let records = users::Entity::find()
            .filter(users::Column::OrgId.eq(org_id))
            .order_by_asc(users::Column::Email)
            .all(db.as_ref())
            .await
            .map_err(db_error)?;
        Ok(records.into_iter().map(UserNode::from).collect())
    }

    async fn user(&self, ctx: &Context<'_>, id: ID) -> async_graphql::Result<UserNode> {
        let rc = request_context(ctx);
        let viewer = auth::require_authenticated(&rc)
            .cloned()
            .map_err(|e| e.extend())?;
        let db = database(ctx)?;
        let user_id = parse_uuid(&id)?;
        let record = users::Entity::find_by_id(user_id)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| not_found("user"))?;
        // Reading your own record and system administrators bypass isolation.
        if viewer.id != record.id && !viewer.is_system_admin() {
            let member = guard_member(ctx)?;
            ensure_member_owns(&member, record.org_id)?;
        }
        Ok(record.into())
    }

    async fn groups(
        &self,
        ctx: &Context<'_>,
        organization_id: Option<ID>,
    ) -> async_graphql::Result<Vec<GroupNode>> {
        let member = guard_member(ctx)?;
        let org_id = effective_org_id(&member, organization_id.as_ref())?;
        let db = database(ctx)?;
        let records = groups::Entity::find()
            .filter(groups::Column::OrgId.eq(org_id))
            .order_by_asc(groups::Column::Name)
            .all(db.as_ref())
            .await
            .map_err(db_error)?;
        Ok(records.into_iter().map(GroupNode::from).collect())
    }

    async fn enrollments(
        &self,
        ctx: &Context<'_>,
        organization_id: Option<ID>,
        course_id: Option<ID>,
        user_id: Option<ID>,
    ) -> async_graphql::Result<Vec<EnrollmentNode>> {
        let member = guard_role(ctx, MANAGER_ROLES)?;
        let org_id = effective_org_id(&member, organization_id.as_ref())?;
        let db = database(ctx)?;
        let course_ids = match course_id {
            Some(id) => {
                let course_id = parse_uuid(&id)?;
                let course = courses::Entity::find_by_id(course_id)
                    .one(db.as_ref())
                    .await
                    .map_err(db_error)?
                    .ok_or_else(|| not_found("course"))?;
                auth::ensure_same_org(&member, Some(course.org_id)).map_err(|e| e.extend())?;
                vec![course.id]
            }
            None => org_course_ids(db.as_ref(), org_id).await?,
        };
        if course_ids.is_empty() {
            return Ok(vec![]);
        }
        let mut query =
            enrollments::Entity::find().filter(enrollments::Column::CourseId.is_in(course_ids));
        if let Some(id) = user_id {
            query = query.filter(enrollments::Column::UserId.eq(parse_uuid(&id)?));
        }
        let records = query
            .order_by_asc(enrollments::Column::CreatedAt)
            .all(db.as_ref())
            .await
            .map_err(db_error)?;
        Ok(records.into_iter().map(EnrollmentNode::from).collect())
    }

    #[instrument(name = "graphql.organizationDashboard", skip_all)]
    async fn organization_dashboard(
        &self,
        ctx: &Context<'_>,
        organization_id: ID,
    ) -> async_graphql::Result<OrganizationDashboard> {
        let member = guard_role(ctx, MANAGER_ROLES)?;
        let org_id = effective_org_id(&member, Some(&organization_id))?;
        let db = database(ctx)?;
        let organization = orgs::Entity::find_by_id(org_id)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| not_found("organization"))?;
        let course_records = courses::Entity::find()
            .filter(courses::Column::OrgId.eq(org_id))
            .order_by_asc(courses::Column::Title)
            .all(db.as_ref())
            .await
            .map_err(db_error)?;
        let by_course = enrollments_by_course(
            db.as_ref(),
            course_records.iter().map(|c| c.id).collect(),
        )
        .await?;
        let empty: Vec<enrollments::Model> = Vec::new();
        let mut rows = Vec::with_capacity(course_records.len());
        let mut total_enrollments: i64 = 0;
        let mut averages = Vec::with_capacity(course_records.len());
        for course in course_records {
            let enrolled = by_course.get(&course.id).unwrap_or(&empty);
            let computed = cached_course_metrics(ctx, course.id, enrolled);
            total_enrollments += computed.enrolled_count as i64;
            averages.push(computed.average_score);
            rows.push(CourseDashboardRow {
                course: course.into(),
                metrics: computed.into(),
            });
        }
        let total_users = users::Entity::find()
            .filter(users::Column::OrgId.eq(org_id))
            .count(db.as_ref())
            .await
            .map_err(db_error)? as i64;
        Ok(OrganizationDashboard {
            organization: organization.into(),
            total_users,
            total_courses: rows.len() as i64,
            total_enrollments,
            average_score: metrics::org_average_score(averages),
            courses: rows,
        })
    }

    #[instrument(name = "graphql.employeeCourseScores", skip_all)]
    async fn employee_course_scores(
        &self,
        ctx: &Context<'_>,
        organization_id: ID,
        course_id: Option<ID>,
    ) -> async_graphql::Result<Vec<EmployeeCourseScore>> {
        let member = guard_role(ctx, MANAGER_ROLES)?;
        let org_id = effective_org_id(&member, Some(&organization_id))?;
        let db = database(ctx)?;
        let course_records = match course_id {
            Some(id) => {
                let course_id = parse_uuid(&id)?;
                let course = courses::Entity::find_by_id(course_id)
                    .one(db.as_ref())
                    .await
                    .map_err(db_error)?
                    .ok_or_else(|| not_found("course"))?;
                auth::ensure_same_org(&member, Some(course.org_id)).map_err(|e| e.extend())?;
                vec![course]
            }
            None => {
                courses::Entity::find()
                    .filter(courses::Column::OrgId.eq(org_id))
                    .all(db.as_ref())
                    .await
                    .map_err(db_error)?
            }
        };
        if course_records.is_empty() {
            return Ok(vec![]);
        }
        let titles: HashMap<Uuid, String> = course_records
            .iter()
            .map(|c| (c.id, c.title.clone()))
            .collect();
        let rows = enrollments::Entity::find()
            .filter(
                enrollments::Column::CourseId.is_in(titles.keys().copied().collect::<Vec<_>>()),
            )
            .find_also_related(users::Entity)
            .all(db.as_ref())
            .await
            .map_err(db_error)?;
        let mut report = Vec::with_capacity(rows.len());
        for (enrollment, user) in rows {
            let Some(user) = user else {
                continue;
            };
            report.push(EmployeeCourseScore {
                user_id: ID::from(user.id.to_string()),
                user_display_name: user.display_name,
                user_email: user.email,
                course_id: ID::from(enrollment.course_id.to_string()),
                course_title: titles
                    .get(&enrollment.course_id)
                    .cloned()
                    .unwrap_or_default(),
                status: enrollment.status.into(),
                progress: enrollment.progress,
                score: enrollment.score,
                topic_scores: topic_scores_from_json(&enrollment.topic_scores),
            });
        }
        Ok(report)
    }
}

#[Object]
impl MutationRoot {
    async fn create_organization(
        &self,
        ctx: &Context<'_>,
        input: NewOrganizationInput,
    ) -> async_graphql::Result<OrganizationNode> {
        guard_system_admin(ctx)?;
        let db = database(ctx)?;
        let name = required_text("name", &input.name)?;
        let slug = required_text("slug", &input.slug)?.to_lowercase();
        let existing = orgs::Entity::find()
            .filter(orgs::Column::Slug.eq(slug.clone()))
            .one(db.as_ref())
            .await
            .map_err(db_error)?;
        if existing.is_some() {
            return Err(bad_input("slug already in use"));
        }
        let now: DateTimeWithTimeZone = Utc::now().into();
        let record = orgs::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name),
            slug: Set(slug),
            tax_id: Set(input.tax_id),
            domain: Set(input.domain),
            plan: Set(input.plan.unwrap_or(PlanTier::Free).into()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db.as_ref())
        .await
        .map_err(db_error)?;
        Ok(record.into())
    }

    async fn create_course(
        &self,
        ctx: &Context<'_>,
        input: NewCourseInput,
    ) -> async_graphql::Result<CourseNode> {
        let member = guard_role(ctx, MANAGER_ROLES)?;
        // Isolation runs on the resolved org before anything is written, so
        // an explicit organizationId cannot tag the course into another tenant.
        let org_id = effective_org_id(&member, input.organization_id.as_ref())?;
        let db = database(ctx)?;
        let title = required_text("title", &input.title)?;
        let now: DateTimeWithTimeZone = Utc::now().into();
        let record = courses::ActiveModel {
            id: Set(Uuid::new_v4()),
            org_id: Set(org_id),
            title: Set(title),
            description: Set(input.description),
            category: Set(input.category),
            level: Set(input.level.unwrap_or(CourseLevel::Beginner).into()),
            status: Set(input.status.unwrap_or(CourseStatus::Draft).into()),
            duration_minutes: Set(input.duration_minutes),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db.as_ref())
        .await
        .map_err(db_error)?;
        Ok(record.into())
    }

    async fn add_course_topic(
        &self,
        ctx: &Context<'_>,
        input: NewCourseTopicInput,
    ) -> async_graphql::Result<CourseTopicNode> {
        let member = guard_role(ctx, MANAGER_ROLES)?;
        let db = database(ctx)?;
        let course_id = parse_uuid(&input.course_id)?;
        let course = courses::Entity::find_by_id(course_id)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| not_found("course"))?;
        auth::ensure_same_org(&member, Some(course.org_id)).map_err(|e| e.extend())?;
        let name = required_text("name", &input.name)?;
        let existing = course_topics::Entity::find()
            .filter(course_topics::Column::CourseId.eq(course_id))
            .order_by_asc(course_topics::Column::Position)
            .all(db.as_ref())
            .await
            .map_err(db_error)?;
        let topic_id = Uuid::new_v4();
        let dependencies = validate_dependencies(topic_id, &input.dependencies, &existing)?;
        let position = input
            .position
            .unwrap_or_else(|| existing.iter().map(|t| t.position + 1).max().unwrap_or(0));
        let record = course_topics::ActiveModel {
            id: Set(topic_id),
            course_id: Set(course_id),
            name: Set(name),
            summary: Set(input.summary),
            position: Set(position),
            dependencies: Set(serde_json::json!(dependencies)),
            duration_minutes: Set(input.duration_minutes),
            created_at: Set(Utc::now().into()),
        }
        .insert(db.as_ref())
        .await
        .map_err(db_error)?;
        Ok(record.into())
    }

    async fn enroll_user(
        &self,
        ctx: &Context<'_>,
        input: EnrollUserInput,
    ) -> async_graphql::Result<EnrollmentNode> {
        let member = guard_role(ctx, MANAGER_ROLES)?;
        let db = database(ctx)?;
        let user_id = parse_uuid(&input.user_id)?;
        let user = users::Entity::find_by_id(user_id)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| not_found("user"))?;
        ensure_member_owns(&member, user.org_id)?;
        let course_id = parse_uuid(&input.course_id)?;
        let course = courses::Entity::find_by_id(course_id)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| not_found("course"))?;
        auth::ensure_same_org(&member, Some(course.org_id)).map_err(|e| e.extend())?;
        // Cross-entity invariant, independent of the caller's own tenant.
        if user.org_id != Some(course.org_id) {
            return Err(forbidden("cross-organization enrollment"));
        }
        if let Some(existing) = find_enrollment(db.as_ref(), user.id, course.id).await? {
            return Ok(existing.into());
        }
        let status: enrollments::Status = input
            .status
            .unwrap_or(EnrollmentStatus::NotStarted)
            .into();
        let now: DateTimeWithTimeZone = Utc::now().into();
        let started_at = if status == enrollments::Status::NotStarted {
            None
        } else {
            Some(now)
        };
        let completed_at = if status == enrollments::Status::Completed {
            Some(now)
        } else {
            None
        };
        let insert = enrollments::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.id),
            course_id: Set(course.id),
            status: Set(status),
            progress: Set(clamp_progress(input.progress.unwrap_or(0.0))),
            score: Set(None),
            topic_scores: Set(serde_json::json!([])),
            started_at: Set(started_at),
            completed_at: Set(completed_at),
            last_accessed_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db.as_ref())
        .await;
        let record = match insert {
            Ok(record) => record,
            // Lost the find-or-create race: the unique (user, course) index
            // fired, so the winner's row is read back instead of erroring.
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                find_enrollment(db.as_ref(), user.id, course.id)
                    .await?
                    .ok_or_else(|| db_error(err))?
            }
            Err(err) => return Err(db_error(err)),
        };
        Ok(record.into())
    }

    async fn update_enrollment_score(
        &self,
        ctx: &Context<'_>,
        input: UpdateEnrollmentScoreInput,
    ) -> async_graphql::Result<EnrollmentNode> {
        let member = guard_role(ctx, MANAGER_ROLES)?;
        let db = database(ctx)?;
        let enrollment_id = parse_uuid(&input.enrollment_id)?;
        let (enrollment, course) = enrollments::Entity::find_by_id(enrollment_id)
            .find_also_related(courses::Entity)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| not_found("enrollment"))?;
        let owning_org = match course {
            Some(course) => course.org_id,
            // Relation not loaded by the driver; resolve the owner directly.
            None => {
                courses::Entity::find_by_id(enrollment.course_id)
                    .one(db.as_ref())
                    .await
                    .map_err(db_error)?
                    .ok_or_else(|| not_found("course"))?
                    .org_id
            }
        };
        auth::ensure_same_org(&member, Some(owning_org)).map_err(|e| e.extend())?;
        let now: DateTimeWithTimeZone = Utc::now().into();
        let mut active: enrollments::ActiveModel = enrollment.into();
        if let Some(progress) = input.progress {
            active.progress = Set(clamp_progress(progress));
        }
        if let Some(score) = input.score {
            active.score = Set(Some(score));
        }
        if let Some(status) = input.status {
            let status: enrollments::Status = status.into();
            if status == enrollments::Status::Completed {
                active.completed_at = Set(Some(now));
            }
            if status != enrollments::Status::NotStarted {
                if let sea_orm::ActiveValue::Unchanged(None) = active.started_at {
                    active.started_at = Set(Some(now));
                }
            }
            active.status = Set(status);
        }
        if let Some(scores) = input.topic_scores {
            // The list replaces wholesale; partial merges are not supported.
            active.topic_scores = Set(topic_scores_to_json(&scores));
        }
        active.last_accessed_at = Set(Some(now));
        active.updated_at = Set(now);
        let record = active.update(db.as_ref()).await.map_err(db_error)?;
        Ok(record.into())
    }

    async fn create_group(
        &self,
        ctx: &Context<'_>,
        input: NewGroupInput,
    ) -> async_graphql::Result<GroupNode> {
        let member = guard_role(ctx, MANAGER_ROLES)?;
        let org_id = effective_org_id(&member, input.organization_id.as_ref())?;
        let db = database(ctx)?;
        let name = required_text("name", &input.name)?;
        let record = groups::ActiveModel {
            id: Set(Uuid::new_v4()),
            org_id: Set(org_id),
            name: Set(name),
            description: Set(input.description),
            created_at: Set(Utc::now().into()),
        }
        .insert(db.as_ref())
        .await
        .map_err(db_error)?;
        Ok(record.into())
    }

    async fn assign_user_to_group(
        &self,
        ctx: &Context<'_>,
        group_id: ID,
        user_id: ID,
    ) -> async_graphql::Result<GroupMembershipPayload> {
        let member = guard_role(ctx, &[Role::OrgAdmin])?;
        let db = database(ctx)?;
        let group_id = parse_uuid(&group_id)?;
        let group = groups::Entity::find_by_id(group_id)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| not_found("group"))?;
        auth::ensure_same_org(&member, Some(group.org_id)).map_err(|e| e.extend())?;
        let user_id = parse_uuid(&user_id)?;
        let user = users::Entity::find_by_id(user_id)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| not_found("user"))?;
        if user.org_id != Some(group.org_id) {
            return Err(forbidden("user and group belong to different organizations"));
        }
        if let Some(existing) = group_members::Entity::find_by_id((group.id, user.id))
            .one(db.as_ref())
            .await
            .map_err(db_error)?
        {
            return Ok(GroupMembershipPayload::from(existing));
        }
        let insert = group_members::ActiveModel {
            group_id: Set(group.id),
            user_id: Set(user.id),
            created_at: Set(Utc::now().into()),
        }
        .insert(db.as_ref())
        .await;
        let record = match insert {
            Ok(record) => record,
            Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                group_members::Entity::find_by_id((group.id, user.id))
                    .one(db.as_ref())
                    .await
                    .map_err(db_error)?
                    .ok_or_else(|| db_error(err))?
            }
            Err(err) => return Err(db_error(err)),
        };
        Ok(GroupMembershipPayload::from(record))
    }

    /// Returns whether a membership row was actually removed; a missing
    /// membership (or a missing user) is not an error.
    async fn remove_user_from_group(
        &self,
        ctx: &Context<'_>,
        group_id: ID,
        user_id: ID,
    ) -> async_graphql::Result<bool> {
        let member = guard_role(ctx, &[Role::OrgAdmin])?;
        let db = database(ctx)?;
        let group_id = parse_uuid(&group_id)?;
        let group = groups::Entity::find_by_id(group_id)
            .one(db.as_ref())
            .await
            .map_err(db_error)?
            .ok_or_else(|| not_found("group"))?;
        auth::ensure_same_org(&member, Some(group.org_id)).map_err(|e| e.extend())?;
        let user_id = parse_uuid(&user_id)?;
        let result = group_members::Entity::delete_by_id((group.id, user_id))
            .exec(db.as_ref())
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected > 0)
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum PlanTier {
    Free,
    Team,
    Enterprise,
}

impl From<orgs::Plan> for PlanTier {
    fn from(value: orgs::Plan) -> Self {
        match value {
            orgs::Plan::Free => PlanTier::Free,
            orgs::Plan::Team => PlanTier::Team,
            orgs::Plan::Enterprise => PlanTier::Enterprise,
        }
    }
}

impl From<PlanTier> for orgs::Plan {
    fn from(value: PlanTier) -> Self {
        match value {
            PlanTier::Free => orgs::Plan::Free,
            PlanTier::Team => orgs::Plan::Team,
            PlanTier::Enterprise => orgs::Plan::Enterprise,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum UserStatus {
    Active,
    Inactive,
    Invited,
}

impl From<users::Status> for UserStatus {
    fn from(value: users::Status) -> Self {
        match value {
            users::Status::Active => UserStatus::Active,
            users::Status::Inactive => UserStatus::Inactive,
            users::Status::Invited => UserStatus::Invited,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum CourseLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl From<courses::Level> for CourseLevel {
    fn from(value: courses::Level) -> Self {
        match value {
            courses::Level::Beginner => CourseLevel::Beginner,
            courses::Level::Intermediate => CourseLevel::Intermediate,
            courses::Level::Advanced => CourseLevel::Advanced,
        }
    }
}

impl From<CourseLevel> for courses::Level {
    fn from(value: CourseLevel) -> Self {
        match value {
            CourseLevel::Beginner => courses::Level::Beginner,
            CourseLevel::Intermediate => courses::Level::Intermediate,
            CourseLevel::Advanced => courses::Level::Advanced,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum CourseStatus {
    Draft,
    Published,
    Archived,
}

impl From<courses::Status> for CourseStatus {
    fn from(value: courses::Status) -> Self {
        match value {
            courses::Status::Draft => CourseStatus::Draft,
            courses::Status::Published => CourseStatus::Published,
            courses::Status::Archived => CourseStatus::Archived,
        }
    }
}

impl From<CourseStatus> for courses::Status {
    fn from(value: CourseStatus) -> Self {
        match value {
            CourseStatus::Draft => courses::Status::Draft,
            CourseStatus::Published => courses::Status::Published,
            CourseStatus::Archived => courses::Status::Archived,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum EnrollmentStatus {
    NotStarted,
    InProgress,
    Completed,
    Archived,
}

impl From<enrollments::Status> for EnrollmentStatus {
    fn from(value: enrollments::Status) -> Self {
        match value {
            enrollments::Status::NotStarted => EnrollmentStatus::NotStarted,
            enrollments::Status::InProgress => EnrollmentStatus::InProgress,
            enrollments::Status::Completed => EnrollmentStatus::Completed,
            enrollments::Status::Archived => EnrollmentStatus::Archived,
        }
    }
}

impl From<EnrollmentStatus> for enrollments::Status {
    fn from(value: EnrollmentStatus) -> Self {
        match value {
            EnrollmentStatus::NotStarted => enrollments::Status::NotStarted,
            EnrollmentStatus::InProgress => enrollments::Status::InProgress,
            EnrollmentStatus::Completed => enrollments::Status::Completed,
            EnrollmentStatus::Archived => enrollments::Status::Archived,
        }
    }
}

#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub enum CourseHealth {
    Green,
    Yellow,
    Red,
}

impl From<metrics::Health> for CourseHealth {
    fn from(value: metrics::Health) -> Self {
        match value {
            metrics::Health::Green => CourseHealth::Green,
            metrics::Health::Yellow => CourseHealth::Yellow,
            metrics::Health::Red => CourseHealth::Red,
        }
    }
}

#[derive(InputObject, Clone)]
pub struct NewOrganizationInput {
    pub name: String,
    pub slug: String,
    #[graphql(name = "taxId")]
    pub tax_id: Option<String>,
    pub domain: Option<String>,
    pub plan: Option<PlanTier>,
}

#[derive(InputObject, Clone)]
pub struct NewCourseInput {
    #[graphql(name = "organizationId")]
    pub organization_id: Option<ID>,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub level: Option<CourseLevel>,
    pub status: Option<CourseStatus>,
    #[graphql(name = "durationMinutes")]
    pub duration_minutes: Option<i32>,
}

#[derive(InputObject, Clone)]
pub struct NewCourseTopicInput {
    #[graphql(name = "courseId")]
    pub course_id: ID,
    pub name: String,
    pub summary: Option<String>,
    pub position: Option<i32>,
    /// Ids of topics that must be taken first; edges are validated against
    /// the course's topic graph and rejected when they would close a cycle.
    pub dependencies: Option<Vec<ID>>,
    #[graphql(name = "durationMinutes")]
    pub duration_minutes: Option<i32>,
}

#[derive(InputObject, Clone)]
pub struct EnrollUserInput {
    #[graphql(name = "userId")]
    pub user_id: ID,
    #[graphql(name = "courseId")]
    pub course_id: ID,
    pub status: Option<EnrollmentStatus>,
    pub progress: Option<f64>,
}

/// Score of -1 marks a topic as not attempted.
#[derive(InputObject, Clone)]
pub struct TopicScoreInput {
    #[graphql(name = "topicId")]
    pub topic_id: ID,
    #[graphql(name = "topicName")]
    pub topic_name: String,
    pub score: f64,
}

#[derive(InputObject, Clone)]
pub struct UpdateEnrollmentScoreInput {
    #[graphql(name = "enrollmentId")]
    pub enrollment_id: ID,
    pub progress: Option<f64>,
    pub score: Option<f64>,
    pub status: Option<EnrollmentStatus>,
    #[graphql(name = "topicScores")]
    pub topic_scores: Option<Vec<TopicScoreInput>>,
}

#[derive(InputObject, Clone)]
pub struct NewGroupInput {
    #[graphql(name = "organizationId")]
    pub organization_id: Option<ID>,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Organization")]
pub struct OrganizationNode {
    pub id: ID,
    pub name: String,
    pub slug: String,
    #[graphql(name = "taxId")]
    pub tax_id: Option<String>,
    pub domain: Option<String>,
    pub plan: PlanTier,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[graphql(name = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl From<orgs::Model> for OrganizationNode {
    fn from(model: orgs::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            name: model.name,
            slug: model.slug,
            tax_id: model.tax_id,
            domain: model.domain,
            plan: model.plan.into(),
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "User")]
pub struct UserNode {
    pub id: ID,
    #[graphql(name = "organizationId")]
    pub organization_id: Option<ID>,
    pub email: String,
    #[graphql(name = "displayName")]
    pub display_name: String,
    pub roles: Vec<String>,
    pub status: UserStatus,
    pub theme: Option<String>,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[graphql(name = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl From<users::Model> for UserNode {
    fn from(model: users::Model) -> Self {
        let roles = auth::RoleSet::parse(&model.roles).labels();
        Self {
            id: ID::from(model.id.to_string()),
            organization_id: model.org_id.map(|id| ID::from(id.to_string())),
            email: model.email,
            display_name: model.display_name,
            roles,
            status: model.status.into(),
            theme: model.theme,
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Group")]
pub struct GroupNode {
    pub id: ID,
    #[graphql(name = "organizationId")]
    pub organization_id: ID,
    pub name: String,
    pub description: Option<String>,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl From<groups::Model> for GroupNode {
    fn from(model: groups::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            organization_id: ID::from(model.org_id.to_string()),
            name: model.name,
            description: model.description,
            created_at: model.created_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "GroupMembership")]
pub struct GroupMembershipPayload {
    #[graphql(name = "groupId")]
    pub group_id: ID,
    #[graphql(name = "userId")]
    pub user_id: ID,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl From<group_members::Model> for GroupMembershipPayload {
    fn from(model: group_members::Model) -> Self {
        Self {
            group_id: ID::from(model.group_id.to_string()),
            user_id: ID::from(model.user_id.to_string()),
            created_at: model.created_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Course")]
pub struct CourseNode {
    pub id: ID,
    #[graphql(name = "organizationId")]
    pub organization_id: ID,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub level: CourseLevel,
    pub status: CourseStatus,
    #[graphql(name = "durationMinutes")]
    pub duration_minutes: Option<i32>,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[graphql(name = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl From<courses::Model> for CourseNode {
    fn from(model: courses::Model) -> Self {
        Self {
            id: ID::from(model.id.to_string()),
            organization_id: ID::from(model.org_id.to_string()),
            title: model.title,
            description: model.description,
            category: model.category,
            level: model.level.into(),
            status: model.status.into(),
            duration_minutes: model.duration_minutes,
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "CourseTopic")]
pub struct CourseTopicNode {
    pub id: ID,
    #[graphql(name = "courseId")]
    pub course_id: ID,
    pub name: String,
    pub summary: Option<String>,
    pub position: i32,
    pub dependencies: Vec<ID>,
    #[graphql(name = "durationMinutes")]
    pub duration_minutes: Option<i32>,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl From<course_topics::Model> for CourseTopicNode {
    fn from(model: course_topics::Model) -> Self {
        let dependencies = dependency_ids(&model.dependencies)
            .into_iter()
            .map(|id| ID::from(id.to_string()))
            .collect();
        Self {
            id: ID::from(model.id.to_string()),
            course_id: ID::from(model.course_id.to_string()),
            name: model.name,
            summary: model.summary,
            position: model.position,
            dependencies,
            duration_minutes: model.duration_minutes,
            created_at: model.created_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "TopicScore")]
pub struct TopicScoreNode {
    #[graphql(name = "topicId")]
    pub topic_id: ID,
    #[graphql(name = "topicName")]
    pub topic_name: String,
    pub score: f64,
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "Enrollment")]
pub struct EnrollmentNode {
    pub id: ID,
    #[graphql(name = "userId")]
    pub user_id: ID,
    #[graphql(name = "courseId")]
    pub course_id: ID,
    pub status: EnrollmentStatus,
    pub progress: f64,
    pub score: Option<f64>,
    #[graphql(name = "topicScores")]
    pub topic_scores: Vec<TopicScoreNode>,
    #[graphql(name = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[graphql(name = "completedAt")]
    pub completed_at: Option<DateTime<Utc>>,
    #[graphql(name = "lastAccessedAt")]
    pub last_accessed_at: Option<DateTime<Utc>>,
    #[graphql(name = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[graphql(name = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl From<enrollments::Model> for EnrollmentNode {
    fn from(model: enrollments::Model) -> Self {
        let topic_scores = topic_scores_from_json(&model.topic_scores);
        Self {
            id: ID::from(model.id.to_string()),
            user_id: ID::from(model.user_id.to_string()),
            course_id: ID::from(model.course_id.to_string()),
            status: model.status.into(),
            progress: model.progress,
            score: model.score,
            topic_scores,
            started_at: model.started_at.map(Into::into),
            completed_at: model.completed_at.map(Into::into),
            last_accessed_at: model.last_accessed_at.map(Into::into),
            created_at: model.created_at.into(),
            updated_at: model.updated_at.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct MePayload {
    pub user: UserNode,
    pub roles: Vec<String>,
    pub impersonated: bool,
}

#[derive(Clone, Debug, SimpleObject)]
#[graphql(name = "CourseMetrics")]
pub struct CourseMetricsNode {
    #[graphql(name = "enrolledCount")]
    pub enrolled_count: i64,
    #[graphql(name = "averageScore")]
    pub average_score: Option<f64>,
    #[graphql(name = "completionRate")]
    pub completion_rate: f64,
    pub health: CourseHealth,
}

impl From<CourseMetrics> for CourseMetricsNode {
    fn from(value: CourseMetrics) -> Self {
        Self {
            enrolled_count: value.enrolled_count as i64,
            average_score: value.average_score,
            completion_rate: value.completion_rate,
            health: value.health.into(),
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct CourseDashboardRow {
    pub course: CourseNode,
    pub metrics: CourseMetricsNode,
}

#[derive(Clone, Debug, SimpleObject)]
pub struct OrganizationDashboard {
    pub organization: OrganizationNode,
    #[graphql(name = "totalUsers")]
    pub total_users: i64,
    #[graphql(name = "totalCourses")]
    pub total_courses: i64,
    #[graphql(name = "totalEnrollments")]
    pub total_enrollments: i64,
    #[graphql(name = "averageScore")]
    pub average_score: Option<f64>,
    pub courses: Vec<CourseDashboardRow>,
}

#[derive(Clone, Debug, SimpleObject)]
pub struct EmployeeCourseScore {
    #[graphql(name = "userId")]
    pub user_id: ID,
    #[graphql(name = "userDisplayName")]
    pub user_display_name: String,
    #[graphql(name = "userEmail")]
    pub user_email: String,
    #[graphql(name = "courseId")]
    pub course_id: ID,
    #[graphql(name = "courseTitle")]
    pub course_title: String,
    pub status: EnrollmentStatus,
    pub progress: f64,
    pub score: Option<f64>,
    #[graphql(name = "topicScores")]
    pub topic_scores: Vec<TopicScoreNode>,
}

/// Storage form of one per-topic score record.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TopicScoreRecord {
    topic_id: String,
    topic_name: String,
    score: f64,
}

fn database(ctx: &Context<'_>) -> async_graphql::Result<Arc<DatabaseConnection>> {
    ctx.data::<Arc<DatabaseConnection>>()
        .cloned()
        .map_err(|_| error_with_code("INTERNAL", "Missing database connection"))
}

fn request_context(ctx: &Context<'_>) -> RequestContext {
    ctx.data_opt::<RequestContext>()
        .cloned()
        .unwrap_or_default()
}

fn guard_system_admin(ctx: &Context<'_>) -> async_graphql::Result<Principal> {
    let rc = request_context(ctx);
    auth::require_system_admin(&rc)
        .cloned()
        .map_err(|e| e.extend())
}

fn guard_member(ctx: &Context<'_>) -> async_graphql::Result<Member> {
    let rc = request_context(ctx);
    auth::require_org_member(&rc).map_err(|e| e.extend())
}

fn guard_role(ctx: &Context<'_>, allowed: &[Role]) -> async_graphql::Result<Member> {
    let rc = request_context(ctx);
    auth::require_org_role(&rc, allowed).map_err(|e| e.extend())
}

/// Resolve the organization a scoped operation runs against: the explicit
/// parameter when given (isolation enforced on it), the caller's own
/// organization otherwise.
fn effective_org_id(member: &Member, explicit: Option<&ID>) -> async_graphql::Result<Uuid> {
    let explicit =
        auth::parse_org_param(explicit.map(|id| id.as_str())).map_err(|e| e.extend())?;
    match explicit {
        Some(target) => auth::ensure_same_org(member, Some(target)).map_err(|e| e.extend()),
        None => Ok(member.org_id),
    }
}

/// Isolation against a fetched row whose owner may be unset (users awaiting
/// provisioning). A missing owner is a mismatch, not bad input.
fn ensure_member_owns(member: &Member, owner: Option<Uuid>) -> async_graphql::Result<()> {
    if owner == Some(member.org_id) {
        Ok(())
    } else {
        Err(forbidden("organization mismatch"))
    }
}

fn parse_uuid(id: &ID) -> async_graphql::Result<Uuid> {
    Uuid::parse_str(id.as_str()).map_err(|_| bad_input("invalid id"))
}

fn db_error(err: DbErr) -> Error {
    platform_api::internal_error(err)
}

fn not_found(what: &'static str) -> Error {
    ApiError::NotFound(what).extend()
}

fn forbidden(message: impl Into<String>) -> Error {
    ApiError::forbidden(message).extend()
}

fn bad_input(message: impl Into<String>) -> Error {
    ApiError::bad_input(message).extend()
}

fn error_with_code(code: &'static str, message: impl Into<String>) -> Error {
    Error::new(message).extend_with(|_, e| e.set("code", code))
}

fn required_text(field: &str, value: &str) -> async_graphql::Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(bad_input(format!("{} is required", field)))
    } else {
        Ok(trimmed.to_string())
    }
}

fn sanitize_optional_filter(value: Option<String>) -> Option<String> {
    value.and_then(|raw| {
        let trimmed = raw.trim().to_string();
        if trimmed.is_empty() { None } else { Some(trimmed) }
    })
}

fn clamp_progress(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

fn topic_scores_to_json(scores: &[TopicScoreInput]) -> serde_json::Value {
    let records: Vec<TopicScoreRecord> = scores
        .iter()
        .map(|s| TopicScoreRecord {
            topic_id: s.topic_id.to_string(),
            topic_name: s.topic_name.clone(),
            score: s.score,
        })
        .collect();
    serde_json::to_value(records).unwrap_or_else(|_| serde_json::json!([]))
}

fn topic_scores_from_json(value: &serde_json::Value) -> Vec<TopicScoreNode> {
    let records: Vec<TopicScoreRecord> =
        serde_json::from_value(value.clone()).unwrap_or_default();
    records
        .into_iter()
        .map(|r| TopicScoreNode {
            topic_id: ID::from(r.topic_id),
            topic_name: r.topic_name,
            score: r.score,
        })
        .collect()
}

fn dependency_ids(value: &serde_json::Value) -> Vec<Uuid> {
    let raw: Vec<String> = serde_json::from_value(value.clone()).unwrap_or_default();
    raw.iter()
        .filter_map(|id| Uuid::parse_str(id).ok())
        .collect()
}

/// Validate a new topic's dependency edges against the course graph.
///
/// Every edge must point at an existing topic of the same course, and the
/// graph including the new node must stay acyclic.
fn validate_dependencies(
    topic_id: Uuid,
    dependencies: &Option<Vec<ID>>,
    existing: &[course_topics::Model],
) -> async_graphql::Result<Vec<String>> {
    let Some(dependencies) = dependencies else {
        return Ok(vec![]);
    };
    let known: HashSet<Uuid> = existing.iter().map(|t| t.id).collect();
    let mut edges: HashMap<Uuid, Vec<Uuid>> = existing
        .iter()
        .map(|t| (t.id, dependency_ids(&t.dependencies)))
        .collect();
    let mut resolved = Vec::with_capacity(dependencies.len());
    for dep in dependencies {
        let dep_id = parse_uuid(dep)?;
        if dep_id == topic_id || !known.contains(&dep_id) {
            return Err(bad_input("unknown dependency topic"));
        }
        if !resolved.contains(&dep_id) {
            resolved.push(dep_id);
        }
    }
    edges.insert(topic_id, resolved.clone());
    if has_cycle(&edges) {
        return Err(bad_input("dependency would create a cycle"));
    }
    Ok(resolved.iter().map(|id| id.to_string()).collect())
}

fn has_cycle(edges: &HashMap<Uuid, Vec<Uuid>>) -> bool {
    fn visit(
        node: Uuid,
        edges: &HashMap<Uuid, Vec<Uuid>>,
        visiting: &mut HashSet<Uuid>,
        done: &mut HashSet<Uuid>,
    ) -> bool {
        if done.contains(&node) {
            return false;
        }
        if !visiting.insert(node) {
            return true;
        }
        for next in edges.get(&node).into_iter().flatten() {
            if visit(*next, edges, visiting, done) {
                return true;
            }
        }
        visiting.remove(&node);
        done.insert(node);
        false
    }

    let mut visiting = HashSet::new();
    let mut done = HashSet::new();
    edges
        .keys()
        .any(|node| visit(*node, edges, &mut visiting, &mut done))
}

async fn find_enrollment(
    db: &DatabaseConnection,
    user_id: Uuid,
    course_id: Uuid,
) -> async_graphql::Result<Option<enrollments::Model>> {
    enrollments::Entity::find()
        .filter(enrollments::Column::UserId.eq(user_id))
        .filter(enrollments::Column::CourseId.eq(course_id))
        .one(db)
        .await
        .map_err(db_error)
}

async fn org_course_ids(
    db: &DatabaseConnection,
    org_id: Uuid,
) -> async_graphql::Result<Vec<Uuid>> {
    let records = courses::Entity::find()
        .filter(courses::Column::OrgId.eq(org_id))
        .all(db)
        .await
        .map_err(db_error)?;
    Ok(records.into_iter().map(|c| c.id).collect())
}

async fn enrollments_by_course(
    db: &DatabaseConnection,
    course_ids: Vec<Uuid>,
) -> async_graphql::Result<HashMap<Uuid, Vec<enrollments::Model>>> {
    let mut grouped: HashMap<Uuid, Vec<enrollments::Model>> = HashMap::new();
    if course_ids.is_empty() {
        return Ok(grouped);
    }
    let records = enrollments::Entity::find()
        .filter(enrollments::Column::CourseId.is_in(course_ids))
        .all(db)
        .await
        .map_err(db_error)?;
    for record in records {
        grouped.entry(record.course_id).or_default().push(record);
    }
    Ok(grouped)
}

/// Per-request memoized course metrics; computed directly when the request
/// carries no cache (unit-style schema executions).
fn cached_course_metrics(
    ctx: &Context<'_>,
    course_id: Uuid,
    rows: &[enrollments::Model],
) -> CourseMetrics {
    match ctx.data_opt::<MetricsCache>() {
        Some(cache) => {
            if let Some(hit) = cache.get(course_id) {
                return hit;
            }
            let computed = metrics::course_metrics(rows);
            cache.insert(course_id, computed);
            computed
        }
        None => metrics::course_metrics(rows),
    }
}
