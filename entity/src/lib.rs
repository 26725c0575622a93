pub mod course_topics;
pub mod courses;
pub mod enrollments;
pub mod group_members;
pub mod groups;
pub mod orgs;
pub mod sessions;
pub mod users;
