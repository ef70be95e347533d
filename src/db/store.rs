//! Storage seam. Handlers only ever talk to `dyn Store`; the backend is
//! chosen once at startup and injected through `AppState`.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::models::{
    ActivityLog, Course, CoursePatch, CourseSearch, NewActivity, NewCourse, NewMaterial,
    NewReview, NewUser, ProfileUpdate, Role, User,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,

    #[error("course code already exists: {0}")]
    DuplicateCode(String),

    #[error("user already reviewed this course")]
    AlreadyReviewed,

    #[error("corrupt stored value: {0}")]
    Corrupt(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    // Users
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;
    /// Case-insensitive lookup.
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn list_users(&self, role: Option<Role>) -> StoreResult<Vec<User>>;
    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Option<User>>;
    async fn set_password(&self, id: Uuid, password_hash: &str) -> StoreResult<bool>;
    /// Add `course` to the user's enrolled set. Returns `(inserted, list)`,
    /// or `None` when the user does not exist.
    async fn enroll(&self, user: Uuid, course: Uuid) -> StoreResult<Option<(bool, Vec<Uuid>)>>;
    /// Add `course` to the user's completed set; same contract as `enroll`.
    async fn complete(&self, user: Uuid, course: Uuid)
        -> StoreResult<Option<(bool, Vec<Uuid>)>>;

    // Courses
    /// All courses, newest first.
    async fn list_courses(&self, published_only: bool) -> StoreResult<Vec<Course>>;
    async fn find_course(&self, id: Uuid) -> StoreResult<Option<Course>>;
    async fn courses_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Course>>;
    async fn count_courses(&self) -> StoreResult<i64>;
    async fn create_course(&self, course: NewCourse) -> StoreResult<Course>;
    async fn update_course(&self, id: Uuid, patch: CoursePatch) -> StoreResult<Option<Course>>;
    async fn delete_course(&self, id: Uuid) -> StoreResult<Option<Course>>;
    async fn add_material(&self, id: Uuid, material: NewMaterial) -> StoreResult<Option<Course>>;
    /// Append a review and recompute the rating aggregates atomically.
    /// Fails with `AlreadyReviewed` if the user has a review on this course.
    async fn add_review(&self, id: Uuid, review: NewReview) -> StoreResult<Option<Course>>;
    async fn search_courses(&self, search: &CourseSearch) -> StoreResult<(Vec<Course>, i64)>;

    // Activity log
    async fn insert_activity(&self, entry: NewActivity) -> StoreResult<()>;
    /// Newest first.
    async fn list_activity(
        &self,
        user: Uuid,
        offset: i64,
        limit: i64,
    ) -> StoreResult<(Vec<ActivityLog>, i64)>;

    // Lifecycle
    async fn ping(&self) -> StoreResult<Duration>;
    async fn close(&self);
}
