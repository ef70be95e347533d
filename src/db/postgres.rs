//! Postgres backend.
//!
//! Materials and reviews live as JSONB arrays on the course row. Every
//! read-check-write sequence runs in a transaction holding a row lock, so
//! two concurrent reviews from one user cannot both pass the duplicate check.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{types::Json, FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::models::{
    push_unique, ActivityLog, Course, CoursePatch, CourseSearch, Material, NewActivity, NewCourse,
    NewMaterial, NewReview, NewUser, ProfileUpdate, Review, Role, User,
};
use super::store::{Store, StoreError, StoreResult};

const USER_COLUMNS: &str = "id, name, email, password_hash, role, phone, bio, organization, \
     avatar, enrolled_courses, completed_courses, created_at, updated_at";

const COURSE_COLUMNS: &str = "id, title, description, code, category, level, tags, \
     is_published, cover_image, materials, reviews, average_rating, num_reviews, \
     created_at, updated_at";

const ACTIVITY_COLUMNS: &str =
    "id, user_id, action, entity_type, entity_id, details, ip_address, user_agent, created_at";

/// Full-text document for a course, computed from bound title ($1),
/// description ($2) and tags ($3) parameters.
const SEARCH_VECTOR_EXPR: &str =
    "to_tsvector('english', $1 || ' ' || $2 || ' ' || array_to_string($3::text[], ' '))";

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    phone: String,
    bio: String,
    organization: String,
    avatar: String,
    enrolled_courses: Vec<Uuid>,
    completed_courses: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            role: row
                .role
                .parse()
                .map_err(|e: super::models::UnknownVariant| StoreError::Corrupt(e.to_string()))?,
            id: row.id,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            phone: row.phone,
            bio: row.bio,
            organization: row.organization,
            avatar: row.avatar,
            enrolled_courses: row.enrolled_courses,
            completed_courses: row.completed_courses,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CourseRow {
    id: Uuid,
    title: String,
    description: String,
    code: String,
    category: String,
    level: String,
    tags: Vec<String>,
    is_published: bool,
    cover_image: String,
    materials: Json<Vec<Material>>,
    reviews: Json<Vec<Review>>,
    average_rating: f64,
    num_reviews: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CourseRow> for Course {
    type Error = StoreError;

    fn try_from(row: CourseRow) -> Result<Self, Self::Error> {
        Ok(Course {
            level: row
                .level
                .parse()
                .map_err(|e: super::models::UnknownVariant| StoreError::Corrupt(e.to_string()))?,
            id: row.id,
            title: row.title,
            description: row.description,
            code: row.code,
            category: row.category,
            tags: row.tags,
            is_published: row.is_published,
            cover_image: row.cover_image,
            materials: row.materials.0,
            reviews: row.reviews.0,
            average_rating: row.average_rating,
            num_reviews: row.num_reviews,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ActivityRow {
    id: Uuid,
    user_id: Uuid,
    action: String,
    entity_type: String,
    entity_id: Option<Uuid>,
    details: String,
    ip_address: String,
    user_agent: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ActivityRow> for ActivityLog {
    type Error = StoreError;

    fn try_from(row: ActivityRow) -> Result<Self, Self::Error> {
        let corrupt = |e: super::models::UnknownVariant| StoreError::Corrupt(e.to_string());
        Ok(ActivityLog {
            id: row.id,
            user: row.user_id,
            action: row.action.parse().map_err(corrupt)?,
            entity_type: row.entity_type.parse().map_err(corrupt)?,
            entity_id: row.entity_id,
            details: row.details,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            created_at: row.created_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Translate unique-index violations into domain errors.
fn map_unique(err: sqlx::Error, code: Option<&str>) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return match db_err.constraint() {
                Some("idx_users_email_lower") => StoreError::DuplicateEmail,
                Some("idx_courses_code") => {
                    StoreError::DuplicateCode(code.unwrap_or_default().to_string())
                }
                _ => StoreError::Database(err),
            };
        }
    }
    StoreError::Database(err)
}

#[derive(Clone, Copy)]
enum CourseSet {
    Enrolled,
    Completed,
}

impl CourseSet {
    fn column(self) -> &'static str {
        match self {
            CourseSet::Enrolled => "enrolled_courses",
            CourseSet::Completed => "completed_courses",
        }
    }
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn add_to_set(
        &self,
        set: CourseSet,
        user: Uuid,
        course: Uuid,
    ) -> StoreResult<Option<(bool, Vec<Uuid>)>> {
        let column = set.column();
        let mut tx = self.pool.begin().await?;

        let current: Option<(Vec<Uuid>,)> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1 FOR UPDATE", column))
                .bind(user)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((mut ids,)) = current else {
            return Ok(None);
        };

        let inserted = push_unique(&mut ids, course);
        if inserted {
            sqlx::query(&format!(
                "UPDATE users SET {} = $2, updated_at = now() WHERE id = $1",
                column
            ))
            .bind(user)
            .bind(&ids)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(Some((inserted, ids)))
    }

    fn push_search_filters(builder: &mut QueryBuilder<'_, Postgres>, search: &CourseSearch) {
        builder.push(" WHERE TRUE");
        if search.published_only {
            builder.push(" AND is_published");
        }
        if let Some(text) = &search.text {
            builder
                .push(" AND search_vector @@ plainto_tsquery('english', ")
                .push_bind(text.clone())
                .push(")");
        }
        if let Some(category) = &search.category {
            builder.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(level) = search.level {
            builder.push(" AND level = ").push_bind(level.as_str());
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let row: UserRow = sqlx::query_as(&format!(
            "INSERT INTO users (name, email, password_hash, role) VALUES ($1, $2, $3, $4) \
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique(e, None))?;
        row.try_into()
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE LOWER(email) = LOWER($1)",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(User::try_from).transpose()
    }

    async fn list_users(&self, role: Option<Role>) -> StoreResult<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE ($1::text IS NULL OR role = $1) ORDER BY created_at",
            USER_COLUMNS
        ))
        .bind(role.map(|r| r.as_str()))
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            r#"UPDATE users
               SET name = COALESCE($2, name),
                   phone = COALESCE($3, phone),
                   bio = COALESCE($4, bio),
                   organization = COALESCE($5, organization),
                   avatar = COALESCE($6, avatar),
                   updated_at = now()
               WHERE id = $1
               RETURNING {}"#,
            USER_COLUMNS
        ))
        .bind(id)
        .bind(update.name)
        .bind(update.phone)
        .bind(update.bio)
        .bind(update.organization)
        .bind(update.avatar)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn set_password(&self, id: Uuid, password_hash: &str) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
                .bind(id)
                .bind(password_hash)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn enroll(&self, user: Uuid, course: Uuid) -> StoreResult<Option<(bool, Vec<Uuid>)>> {
        self.add_to_set(CourseSet::Enrolled, user, course).await
    }

    async fn complete(
        &self,
        user: Uuid,
        course: Uuid,
    ) -> StoreResult<Option<(bool, Vec<Uuid>)>> {
        self.add_to_set(CourseSet::Completed, user, course).await
    }

    async fn list_courses(&self, published_only: bool) -> StoreResult<Vec<Course>> {
        let rows: Vec<CourseRow> = sqlx::query_as(&format!(
            "SELECT {} FROM courses WHERE (NOT $1 OR is_published) ORDER BY created_at DESC",
            COURSE_COLUMNS
        ))
        .bind(published_only)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn find_course(&self, id: Uuid) -> StoreResult<Option<Course>> {
        let row: Option<CourseRow> =
            sqlx::query_as(&format!("SELECT {} FROM courses WHERE id = $1", COURSE_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Course::try_from).transpose()
    }

    async fn courses_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Course>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<CourseRow> = sqlx::query_as(&format!(
            "SELECT {} FROM courses WHERE id = ANY($1) ORDER BY array_position($1, id)",
            COURSE_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn count_courses(&self) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM courses")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn create_course(&self, course: NewCourse) -> StoreResult<Course> {
        let code = course.code.clone();
        let row: CourseRow = sqlx::query_as(&format!(
            r#"INSERT INTO courses
                   (title, description, tags, code, category, level, is_published,
                    materials, reviews, search_vector)
               VALUES ($1, $2, $3, $4, $5, $6, false, '[]', '[]', {})
               RETURNING {}"#,
            SEARCH_VECTOR_EXPR, COURSE_COLUMNS
        ))
        .bind(&course.title)
        .bind(&course.description)
        .bind(&course.tags)
        .bind(&course.code)
        .bind(&course.category)
        .bind(course.level.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_unique(e, Some(&code)))?;
        row.try_into()
    }

    async fn update_course(&self, id: Uuid, patch: CoursePatch) -> StoreResult<Option<Course>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<CourseRow> = sqlx::query_as(&format!(
            "SELECT {} FROM courses WHERE id = $1 FOR UPDATE",
            COURSE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut course = Course::try_from(row)?;
        patch.apply(&mut course);

        let row: CourseRow = sqlx::query_as(&format!(
            r#"UPDATE courses
               SET title = $1, description = $2, tags = $3, code = $4, category = $5,
                   level = $6, is_published = $7, cover_image = $8, materials = $9,
                   average_rating = $10, num_reviews = $11, search_vector = {},
                   updated_at = now()
               WHERE id = $12
               RETURNING {}"#,
            SEARCH_VECTOR_EXPR, COURSE_COLUMNS
        ))
        .bind(&course.title)
        .bind(&course.description)
        .bind(&course.tags)
        .bind(&course.code)
        .bind(&course.category)
        .bind(course.level.as_str())
        .bind(course.is_published)
        .bind(&course.cover_image)
        .bind(Json(&course.materials))
        .bind(course.average_rating)
        .bind(course.num_reviews)
        .bind(id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_unique(e, Some(&course.code)))?;

        tx.commit().await?;
        Course::try_from(row).map(Some)
    }

    async fn delete_course(&self, id: Uuid) -> StoreResult<Option<Course>> {
        let row: Option<CourseRow> = sqlx::query_as(&format!(
            "DELETE FROM courses WHERE id = $1 RETURNING {}",
            COURSE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Course::try_from).transpose()
    }

    async fn add_material(&self, id: Uuid, material: NewMaterial) -> StoreResult<Option<Course>> {
        let material = Material::from(material);
        let row: Option<CourseRow> = sqlx::query_as(&format!(
            r#"UPDATE courses
               SET materials = materials || $2, updated_at = now()
               WHERE id = $1
               RETURNING {}"#,
            COURSE_COLUMNS
        ))
        .bind(id)
        .bind(Json(vec![material]))
        .fetch_optional(&self.pool)
        .await?;
        row.map(Course::try_from).transpose()
    }

    async fn add_review(&self, id: Uuid, review: NewReview) -> StoreResult<Option<Course>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<CourseRow> = sqlx::query_as(&format!(
            "SELECT {} FROM courses WHERE id = $1 FOR UPDATE",
            COURSE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut course = Course::try_from(row)?;
        if course.has_review_from(review.user) {
            return Err(StoreError::AlreadyReviewed);
        }

        course.reviews.push(review.into());
        course.recompute_rating();

        let row: CourseRow = sqlx::query_as(&format!(
            r#"UPDATE courses
               SET reviews = $2, average_rating = $3, num_reviews = $4, updated_at = now()
               WHERE id = $1
               RETURNING {}"#,
            COURSE_COLUMNS
        ))
        .bind(id)
        .bind(Json(&course.reviews))
        .bind(course.average_rating)
        .bind(course.num_reviews)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Course::try_from(row).map(Some)
    }

    async fn search_courses(&self, search: &CourseSearch) -> StoreResult<(Vec<Course>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM courses");
        Self::push_search_filters(&mut count, search);
        let (total,) = count.build_query_as::<(i64,)>().fetch_one(&self.pool).await?;

        let mut page = QueryBuilder::<Postgres>::new("SELECT ");
        page.push(COURSE_COLUMNS).push(" FROM courses");
        Self::push_search_filters(&mut page, search);
        match &search.text {
            Some(text) => {
                page.push(" ORDER BY ts_rank(search_vector, plainto_tsquery('english', ")
                    .push_bind(text.clone())
                    .push(")) DESC, created_at DESC");
            }
            None => {
                page.push(" ORDER BY created_at DESC");
            }
        }
        page.push(" LIMIT ")
            .push_bind(search.limit)
            .push(" OFFSET ")
            .push_bind(search.offset());

        let rows = page.build_query_as::<CourseRow>().fetch_all(&self.pool).await?;
        Ok((convert_all(rows)?, total))
    }

    async fn insert_activity(&self, entry: NewActivity) -> StoreResult<()> {
        sqlx::query(
            r#"INSERT INTO activity_logs
                   (user_id, action, entity_type, entity_id, details, ip_address, user_agent)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(entry.user)
        .bind(entry.action.as_str())
        .bind(entry.entity_type.as_str())
        .bind(entry.entity_id)
        .bind(&entry.details)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_activity(
        &self,
        user: Uuid,
        offset: i64,
        limit: i64,
    ) -> StoreResult<(Vec<ActivityLog>, i64)> {
        let sql = format!(
            "SELECT {} FROM activity_logs WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            ACTIVITY_COLUMNS
        );
        let (rows, total) = tokio::try_join!(
            sqlx::query_as::<_, ActivityRow>(&sql)
                .bind(user)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool),
            sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM activity_logs WHERE user_id = $1")
                .bind(user)
                .fetch_one(&self.pool),
        )?;
        Ok((convert_all(rows)?, total.0))
    }

    async fn ping(&self) -> StoreResult<Duration> {
        let start = Instant::now();
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(start.elapsed())
    }

    async fn close(&self) {
        tracing::info!("Closing database connection pool");
        self.pool.close().await;
    }
}
