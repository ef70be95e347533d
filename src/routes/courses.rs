/**
 * Course Routes
 * Catalogue management, enrollment, completion, reviews, search and
 * per-student progress
 */
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{AdminUser, AuthUser, RequestMeta};
use crate::db::models::{
    page_count, ActivityAction, ActivityLog, Course, CoursePatch, CourseSearch, EntityType,
    Level, Material, MaterialEntry, MaterialType, NewCourse, NewMaterial, NewReview, User,
    DEFAULT_CATEGORY,
};
use crate::error::{AppError, AppResult};
use crate::routes::upload::{save_image_field, COVER_DIR};
use crate::routes::{ApiJson, ApiPath, ApiQuery};
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: i64 = 10;
const MAX_PAGE_SIZE: i64 = 100;
const STUDENT_ACTIVITY_LIMIT: i64 = 50;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CreateCourseRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub code: Option<String>,
    pub category: Option<String>,
    pub level: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// A material as sent by clients. Existing materials carry their `_id`;
/// new ones get a fresh id.
#[derive(Debug, Deserialize, Serialize)]
pub struct MaterialInput {
    #[serde(rename = "_id", default)]
    pub id: Option<Uuid>,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: MaterialType,
    pub link: String,
}

impl From<MaterialInput> for Material {
    fn from(m: MaterialInput) -> Self {
        Material {
            id: m.id.unwrap_or_else(Uuid::new_v4),
            title: m.title,
            kind: m.kind,
            link: m.link,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCourseRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub code: Option<String>,
    pub category: Option<String>,
    pub level: Option<Level>,
    pub tags: Option<Vec<String>>,
    pub is_published: Option<bool>,
    pub cover_image: Option<String>,
    pub materials: Option<Vec<MaterialInput>>,
    pub average_rating: Option<f64>,
    pub num_reviews: Option<i32>,
}

impl UpdateCourseRequest {
    fn into_patch(self) -> AppResult<CoursePatch> {
        for (field, value) in [
            ("title", &self.title),
            ("description", &self.description),
            ("code", &self.code),
        ] {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                return Err(AppError::Validation(format!("Course {} cannot be empty", field)));
            }
        }

        Ok(CoursePatch {
            title: self.title.map(|v| v.trim().to_string()),
            description: self.description,
            code: self.code.map(|v| v.trim().to_string()),
            category: self.category,
            level: self.level,
            tags: self.tags,
            is_published: self.is_published,
            cover_image: self.cover_image,
            materials: self
                .materials
                .map(|list| list.into_iter().map(Material::from).collect()),
            average_rating: self.average_rating,
            num_reviews: self.num_reviews,
        })
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct MaterialRequest {
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub link: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ReviewRequest {
    pub rating: Option<f64>,
    pub comment: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteCourseRequest {
    pub course_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub category: Option<String>,
    pub level: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub courses: Vec<Course>,
    pub page: i64,
    pub pages: i64,
    pub total: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollResponse {
    pub message: String,
    pub enrolled_courses: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    pub message: String,
    pub completed_courses: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverResponse {
    pub cover_image: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseProgress {
    pub course_id: Uuid,
    pub title: String,
    pub completed: bool,
    pub percentage: u8,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressResponse {
    pub progress: Vec<CourseProgress>,
    pub overall_percentage: i64,
    pub total_courses: i64,
    pub completed_count: i64,
}

// ============================================================================
// Helper Functions
// ============================================================================

fn course_not_found() -> AppError {
    AppError::NotFound("Course not found".to_string())
}

fn user_not_found() -> AppError {
    AppError::NotFound("User not found".to_string())
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_level(value: Option<String>) -> AppResult<Option<Level>> {
    present(value)
        .map(|v| v.parse::<Level>())
        .transpose()
        .map_err(|e| AppError::Validation(e.to_string()))
}

/// Completed courses over every course in the system, as a rounded
/// percentage. Enrollment is deliberately not the denominator.
pub fn overall_percentage(completed: usize, total_courses: i64) -> i64 {
    if total_courses <= 0 {
        return 0;
    }
    ((completed as f64 / total_courses as f64) * 100.0).round() as i64
}

fn progress_for(user: &User, enrolled: &[Course]) -> Vec<CourseProgress> {
    enrolled
        .iter()
        .map(|course| {
            let completed = user.completed_courses.contains(&course.id);
            CourseProgress {
                course_id: course.id,
                title: course.title.clone(),
                completed,
                percentage: if completed { 100 } else { 0 },
            }
        })
        .collect()
}

fn flatten_materials(courses: Vec<Course>) -> Vec<MaterialEntry> {
    courses
        .into_iter()
        .flat_map(|course| {
            let course_id = course.id;
            let course_name = course.title;
            course.materials.into_iter().map(move |material| MaterialEntry {
                material,
                course_name: course_name.clone(),
                course_id,
            })
        })
        .collect()
}

// ============================================================================
// Catalogue
// ============================================================================

/// GET /api/courses
pub async fn list_courses(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<Vec<Course>>> {
    let courses = state.store.list_courses(!user.is_admin()).await?;
    Ok(Json(courses))
}

/// GET /api/courses/{id}
pub async fn get_course(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Json<Course>> {
    let course = state.store.find_course(id).await?.ok_or_else(course_not_found)?;
    Ok(Json(course))
}

/// POST /api/courses
pub async fn create_course(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    meta: RequestMeta,
    ApiJson(payload): ApiJson<CreateCourseRequest>,
) -> AppResult<impl IntoResponse> {
    let (Some(title), Some(description), Some(code)) = (
        present(payload.title),
        present(payload.description),
        present(payload.code),
    ) else {
        return Err(AppError::Validation("Please add all fields".to_string()));
    };

    let course = state
        .store
        .create_course(NewCourse {
            category: present(payload.category).unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
            level: parse_level(payload.level)?.unwrap_or_default(),
            tags: payload.tags.unwrap_or_default(),
            title,
            description,
            code,
        })
        .await?;

    tracing::info!("Course created: {} ({})", course.title, course.code);

    state
        .activity
        .log(
            admin.id,
            ActivityAction::CreateCourse,
            EntityType::Course,
            Some(course.id),
            format!("Course created: {} ({})", course.title, course.code),
            &meta,
        )
        .await;

    Ok((StatusCode::CREATED, Json(course)))
}

/// PUT /api/courses/{id}
pub async fn update_course(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    meta: RequestMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<UpdateCourseRequest>,
) -> AppResult<Json<Course>> {
    let patch = payload.into_patch()?;

    if patch.is_empty() {
        let course = state.store.find_course(id).await?.ok_or_else(course_not_found)?;
        return Ok(Json(course));
    }

    let course = state
        .store
        .update_course(id, patch)
        .await?
        .ok_or_else(course_not_found)?;

    state
        .activity
        .log(
            admin.id,
            ActivityAction::UpdateCourse,
            EntityType::Course,
            Some(course.id),
            format!("Course updated: {}", course.title),
            &meta,
        )
        .await;

    Ok(Json(course))
}

/// DELETE /api/courses/{id}
pub async fn delete_course(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    meta: RequestMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Json<DeletedResponse>> {
    let course = state
        .store
        .delete_course(id)
        .await?
        .ok_or_else(course_not_found)?;

    tracing::info!("Course deleted: {} ({})", course.title, course.code);

    state
        .activity
        .log(
            admin.id,
            ActivityAction::DeleteCourse,
            EntityType::Course,
            Some(id),
            format!("Course deleted: {}", course.title),
            &meta,
        )
        .await;

    Ok(Json(DeletedResponse { id }))
}

/// POST /api/courses/{id}/materials
pub async fn add_material(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    meta: RequestMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<MaterialRequest>,
) -> AppResult<impl IntoResponse> {
    let (Some(title), Some(kind), Some(link)) = (
        present(payload.title),
        present(payload.kind),
        present(payload.link),
    ) else {
        return Err(AppError::Validation(
            "Please provide material title, type and link".to_string(),
        ));
    };
    let kind: MaterialType = kind
        .parse()
        .map_err(|e: crate::db::models::UnknownVariant| AppError::Validation(e.to_string()))?;

    let details = format!("Added {} material: {}", kind, title);
    let course = state
        .store
        .add_material(id, NewMaterial { title, kind, link })
        .await?
        .ok_or_else(course_not_found)?;

    state
        .activity
        .log(
            admin.id,
            ActivityAction::UpdateCourse,
            EntityType::Course,
            Some(course.id),
            details,
            &meta,
        )
        .await;

    Ok((StatusCode::CREATED, Json(course)))
}

/// POST /api/courses/{id}/upload-cover (multipart field `cover`)
pub async fn upload_cover(
    State(state): State<AppState>,
    AdminUser(admin): AdminUser,
    meta: RequestMeta,
    ApiPath(id): ApiPath<Uuid>,
    mut multipart: Multipart,
) -> AppResult<Json<CoverResponse>> {
    // Check first so a missing course does not leave an orphaned file.
    if state.store.find_course(id).await?.is_none() {
        return Err(course_not_found());
    }

    let saved = save_image_field(
        &mut multipart,
        "cover",
        &state.config.upload_dir,
        COVER_DIR,
        "Please upload an image",
    )
    .await?;

    let course = state
        .store
        .update_course(
            id,
            CoursePatch {
                cover_image: Some(saved.url),
                ..Default::default()
            },
        )
        .await?
        .ok_or_else(course_not_found)?;

    state
        .activity
        .log(
            admin.id,
            ActivityAction::UpdateCourse,
            EntityType::Course,
            Some(course.id),
            format!("Updated cover image: {}", course.title),
            &meta,
        )
        .await;

    Ok(Json(CoverResponse {
        cover_image: course.cover_image,
    }))
}

/// GET /api/courses/materials/all
pub async fn all_materials(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
) -> AppResult<Json<Vec<MaterialEntry>>> {
    let courses = state.store.list_courses(false).await?;
    Ok(Json(flatten_materials(courses)))
}

/// GET /api/courses/search?q&category&level&page&limit
pub async fn search_courses(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> AppResult<Json<SearchResponse>> {
    let search = CourseSearch {
        published_only: !user.is_admin(),
        text: present(query.q),
        category: present(query.category),
        level: parse_level(query.level)?,
        page: query.page.unwrap_or(1).max(1),
        limit: query
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE),
    };

    let (courses, total) = state.store.search_courses(&search).await?;

    Ok(Json(SearchResponse {
        courses,
        page: search.page,
        pages: page_count(total, search.limit),
        total,
    }))
}

// ============================================================================
// Enrollment, completion and reviews
// ============================================================================

/// POST /api/courses/{id}/enroll
pub async fn enroll(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    meta: RequestMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Json<EnrollResponse>> {
    let course = state.store.find_course(id).await?.ok_or_else(course_not_found)?;

    let (inserted, enrolled_courses) = state
        .store
        .enroll(user.id, course.id)
        .await?
        .ok_or_else(user_not_found)?;

    if inserted {
        state
            .activity
            .log(
                user.id,
                ActivityAction::Enroll,
                EntityType::Course,
                Some(course.id),
                format!("Student enrolled in course: {}", course.title),
                &meta,
            )
            .await;
    }

    Ok(Json(EnrollResponse {
        message: "Enrolled successfully".to_string(),
        enrolled_courses,
    }))
}

async fn mark_completed(
    state: &AppState,
    user: &User,
    meta: &RequestMeta,
    course_id: Uuid,
) -> AppResult<Json<CompleteResponse>> {
    let course = state
        .store
        .find_course(course_id)
        .await?
        .ok_or_else(course_not_found)?;

    let (inserted, completed_courses) = state
        .store
        .complete(user.id, course.id)
        .await?
        .ok_or_else(user_not_found)?;

    if inserted {
        state
            .activity
            .log(
                user.id,
                ActivityAction::CompleteCourse,
                EntityType::Course,
                Some(course.id),
                format!("Course completed: {}", course.title),
                meta,
            )
            .await;
    }

    Ok(Json(CompleteResponse {
        message: "Course marked as completed".to_string(),
        completed_courses,
    }))
}

/// POST /api/courses/{id}/complete
pub async fn complete(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    meta: RequestMeta,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Json<CompleteResponse>> {
    mark_completed(&state, &user, &meta, id).await
}

/// POST /api/courses/complete-course with `{courseId}`; older clients use
/// this form.
pub async fn complete_by_body(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    meta: RequestMeta,
    ApiJson(payload): ApiJson<CompleteCourseRequest>,
) -> AppResult<Json<CompleteResponse>> {
    let course_id = payload
        .course_id
        .ok_or_else(|| AppError::Validation("Please provide courseId".to_string()))?;
    mark_completed(&state, &user, &meta, course_id).await
}

/// POST /api/courses/{id}/reviews
pub async fn add_review(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    meta: RequestMeta,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<ReviewRequest>,
) -> AppResult<impl IntoResponse> {
    let (Some(rating), Some(comment)) = (payload.rating, present(payload.comment)) else {
        return Err(AppError::Validation(
            "Please provide a rating and comment".to_string(),
        ));
    };
    if rating.fract() != 0.0 || !(1.0..=5.0).contains(&rating) {
        return Err(AppError::Validation(
            "Rating must be a whole number between 1 and 5".to_string(),
        ));
    }
    let rating = rating as u8;

    let course = state
        .store
        .add_review(
            id,
            NewReview {
                user: user.id,
                name: user.name.clone(),
                rating,
                comment,
            },
        )
        .await?
        .ok_or_else(course_not_found)?;

    state
        .activity
        .log(
            user.id,
            ActivityAction::ReviewCourse,
            EntityType::Course,
            Some(course.id),
            format!("Course rated {} stars: {}", rating, course.title),
            &meta,
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "Review added".to_string(),
        }),
    ))
}

// ============================================================================
// Student views
// ============================================================================

/// GET /api/courses/student/progress
pub async fn student_progress(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<ProgressResponse>> {
    let (enrolled, total_courses) = tokio::try_join!(
        state.store.courses_by_ids(&user.enrolled_courses),
        state.store.count_courses(),
    )?;

    let completed_count = user.completed_courses.len();

    Ok(Json(ProgressResponse {
        progress: progress_for(&user, &enrolled),
        overall_percentage: overall_percentage(completed_count, total_courses),
        total_courses,
        completed_count: completed_count as i64,
    }))
}

/// GET /api/courses/student/completed
pub async fn completed_courses(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<Vec<Course>>> {
    let courses = state.store.courses_by_ids(&user.completed_courses).await?;
    Ok(Json(courses))
}

/// GET /api/courses/student/activity
pub async fn student_activity(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> AppResult<Json<Vec<ActivityLog>>> {
    let (activities, _) = state
        .store
        .list_activity(user.id, 0, STUDENT_ACTIVITY_LIMIT)
        .await?;
    Ok(Json(activities))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn course(title: &str) -> Course {
        NewCourse {
            title: title.to_string(),
            description: "d".to_string(),
            code: title.to_uppercase(),
            category: DEFAULT_CATEGORY.to_string(),
            level: Level::Beginner,
            tags: vec![],
        }
        .into_course()
    }

    fn student(enrolled: Vec<Uuid>, completed: Vec<Uuid>) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            name: "S".to_string(),
            email: "s@cmr.com".to_string(),
            password_hash: String::new(),
            role: crate::db::models::Role::Student,
            phone: String::new(),
            bio: String::new(),
            organization: String::new(),
            avatar: String::new(),
            enrolled_courses: enrolled,
            completed_courses: completed,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_overall_percentage_uses_total_courses() {
        assert_eq!(overall_percentage(1, 4), 25);
        assert_eq!(overall_percentage(1, 3), 33);
        assert_eq!(overall_percentage(2, 3), 67);
        assert_eq!(overall_percentage(0, 0), 0);
    }

    #[test]
    fn test_progress_is_binary_per_enrolled_course() {
        let a = course("a");
        let b = course("b");
        let user = student(vec![a.id, b.id], vec![b.id]);
        let progress = progress_for(&user, &[a.clone(), b.clone()]);
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].percentage, 0);
        assert!(!progress[0].completed);
        assert_eq!(progress[1].percentage, 100);
        assert!(progress[1].completed);
    }

    #[test]
    fn test_flatten_materials_annotates_course() {
        let mut a = course("a");
        a.materials.push(
            NewMaterial {
                title: "Slides".to_string(),
                kind: MaterialType::Pdf,
                link: "https://example.com/a.pdf".to_string(),
            }
            .into(),
        );
        let b = course("b");
        let entries = flatten_materials(vec![a.clone(), b]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].course_name, "a");
        assert_eq!(entries[0].course_id, a.id);

        let json = serde_json::to_value(&entries[0]).unwrap();
        assert_eq!(json["type"], "pdf");
        assert_eq!(json["courseName"], "a");
    }

    #[test]
    fn test_update_rejects_blank_title() {
        let req = UpdateCourseRequest {
            title: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(req.into_patch().is_err());
    }

    #[test]
    fn test_update_materials_keep_or_assign_ids() {
        let existing = Uuid::new_v4();
        let patch = UpdateCourseRequest {
            materials: Some(vec![
                MaterialInput {
                    id: Some(existing),
                    title: "Old".to_string(),
                    kind: MaterialType::Note,
                    link: "text".to_string(),
                },
                MaterialInput {
                    id: None,
                    title: "New".to_string(),
                    kind: MaterialType::Video,
                    link: "https://example.com/v".to_string(),
                },
            ]),
            ..Default::default()
        }
        .into_patch()
        .unwrap();
        let materials = patch.materials.unwrap();
        assert_eq!(materials[0].id, existing);
        assert_ne!(materials[1].id, existing);
    }
}
