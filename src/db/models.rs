//! Database Models - the canonical user, course and activity-log shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Error returned when a stored or submitted enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Declares a string-backed enum with matching `as_str`, `Display` and
/// `FromStr` implementations.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    _ => Err(UnknownVariant { kind: $kind, value: s.to_string() }),
                }
            }
        }
    };
}

string_enum!(
    /// Account role.
    Role, "role" {
        Admin => "admin",
        Student => "student",
    }
);

string_enum!(
    Level, "level" {
        Beginner => "Beginner",
        Intermediate => "Intermediate",
        Advanced => "Advanced",
    }
);

string_enum!(
    /// Kind of resource a material points at. Notes carry their text in `link`.
    MaterialType, "material type" {
        Pdf => "pdf",
        Video => "video",
        Image => "image",
        Note => "note",
    }
);

string_enum!(
    ActivityAction, "activity action" {
        Login => "LOGIN",
        Logout => "LOGOUT",
        Enroll => "ENROLL",
        CompleteCourse => "COMPLETE_COURSE",
        ViewMaterial => "VIEW_MATERIAL",
        CreateCourse => "CREATE_COURSE",
        UpdateCourse => "UPDATE_COURSE",
        DeleteCourse => "DELETE_COURSE",
        UpdateProfile => "UPDATE_PROFILE",
        ChangePassword => "CHANGE_PASSWORD",
        ReviewCourse => "REVIEW_COURSE",
    }
);

string_enum!(
    EntityType, "entity type" {
        Course => "COURSE",
        Material => "MATERIAL",
        User => "USER",
        Profile => "PROFILE",
        Auth => "AUTH",
    }
);

impl Default for Level {
    fn default() -> Self {
        Level::Beginner
    }
}

pub const DEFAULT_CATEGORY: &str = "Uncategorized";

// ============================================================================
// Users
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    pub phone: String,
    pub bio: String,
    pub organization: String,
    pub avatar: String,
    pub enrolled_courses: Vec<Uuid>,
    pub completed_courses: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// New user for insertion; the password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Profile fields a user may change about themselves. `None` keeps the
/// stored value.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub bio: Option<String>,
    pub organization: Option<String>,
    pub avatar: Option<String>,
}

impl ProfileUpdate {
    pub fn apply(self, user: &mut User) {
        if let Some(name) = self.name {
            user.name = name;
        }
        if let Some(phone) = self.phone {
            user.phone = phone;
        }
        if let Some(bio) = self.bio {
            user.bio = bio;
        }
        if let Some(organization) = self.organization {
            user.organization = organization;
        }
        if let Some(avatar) = self.avatar {
            user.avatar = avatar;
        }
    }
}

/// Insert `id` unless already present. Returns whether the list changed.
pub fn push_unique(ids: &mut Vec<Uuid>, id: Uuid) -> bool {
    if ids.contains(&id) {
        false
    } else {
        ids.push(id);
        true
    }
}

// ============================================================================
// Courses
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: MaterialType,
    pub link: String,
}

#[derive(Debug, Clone)]
pub struct NewMaterial {
    pub title: String,
    pub kind: MaterialType,
    pub link: String,
}

impl From<NewMaterial> for Material {
    fn from(m: NewMaterial) -> Self {
        Material {
            id: Uuid::new_v4(),
            title: m.title,
            kind: m.kind,
            link: m.link,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub rating: u8,
    pub comment: String,
    pub user: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReview {
    pub user: Uuid,
    pub name: String,
    pub rating: u8,
    pub comment: String,
}

impl From<NewReview> for Review {
    fn from(r: NewReview) -> Self {
        Review {
            id: Uuid::new_v4(),
            name: r.name,
            rating: r.rating,
            comment: r.comment,
            user: r.user,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub code: String,
    pub category: String,
    pub level: Level,
    pub tags: Vec<String>,
    pub is_published: bool,
    pub cover_image: String,
    pub materials: Vec<Material>,
    pub reviews: Vec<Review>,
    pub average_rating: f64,
    pub num_reviews: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Course {
    pub fn has_review_from(&self, user: Uuid) -> bool {
        self.reviews.iter().any(|r| r.user == user)
    }

    /// Re-derive `num_reviews` and `average_rating` from the embedded reviews.
    pub fn recompute_rating(&mut self) {
        self.num_reviews = self.reviews.len() as i32;
        self.average_rating = if self.reviews.is_empty() {
            0.0
        } else {
            let sum: u32 = self.reviews.iter().map(|r| u32::from(r.rating)).sum();
            f64::from(sum) / self.reviews.len() as f64
        };
    }
}

/// New course for creation. Always starts as an unpublished draft with no
/// materials or reviews.
#[derive(Debug, Clone)]
pub struct NewCourse {
    pub title: String,
    pub description: String,
    pub code: String,
    pub category: String,
    pub level: Level,
    pub tags: Vec<String>,
}

impl NewCourse {
    pub fn into_course(self) -> Course {
        let now = Utc::now();
        Course {
            id: Uuid::new_v4(),
            title: self.title,
            description: self.description,
            code: self.code,
            category: self.category,
            level: self.level,
            tags: self.tags,
            is_published: false,
            cover_image: String::new(),
            materials: Vec::new(),
            reviews: Vec::new(),
            average_rating: 0.0,
            num_reviews: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Unrestricted partial update of a course. Every field the caller sends
/// overwrites the stored one, derived rating fields included.
#[derive(Debug, Clone, Default)]
pub struct CoursePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub code: Option<String>,
    pub category: Option<String>,
    pub level: Option<Level>,
    pub tags: Option<Vec<String>>,
    pub is_published: Option<bool>,
    pub cover_image: Option<String>,
    pub materials: Option<Vec<Material>>,
    pub average_rating: Option<f64>,
    pub num_reviews: Option<i32>,
}

impl CoursePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.code.is_none()
            && self.category.is_none()
            && self.level.is_none()
            && self.tags.is_none()
            && self.is_published.is_none()
            && self.cover_image.is_none()
            && self.materials.is_none()
            && self.average_rating.is_none()
            && self.num_reviews.is_none()
    }

    pub fn apply(self, course: &mut Course) {
        if let Some(v) = self.title {
            course.title = v;
        }
        if let Some(v) = self.description {
            course.description = v;
        }
        if let Some(v) = self.code {
            course.code = v;
        }
        if let Some(v) = self.category {
            course.category = v;
        }
        if let Some(v) = self.level {
            course.level = v;
        }
        if let Some(v) = self.tags {
            course.tags = v;
        }
        if let Some(v) = self.is_published {
            course.is_published = v;
        }
        if let Some(v) = self.cover_image {
            course.cover_image = v;
        }
        if let Some(v) = self.materials {
            course.materials = v;
        }
        if let Some(v) = self.average_rating {
            course.average_rating = v;
        }
        if let Some(v) = self.num_reviews {
            course.num_reviews = v;
        }
        course.updated_at = Utc::now();
    }
}

/// Filters for course search. `page` is 1-based.
#[derive(Debug, Clone)]
pub struct CourseSearch {
    pub published_only: bool,
    pub text: Option<String>,
    pub category: Option<String>,
    pub level: Option<Level>,
    pub page: i64,
    pub limit: i64,
}

impl CourseSearch {
    pub fn offset(&self) -> i64 {
        page_offset(self.page, self.limit)
    }
}

/// A material flattened out of its course, for the admin material index.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialEntry {
    #[serde(flatten)]
    pub material: Material,
    pub course_name: String,
    pub course_id: Uuid,
}

// ============================================================================
// Activity log
// ============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub user: Uuid,
    pub action: ActivityAction,
    pub entity_type: EntityType,
    pub entity_id: Option<Uuid>,
    pub details: String,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewActivity {
    pub user: Uuid,
    pub action: ActivityAction,
    pub entity_type: EntityType,
    pub entity_id: Option<Uuid>,
    pub details: String,
    pub ip_address: String,
    pub user_agent: String,
}

impl From<NewActivity> for ActivityLog {
    fn from(a: NewActivity) -> Self {
        ActivityLog {
            id: Uuid::new_v4(),
            user: a.user,
            action: a.action,
            entity_type: a.entity_type,
            entity_id: a.entity_id,
            details: a.details,
            ip_address: a.ip_address,
            user_agent: a.user_agent,
            created_at: Utc::now(),
        }
    }
}

/// Rows to skip for 1-based `page`. Saturates instead of overflowing, so a
/// huge page number just lands past the last row.
pub fn page_offset(page: i64, limit: i64) -> i64 {
    page.saturating_sub(1).max(0).saturating_mul(limit.max(0))
}

/// Number of pages needed for `total` items at `limit` per page.
pub fn page_count(total: i64, limit: i64) -> i64 {
    if limit <= 0 {
        0
    } else {
        (total + limit - 1) / limit
    }
}
