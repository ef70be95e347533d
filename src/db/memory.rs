//! In-process store backed by `RwLock`ed maps.
//!
//! Selected with `DATABASE_URL=memory://` for demos and used by the test
//! suite. Each mutation runs under a single write lock, so the
//! check-then-write sequences (duplicate email, duplicate review) are atomic.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::models::{
    push_unique, ActivityLog, Course, CoursePatch, CourseSearch, NewActivity, NewCourse,
    NewMaterial, NewReview, NewUser, ProfileUpdate, Role, User,
};
use super::store::{Store, StoreError, StoreResult};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, User>,
    courses: HashMap<Uuid, Course>,
    activity: Vec<ActivityLog>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(courses: &mut [Course]) {
    courses.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Number of query terms found in the course's searchable text.
fn text_score(course: &Course, terms: &[String]) -> usize {
    let mut haystack = tokens(&course.title);
    haystack.extend(tokens(&course.description));
    for tag in &course.tags {
        haystack.extend(tokens(tag));
    }
    terms
        .iter()
        .map(|term| haystack.iter().filter(|word| *word == term).count())
        .sum()
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let mut inner = self.inner.write().await;
        let email_taken = inner
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&user.email));
        if email_taken {
            return Err(StoreError::DuplicateEmail);
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            name: user.name,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            phone: String::new(),
            bio: String::new(),
            organization: String::new(),
            avatar: String::new(),
            enrolled_courses: Vec::new(),
            completed_courses: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let inner = self.inner.read().await;
        Ok(inner
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn list_users(&self, role: Option<Role>) -> StoreResult<Vec<User>> {
        let inner = self.inner.read().await;
        let mut users: Vec<User> = inner
            .users
            .values()
            .filter(|u| role.map_or(true, |r| u.role == r))
            .cloned()
            .collect();
        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Option<User>> {
        let mut inner = self.inner.write().await;
        Ok(inner.users.get_mut(&id).map(|user| {
            update.apply(user);
            user.updated_at = Utc::now();
            user.clone()
        }))
    }

    async fn set_password(&self, id: Uuid, password_hash: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        Ok(match inner.users.get_mut(&id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                user.updated_at = Utc::now();
                true
            }
            None => false,
        })
    }

    async fn enroll(&self, user: Uuid, course: Uuid) -> StoreResult<Option<(bool, Vec<Uuid>)>> {
        let mut inner = self.inner.write().await;
        Ok(inner.users.get_mut(&user).map(|u| {
            let inserted = push_unique(&mut u.enrolled_courses, course);
            (inserted, u.enrolled_courses.clone())
        }))
    }

    async fn complete(
        &self,
        user: Uuid,
        course: Uuid,
    ) -> StoreResult<Option<(bool, Vec<Uuid>)>> {
        let mut inner = self.inner.write().await;
        Ok(inner.users.get_mut(&user).map(|u| {
            let inserted = push_unique(&mut u.completed_courses, course);
            (inserted, u.completed_courses.clone())
        }))
    }

    async fn list_courses(&self, published_only: bool) -> StoreResult<Vec<Course>> {
        let inner = self.inner.read().await;
        let mut courses: Vec<Course> = inner
            .courses
            .values()
            .filter(|c| !published_only || c.is_published)
            .cloned()
            .collect();
        newest_first(&mut courses);
        Ok(courses)
    }

    async fn find_course(&self, id: Uuid) -> StoreResult<Option<Course>> {
        Ok(self.inner.read().await.courses.get(&id).cloned())
    }

    async fn courses_by_ids(&self, ids: &[Uuid]) -> StoreResult<Vec<Course>> {
        let inner = self.inner.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| inner.courses.get(id).cloned())
            .collect())
    }

    async fn count_courses(&self) -> StoreResult<i64> {
        Ok(self.inner.read().await.courses.len() as i64)
    }

    async fn create_course(&self, course: NewCourse) -> StoreResult<Course> {
        let mut inner = self.inner.write().await;
        if inner.courses.values().any(|c| c.code == course.code) {
            return Err(StoreError::DuplicateCode(course.code));
        }
        let course = course.into_course();
        inner.courses.insert(course.id, course.clone());
        Ok(course)
    }

    async fn update_course(&self, id: Uuid, patch: CoursePatch) -> StoreResult<Option<Course>> {
        let mut inner = self.inner.write().await;
        if let Some(code) = &patch.code {
            if inner.courses.values().any(|c| c.id != id && &c.code == code) {
                return Err(StoreError::DuplicateCode(code.clone()));
            }
        }
        Ok(inner.courses.get_mut(&id).map(|course| {
            patch.apply(course);
            course.clone()
        }))
    }

    async fn delete_course(&self, id: Uuid) -> StoreResult<Option<Course>> {
        Ok(self.inner.write().await.courses.remove(&id))
    }

    async fn add_material(&self, id: Uuid, material: NewMaterial) -> StoreResult<Option<Course>> {
        let mut inner = self.inner.write().await;
        Ok(inner.courses.get_mut(&id).map(|course| {
            course.materials.push(material.into());
            course.updated_at = Utc::now();
            course.clone()
        }))
    }

    async fn add_review(&self, id: Uuid, review: NewReview) -> StoreResult<Option<Course>> {
        let mut inner = self.inner.write().await;
        let Some(course) = inner.courses.get_mut(&id) else {
            return Ok(None);
        };
        if course.has_review_from(review.user) {
            return Err(StoreError::AlreadyReviewed);
        }
        course.reviews.push(review.into());
        course.recompute_rating();
        course.updated_at = Utc::now();
        Ok(Some(course.clone()))
    }

    async fn search_courses(&self, search: &CourseSearch) -> StoreResult<(Vec<Course>, i64)> {
        let inner = self.inner.read().await;
        let terms = search.text.as_deref().map(tokens).unwrap_or_default();

        let mut matches: Vec<(usize, &Course)> = inner
            .courses
            .values()
            .filter(|c| !search.published_only || c.is_published)
            .filter(|c| search.category.as_ref().map_or(true, |cat| &c.category == cat))
            .filter(|c| search.level.map_or(true, |level| c.level == level))
            .map(|c| (text_score(c, &terms), c))
            .filter(|(score, _)| terms.is_empty() || *score > 0)
            .collect();

        matches.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then(b.created_at.cmp(&a.created_at)));

        let total = matches.len() as i64;
        let courses = matches
            .into_iter()
            .skip(search.offset().max(0) as usize)
            .take(search.limit.max(0) as usize)
            .map(|(_, c)| c.clone())
            .collect();
        Ok((courses, total))
    }

    async fn insert_activity(&self, entry: NewActivity) -> StoreResult<()> {
        self.inner.write().await.activity.push(entry.into());
        Ok(())
    }

    async fn list_activity(
        &self,
        user: Uuid,
        offset: i64,
        limit: i64,
    ) -> StoreResult<(Vec<ActivityLog>, i64)> {
        let inner = self.inner.read().await;
        // Insertion order is chronological, so reversing gives newest first.
        let entries: Vec<&ActivityLog> =
            inner.activity.iter().rev().filter(|a| a.user == user).collect();
        let total = entries.len() as i64;
        let page = entries
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn ping(&self) -> StoreResult<Duration> {
        let start = Instant::now();
        let _guard = self.inner.read().await;
        Ok(start.elapsed())
    }

    async fn close(&self) {
        tracing::debug!("Memory store closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{Level, MaterialType};

    fn new_course(code: &str, title: &str) -> NewCourse {
        NewCourse {
            title: title.to_string(),
            description: "A course about things".to_string(),
            code: code.to_string(),
            category: "Programming".to_string(),
            level: Level::Beginner,
            tags: vec!["rust".to_string()],
        }
    }

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Student".to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            role: Role::Student,
        }
    }

    fn review_from(user: Uuid, rating: u8) -> NewReview {
        NewReview {
            user,
            name: "Student".to_string(),
            rating,
            comment: "Nice".to_string(),
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_is_rejected_case_insensitively() {
        let store = MemoryStore::new();
        store.create_user(new_user("a@example.com")).await.unwrap();
        let err = store.create_user(new_user("A@Example.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[tokio::test]
    async fn test_enroll_twice_keeps_one_entry() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("a@example.com")).await.unwrap();
        let course = Uuid::new_v4();

        let (first, _) = store.enroll(user.id, course).await.unwrap().unwrap();
        let (second, list) = store.enroll(user.id, course).await.unwrap().unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(list, vec![course]);
    }

    #[tokio::test]
    async fn test_enroll_unknown_user_is_none() {
        let store = MemoryStore::new();
        let result = store.enroll(Uuid::new_v4(), Uuid::new_v4()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_second_review_rejected_and_reviews_unchanged() {
        let store = MemoryStore::new();
        let course = store.create_course(new_course("C1", "Course")).await.unwrap();
        let user = Uuid::new_v4();

        store.add_review(course.id, review_from(user, 5)).await.unwrap();
        let err = store
            .add_review(course.id, review_from(user, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyReviewed));

        let stored = store.find_course(course.id).await.unwrap().unwrap();
        assert_eq!(stored.reviews.len(), 1);
        assert_eq!(stored.average_rating, 5.0);
    }

    #[tokio::test]
    async fn test_reviews_recompute_aggregates() {
        let store = MemoryStore::new();
        let course = store.create_course(new_course("C1", "Course")).await.unwrap();
        for rating in [5, 3, 4] {
            store
                .add_review(course.id, review_from(Uuid::new_v4(), rating))
                .await
                .unwrap();
        }
        let stored = store.find_course(course.id).await.unwrap().unwrap();
        assert_eq!(stored.num_reviews, 3);
        assert_eq!(stored.average_rating, 4.0);
    }

    #[tokio::test]
    async fn test_duplicate_code_rejected() {
        let store = MemoryStore::new();
        store.create_course(new_course("C1", "One")).await.unwrap();
        let err = store.create_course(new_course("C1", "Two")).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateCode(code) if code == "C1"));
    }

    #[tokio::test]
    async fn test_list_courses_hides_drafts_when_published_only() {
        let store = MemoryStore::new();
        let draft = store.create_course(new_course("D1", "Draft")).await.unwrap();
        let live = store.create_course(new_course("L1", "Live")).await.unwrap();
        store
            .update_course(
                live.id,
                CoursePatch {
                    is_published: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let visible = store.list_courses(true).await.unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, live.id);
        assert_eq!(store.list_courses(false).await.unwrap().len(), 2);
        assert!(visible.iter().all(|c| c.id != draft.id));
    }

    #[tokio::test]
    async fn test_add_material_appends() {
        let store = MemoryStore::new();
        let course = store.create_course(new_course("C1", "Course")).await.unwrap();
        let updated = store
            .add_material(
                course.id,
                NewMaterial {
                    title: "Slides".to_string(),
                    kind: MaterialType::Pdf,
                    link: "https://example.com/slides.pdf".to_string(),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.materials.len(), 1);
        assert_eq!(updated.materials[0].kind, MaterialType::Pdf);
    }

    #[tokio::test]
    async fn test_search_ranks_by_term_hits_and_paginates() {
        let store = MemoryStore::new();
        store
            .create_course(new_course("R1", "Rust basics"))
            .await
            .unwrap();
        store
            .create_course(new_course("R2", "Rust and more Rust"))
            .await
            .unwrap();
        store
            .create_course(new_course("P1", "Python"))
            .await
            .unwrap();

        let search = CourseSearch {
            published_only: false,
            text: Some("rust".to_string()),
            category: None,
            level: None,
            page: 1,
            limit: 1,
        };
        let (courses, total) = store.search_courses(&search).await.unwrap();
        // Every course is tagged "rust", so all three match.
        assert_eq!(total, 3);
        assert_eq!(courses.len(), 1);
        assert_eq!(courses[0].code, "R2");
    }

    #[tokio::test]
    async fn test_activity_is_newest_first_and_scoped_to_user() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        for details in ["first", "second"] {
            store
                .insert_activity(NewActivity {
                    user,
                    action: crate::db::models::ActivityAction::Login,
                    entity_type: crate::db::models::EntityType::Auth,
                    entity_id: Some(user),
                    details: details.to_string(),
                    ip_address: "127.0.0.1".to_string(),
                    user_agent: "test".to_string(),
                })
                .await
                .unwrap();
        }
        let (entries, total) = store.list_activity(user, 0, 10).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(entries[0].details, "second");

        let (other, other_total) = store.list_activity(Uuid::new_v4(), 0, 10).await.unwrap();
        assert!(other.is_empty());
        assert_eq!(other_total, 0);
    }
}
