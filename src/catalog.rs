//! Users, competencies, entries and enrollments.
//!
//! Management operations for configurators and admins. Every call takes the
//! acting [`Principal`] and checks its role before touching the store.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::access::{ADMIN_ONLY, Principal, STAFF, require_role};
use crate::error::{FlexageError, Result};
use crate::model::{
    Competency, CompetencyId, Enrollment, Entry, EntryId, Role, User, UserId,
};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompetencyPatch {
    pub name: Option<String>,
    pub general_instructions: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryPatch {
    pub title: Option<String>,
    pub instructions: Option<String>,
    pub rubric: Option<serde_json::Value>,
}

pub struct Catalog {
    store: Arc<dyn Store>,
}

impl Catalog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    // --- users ---

    pub fn register_user(&self, actor: &Principal, user: User) -> Result<User> {
        require_role(actor, ADMIN_ONLY)?;

        if self.store.find_user_by_username(&user.username)?.is_some() {
            return Err(FlexageError::Conflict("Username already registered".into()));
        }
        if let Some(email) = &user.email
            && self.store.find_user_by_email(email)?.is_some()
        {
            return Err(FlexageError::Conflict("Email already registered".into()));
        }

        let user = self.store.insert_user(user).map_err(conflict_on_duplicate)?;
        info!(user_id = %user.id, username = %user.username, role = %user.role, "user registered");
        Ok(user)
    }

    pub fn list_users(&self, actor: &Principal) -> Result<Vec<User>> {
        require_role(actor, STAFF)?;
        Ok(self.store.list_users()?)
    }

    // --- competencies ---

    pub fn create_competency(
        &self,
        actor: &Principal,
        name: &str,
        general_instructions: Option<String>,
    ) -> Result<Competency> {
        require_role(actor, STAFF)?;
        let comp = self
            .store
            .insert_competency(Competency::new(name, general_instructions, Some(actor.id)))?;
        info!(competency_id = %comp.id, name = %comp.name, "competency created");
        Ok(comp)
    }

    pub fn get_competency(&self, actor: &Principal, id: CompetencyId) -> Result<Competency> {
        require_role(actor, STAFF)?;
        self.require_competency(id)
    }

    pub fn list_competencies(&self, actor: &Principal) -> Result<Vec<Competency>> {
        require_role(actor, STAFF)?;
        Ok(self.store.list_competencies()?)
    }

    pub fn update_competency(
        &self,
        actor: &Principal,
        id: CompetencyId,
        patch: CompetencyPatch,
    ) -> Result<Competency> {
        require_role(actor, STAFF)?;
        let mut comp = self.require_competency(id)?;
        if let Some(name) = patch.name {
            comp.name = name;
        }
        if let Some(instructions) = patch.general_instructions {
            comp.general_instructions = Some(instructions);
        }
        comp.updated_at = Utc::now();
        self.store
            .update_competency(comp)?
            .ok_or_else(|| FlexageError::not_found("Competency", id))
    }

    /// Removes the competency with its entries, enrollments, states,
    /// submissions and outcomes.
    pub fn delete_competency(&self, actor: &Principal, id: CompetencyId) -> Result<Competency> {
        require_role(actor, STAFF)?;
        let comp = self
            .store
            .delete_competency(id)?
            .ok_or_else(|| FlexageError::not_found("Competency", id))?;
        info!(competency_id = %id, "competency deleted");
        Ok(comp)
    }

    // --- entries ---

    pub fn create_entry(
        &self,
        actor: &Principal,
        competency_id: CompetencyId,
        title: &str,
        instructions: Option<String>,
        rubric: serde_json::Value,
    ) -> Result<Entry> {
        require_role(actor, STAFF)?;
        self.require_competency(competency_id)?;

        let mut entry = Entry::new(competency_id, title).with_rubric(rubric);
        entry.instructions = instructions;
        entry.created_by = Some(actor.id);
        let entry = self.store.insert_entry(entry)?;
        info!(entry_id = %entry.id, %competency_id, "entry created");
        Ok(entry)
    }

    pub fn get_entry(&self, actor: &Principal, id: EntryId) -> Result<Entry> {
        require_role(actor, STAFF)?;
        self.store
            .get_entry(id)?
            .ok_or_else(|| FlexageError::not_found("Entry", id))
    }

    pub fn list_entries(&self, actor: &Principal, competency_id: CompetencyId) -> Result<Vec<Entry>> {
        require_role(actor, STAFF)?;
        self.require_competency(competency_id)?;
        Ok(self.store.list_entries(competency_id)?)
    }

    pub fn update_entry(&self, actor: &Principal, id: EntryId, patch: EntryPatch) -> Result<Entry> {
        let mut entry = self.get_entry(actor, id)?;
        if let Some(title) = patch.title {
            entry.title = title;
        }
        if let Some(instructions) = patch.instructions {
            entry.instructions = Some(instructions);
        }
        if let Some(rubric) = patch.rubric {
            entry.rubric = rubric;
        }
        entry.updated_at = Utc::now();
        self.store
            .update_entry(entry)?
            .ok_or_else(|| FlexageError::not_found("Entry", id))
    }

    pub fn delete_entry(&self, actor: &Principal, id: EntryId) -> Result<Entry> {
        require_role(actor, STAFF)?;
        let entry = self
            .store
            .delete_entry(id)?
            .ok_or_else(|| FlexageError::not_found("Entry", id))?;
        info!(entry_id = %id, "entry deleted");
        Ok(entry)
    }

    // --- enrollments ---

    pub fn enroll(
        &self,
        actor: &Principal,
        student_id: UserId,
        competency_id: CompetencyId,
    ) -> Result<Enrollment> {
        require_role(actor, STAFF)?;
        let student = self
            .store
            .get_user(student_id)?
            .ok_or_else(|| FlexageError::not_found("Student", student_id))?;
        self.require_competency(competency_id)?;

        if student.role != Role::Student {
            return Err(FlexageError::Conflict(format!(
                "user {} is not a student",
                student.username
            )));
        }
        if self.store.is_enrolled(student_id, competency_id)? {
            return Err(FlexageError::Conflict(
                "Student already enrolled in this competency".into(),
            ));
        }

        let enrollment = self
            .store
            .insert_enrollment(Enrollment {
                student_id,
                competency_id,
                enrolled_at: Utc::now(),
            })
            .map_err(conflict_on_duplicate)?;
        info!(%student_id, %competency_id, "student enrolled");
        Ok(enrollment)
    }

    pub fn unenroll(
        &self,
        actor: &Principal,
        student_id: UserId,
        competency_id: CompetencyId,
    ) -> Result<()> {
        require_role(actor, STAFF)?;
        if !self.store.delete_enrollment(student_id, competency_id)? {
            return Err(FlexageError::not_found(
                "Enrollment",
                format!("{student_id}/{competency_id}"),
            ));
        }
        info!(%student_id, %competency_id, "student unenrolled");
        Ok(())
    }

    pub fn enrolled_students(&self, actor: &Principal, competency_id: CompetencyId) -> Result<Vec<User>> {
        require_role(actor, STAFF)?;
        self.require_competency(competency_id)?;
        Ok(self.store.enrolled_students(competency_id)?)
    }

    /// Students may list their own competencies; staff may list anyone's.
    pub fn enrolled_competencies(&self, actor: &Principal, student_id: UserId) -> Result<Vec<Competency>> {
        if actor.id != student_id {
            require_role(actor, STAFF)?;
        } else if !actor.active {
            return Err(FlexageError::Forbidden("inactive user".into()));
        }
        Ok(self.store.enrolled_competencies(student_id)?)
    }

    fn require_competency(&self, id: CompetencyId) -> Result<Competency> {
        self.store
            .get_competency(id)?
            .ok_or_else(|| FlexageError::not_found("Competency", id))
    }
}

fn conflict_on_duplicate(e: StoreError) -> FlexageError {
    match e {
        StoreError::UniqueViolation(what) => FlexageError::Conflict(what),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::MemoryStore;

    fn catalog() -> (Catalog, Arc<MemoryStore>, Principal) {
        let store = Arc::new(MemoryStore::new());
        let admin = store.insert_user(User::new("root", Role::Admin)).unwrap();
        (Catalog::new(store.clone()), store, Principal::from(&admin))
    }

    #[test]
    fn register_rejects_duplicates() {
        let (cat, _, admin) = catalog();
        let mut user = User::new("ana", Role::Student);
        user.email = Some("ana@example.edu".into());
        cat.register_user(&admin, user).unwrap();

        let err = cat.register_user(&admin, User::new("ana", Role::Student)).unwrap_err();
        assert!(matches!(err, FlexageError::Conflict(_)));

        let mut twin = User::new("ana2", Role::Student);
        twin.email = Some("ana@example.edu".into());
        assert!(matches!(
            cat.register_user(&admin, twin),
            Err(FlexageError::Conflict(_))
        ));
    }

    #[test]
    fn only_admin_registers_users() {
        let (cat, store, _) = catalog();
        let conf = store.insert_user(User::new("cfg", Role::Configurator)).unwrap();
        let err = cat
            .register_user(&Principal::from(&conf), User::new("x", Role::Student))
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert!(cat.list_users(&Principal::from(&conf)).is_ok());
    }

    #[test]
    fn students_cannot_manage_catalog() {
        let (cat, store, _) = catalog();
        let student = store.insert_user(User::new("stu", Role::Student)).unwrap();
        let err = cat
            .create_competency(&Principal::from(&student), "Math", None)
            .unwrap_err();
        assert!(matches!(err, FlexageError::Forbidden(_)));
    }

    #[test]
    fn competency_and_entry_crud() {
        let (cat, _, admin) = catalog();
        let comp = cat.create_competency(&admin, "Math", Some("Show work".into())).unwrap();
        assert_eq!(comp.created_by, Some(admin.id));

        let updated = cat
            .update_competency(
                &admin,
                comp.id,
                CompetencyPatch {
                    name: Some("Mathematics".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Mathematics");
        assert_eq!(updated.general_instructions.as_deref(), Some("Show work"));
        assert!(updated.updated_at >= comp.updated_at);

        let entry = cat
            .create_entry(&admin, comp.id, "Proofs", None, json!({"rigour": 10}))
            .unwrap();
        let entry = cat
            .update_entry(
                &admin,
                entry.id,
                EntryPatch {
                    instructions: Some("Prove it".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(entry.instructions.as_deref(), Some("Prove it"));
        assert_eq!(entry.rubric, json!({"rigour": 10}));
        assert_eq!(cat.list_entries(&admin, comp.id).unwrap().len(), 1);

        cat.delete_competency(&admin, comp.id).unwrap();
        assert!(matches!(
            cat.get_entry(&admin, entry.id),
            Err(FlexageError::NotFound { .. })
        ));
    }

    #[test]
    fn entry_needs_existing_competency() {
        let (cat, _, admin) = catalog();
        let err = cat
            .create_entry(&admin, uuid::Uuid::new_v4(), "Orphan", None, json!({}))
            .unwrap_err();
        assert!(matches!(err, FlexageError::NotFound { kind: "Competency", .. }));
    }

    #[test]
    fn enrollment_rules() {
        let (cat, store, admin) = catalog();
        let comp = cat.create_competency(&admin, "Art", None).unwrap();
        let student = store.insert_user(User::new("stu", Role::Student)).unwrap();
        let conf = store.insert_user(User::new("cfg", Role::Configurator)).unwrap();

        cat.enroll(&admin, student.id, comp.id).unwrap();
        assert!(matches!(
            cat.enroll(&admin, student.id, comp.id),
            Err(FlexageError::Conflict(_))
        ));
        assert!(matches!(
            cat.enroll(&admin, conf.id, comp.id),
            Err(FlexageError::Conflict(_))
        ));
        assert!(matches!(
            cat.enroll(&admin, uuid::Uuid::new_v4(), comp.id),
            Err(FlexageError::NotFound { .. })
        ));

        assert_eq!(cat.enrolled_students(&admin, comp.id).unwrap().len(), 1);
        let own = cat
            .enrolled_competencies(&Principal::from(&student), student.id)
            .unwrap();
        assert_eq!(own[0].id, comp.id);

        cat.unenroll(&admin, student.id, comp.id).unwrap();
        assert!(matches!(
            cat.unenroll(&admin, student.id, comp.id),
            Err(FlexageError::NotFound { .. })
        ));
    }

    #[test]
    fn students_only_see_their_own_enrollments() {
        let (cat, store, _) = catalog();
        let a = store.insert_user(User::new("a", Role::Student)).unwrap();
        let b = store.insert_user(User::new("b", Role::Student)).unwrap();
        assert!(matches!(
            cat.enrolled_competencies(&Principal::from(&a), b.id),
            Err(FlexageError::Forbidden(_))
        ));
    }
}
