//! Relationship descriptors and bidirectional reference sync.

use crate::entity::Entity;
use crate::error::{CoreError, CoreResult};

/// Cascade policy of a relationship, drawn from
/// {save-update, delete-orphan, all}.
///
/// `all` implies save-update; delete-orphan is always opted into
/// separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cascade {
    save_update: bool,
    delete_orphan: bool,
    all: bool,
}

impl Cascade {
    /// No cascading.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            save_update: false,
            delete_orphan: false,
            all: false,
        }
    }

    /// Cascade adds/tracks to newly related entities.
    #[must_use]
    pub const fn save_update() -> Self {
        Self {
            save_update: true,
            delete_orphan: false,
            all: false,
        }
    }

    /// Everything save-update covers.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            save_update: false,
            delete_orphan: false,
            all: true,
        }
    }

    /// Adds delete-orphan to the policy.
    #[must_use]
    pub const fn and_delete_orphan(mut self) -> Self {
        self.delete_orphan = true;
        self
    }

    /// Whether newly related entities are tracked/added.
    #[must_use]
    pub const fn includes_save_update(&self) -> bool {
        self.save_update || self.all
    }

    /// Whether orphaned previously-related entities are deleted.
    #[must_use]
    pub const fn includes_delete_orphan(&self) -> bool {
        self.delete_orphan
    }
}

/// One typed, bidirectional edge declared on an entity type.
///
/// A relationship never owns either endpoint; it only keeps the two
/// references consistent and tells the session what to cascade.
#[derive(Debug, Clone)]
pub struct Relationship {
    /// Slot name on the owning entity.
    pub name: String,
    /// Entity name the slot accepts.
    pub target_entity: String,
    /// Reciprocal slot name on the target, if the edge is bidirectional.
    pub back_populates: Option<String>,
    /// Cascade policy.
    pub cascade: Cascade,
}

impl Relationship {
    /// Creates a unidirectional relationship with no cascading.
    #[must_use]
    pub fn new(name: impl Into<String>, target_entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_entity: target_entity.into(),
            back_populates: None,
            cascade: Cascade::none(),
        }
    }

    /// Names the reciprocal slot on the target entity.
    #[must_use]
    pub fn back_populates(mut self, attribute: impl Into<String>) -> Self {
        self.back_populates = Some(attribute.into());
        self
    }

    /// Sets the cascade policy.
    #[must_use]
    pub fn cascade(mut self, cascade: Cascade) -> Self {
        self.cascade = cascade;
        self
    }
}

/// Follow-up work an assignment asks its session to perform.
///
/// [`assign`] itself only synchronizes references; when a session is
/// orchestrating the assignment it applies these afterwards.
#[derive(Debug)]
pub enum CascadeAction {
    /// Track/add the newly related entity (save-update / all).
    SaveUpdate(Entity),
    /// Delete the orphaned previously-related entity (delete-orphan).
    DeleteOrphan(Entity),
}

/// Assigns a related value to `owner`'s relationship slot, keeping both
/// sides' references consistent.
///
/// The algorithm, atomically from the caller's perspective:
///
/// 1. No-op when the new value is the identical instance.
/// 2. Set the new value on the owner's slot.
/// 3. If a reciprocal is named: clear the reciprocal on the previously
///    related instance (only if it still points back at this owner), and
///    set the reciprocal on the newly related instance (only if it does not
///    already point back).
///
/// Returned actions carry the cascade consequences for a session to apply.
///
/// # Errors
///
/// Fails with [`CoreError::RelationshipType`] when the value belongs to a
/// different entity type than the relationship targets, and propagates
/// stale-instance failures from the reference writes.
pub fn assign(
    owner: &Entity,
    relationship: &Relationship,
    value: Option<Entity>,
) -> CoreResult<Vec<CascadeAction>> {
    let current = owner.related(&relationship.name);
    match (&current, &value) {
        (None, None) => return Ok(Vec::new()),
        (Some(old), Some(new)) if old.same_instance(new) => return Ok(Vec::new()),
        _ => {}
    }

    if let Some(new) = &value {
        if new.entity_name() != relationship.target_entity {
            return Err(CoreError::RelationshipType {
                relationship: relationship.name.clone(),
                expected: relationship.target_entity.clone(),
                actual: new.entity_name().to_string(),
            });
        }
    }

    owner.set_related(&relationship.name, value.clone())?;

    let mut actions = Vec::new();
    if let Some(back) = &relationship.back_populates {
        if let Some(previous) = current {
            let still_points_back = previous
                .related(back)
                .is_some_and(|r| r.same_instance(owner));
            if still_points_back {
                previous.set_related(back, None)?;
            }
            if relationship.cascade.includes_delete_orphan() {
                actions.push(CascadeAction::DeleteOrphan(previous));
            }
        }
        if let Some(new) = value {
            let already_points_back = new.related(back).is_some_and(|r| r.same_instance(owner));
            if !already_points_back {
                new.set_related(back, Some(owner.clone()))?;
            }
            if relationship.cascade.includes_save_update() {
                actions.push(CascadeAction::SaveUpdate(new));
            }
        }
    }
    Ok(actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::descriptor::SchemaDescriptor;
    use crate::schema::field::{FieldDef, FieldType};
    use std::sync::Arc;
    use strata_driver::Value;

    fn descriptor(name: &str) -> Arc<SchemaDescriptor> {
        Arc::new(SchemaDescriptor::new(
            name,
            vec![FieldDef::new("label", FieldType::Text)],
        ))
    }

    fn entity(descriptor: &Arc<SchemaDescriptor>, label: &str) -> Entity {
        Entity::new(Arc::clone(descriptor), [("label", Value::Text(label.into()))]).unwrap()
    }

    fn owner_rel() -> Relationship {
        Relationship::new("owner", "users").back_populates("bike")
    }

    #[test]
    fn assignment_sets_both_sides() {
        let users = descriptor("users");
        let bikes = descriptor("bikes");
        let user = entity(&users, "alice");
        let bike = entity(&bikes, "trek");

        assert!(bike.related("owner").is_none());
        assign(&bike, &owner_rel(), Some(user.clone())).unwrap();

        assert!(bike.related("owner").unwrap().same_instance(&user));
        assert!(user.related("bike").unwrap().same_instance(&bike));
    }

    #[test]
    fn reassignment_moves_the_back_reference() {
        let users = descriptor("users");
        let bikes = descriptor("bikes");
        let alice = entity(&users, "alice");
        let bob = entity(&users, "bob");
        let bike = entity(&bikes, "trek");
        let rel = owner_rel();

        assign(&bike, &rel, Some(alice.clone())).unwrap();
        assign(&bike, &rel, Some(bob.clone())).unwrap();

        assert!(bike.related("owner").unwrap().same_instance(&bob));
        assert!(bob.related("bike").unwrap().same_instance(&bike));
        assert!(alice.related("bike").is_none());
    }

    #[test]
    fn clearing_removes_both_sides() {
        let users = descriptor("users");
        let bikes = descriptor("bikes");
        let user = entity(&users, "alice");
        let bike = entity(&bikes, "trek");
        let rel = owner_rel();

        assign(&bike, &rel, Some(user.clone())).unwrap();
        assign(&bike, &rel, None).unwrap();

        assert!(bike.related("owner").is_none());
        assert!(user.related("bike").is_none());
    }

    #[test]
    fn identical_assignment_is_a_noop() {
        let users = descriptor("users");
        let bikes = descriptor("bikes");
        let user = entity(&users, "alice");
        let bike = entity(&bikes, "trek");
        let rel = owner_rel();

        assign(&bike, &rel, Some(user.clone())).unwrap();
        let actions = assign(&bike, &rel, Some(user.clone())).unwrap();
        assert!(actions.is_empty());
        assert!(user.related("bike").unwrap().same_instance(&bike));
    }

    #[test]
    fn wrong_target_type_rejected() {
        let bikes = descriptor("bikes");
        let bike = entity(&bikes, "trek");
        let other = entity(&bikes, "giant");

        let result = assign(&bike, &owner_rel(), Some(other));
        assert!(matches!(result, Err(CoreError::RelationshipType { .. })));
    }

    #[test]
    fn foreign_back_reference_is_left_alone() {
        let users = descriptor("users");
        let bikes = descriptor("bikes");
        let alice = entity(&users, "alice");
        let bike = entity(&bikes, "trek");
        let other_bike = entity(&bikes, "giant");
        let rel = owner_rel();

        // alice's back reference points at another bike; detaching this
        // bike must not clobber it.
        assign(&other_bike, &rel, Some(alice.clone())).unwrap();
        bike.set_related("owner", Some(alice.clone())).unwrap();
        assign(&bike, &rel, None).unwrap();

        assert!(alice.related("bike").unwrap().same_instance(&other_bike));
    }

    #[test]
    fn save_update_action_emitted_for_new_value() {
        let users = descriptor("users");
        let bikes = descriptor("bikes");
        let user = entity(&users, "alice");
        let bike = entity(&bikes, "trek");
        let rel = owner_rel().cascade(Cascade::save_update());

        let actions = assign(&bike, &rel, Some(user.clone())).unwrap();
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            CascadeAction::SaveUpdate(e) if e.same_instance(&user)
        ));
    }

    #[test]
    fn delete_orphan_action_emitted_for_previous_value() {
        let users = descriptor("users");
        let bikes = descriptor("bikes");
        let user = entity(&users, "alice");
        let bike = entity(&bikes, "trek");
        let rel = owner_rel().cascade(Cascade::none().and_delete_orphan());

        assign(&bike, &rel, Some(user.clone())).unwrap();
        let actions = assign(&bike, &rel, None).unwrap();
        assert_eq!(actions.len(), 1);
        assert!(matches!(
            &actions[0],
            CascadeAction::DeleteOrphan(e) if e.same_instance(&user)
        ));
    }

    #[test]
    fn all_implies_save_update() {
        assert!(Cascade::all().includes_save_update());
        assert!(!Cascade::all().includes_delete_orphan());
        assert!(Cascade::all().and_delete_orphan().includes_delete_orphan());
    }
}
