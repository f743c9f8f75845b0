//! Query builder over one entity type.
//!
//! Filters are conjunctive equality predicates on program-facing field
//! names. Materializing executors (`all`, `first`, `get`) track every
//! entity they build, so the newest query result always wins inside the
//! session; `count`, `exists`, and the bulk `update`/`delete` executors
//! never touch tracked instances.

use crate::entity::{Entity, EntryId};
use crate::error::{CoreError, CoreResult};
use crate::schema::descriptor::{SchemaDescriptor, PRIMARY_KEY_COLUMN};
use crate::session::Session;
use crate::statement;
use std::sync::Arc;
use strata_driver::Value;

/// A pending query bound to a session.
#[derive(Debug)]
pub struct Query<'s> {
    descriptor: Arc<SchemaDescriptor>,
    session: &'s mut Session,
    filters: Vec<(String, Value)>,
    limit: Option<usize>,
}

impl<'s> Query<'s> {
    pub(crate) fn new(descriptor: Arc<SchemaDescriptor>, session: &'s mut Session) -> Self {
        Self {
            descriptor,
            session,
            filters: Vec::new(),
            limit: None,
        }
    }

    /// Adds an equality filter on a program-facing field name.
    ///
    /// Multiple filters combine conjunctively.
    #[must_use]
    pub fn filter_by(mut self, attribute: impl Into<String>, value: Value) -> Self {
        self.filters.push((attribute.into(), value));
        self
    }

    /// Caps the number of materialized results.
    ///
    /// `count` ignores the cap; counting happens before the limit applies.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn resolved_filters(&self) -> CoreResult<(Vec<String>, Vec<Value>)> {
        let mut columns = Vec::with_capacity(self.filters.len());
        let mut params = Vec::with_capacity(self.filters.len());
        for (attribute, value) in &self.filters {
            let field = self.descriptor.field(attribute).ok_or_else(|| {
                CoreError::UnknownField {
                    entity: self.descriptor.entity_name().to_string(),
                    field: attribute.clone(),
                }
            })?;
            columns.push(field.column.clone());
            params.push(value.clone());
        }
        Ok((columns, params))
    }

    fn select(&mut self, limit: Option<usize>, count: bool) -> CoreResult<Vec<strata_driver::Row>> {
        let (columns, params) = self.resolved_filters()?;
        let namespace = self.descriptor.namespace_name().to_string();
        let stmt = statement::select(
            &namespace,
            self.descriptor.entity_name(),
            &columns,
            limit,
            count,
        );
        self.session.fetch(&stmt, &params, &namespace)
    }

    /// Materializes every matching row as a tracked entity.
    ///
    /// # Errors
    ///
    /// Fails for undeclared filter fields and propagates driver failures.
    pub fn all(mut self) -> CoreResult<Vec<Entity>> {
        let rows = self.select(self.limit, false)?;
        let mut entities = Vec::with_capacity(rows.len());
        for row in &rows {
            let entity = Entity::from_row(Arc::clone(&self.descriptor), row)?;
            self.session.track(entity.clone());
            entities.push(entity);
        }
        Ok(entities)
    }

    /// Materializes the first matching row, if any.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Query::all`].
    pub fn first(self) -> CoreResult<Option<Entity>> {
        Ok(self.limit(1).all()?.into_iter().next())
    }

    /// Looks a single row up by entry id.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Query::all`].
    pub fn get(self, id: &EntryId) -> CoreResult<Option<Entity>> {
        self.filter_by(
            PRIMARY_KEY_COLUMN,
            Value::Text(id.as_str().to_string()),
        )
        .first()
    }

    /// Counts matching rows. A previously set limit is ignored.
    ///
    /// # Errors
    ///
    /// Fails for undeclared filter fields; a malformed driver reply fails
    /// with a statement-level driver error.
    pub fn count(mut self) -> CoreResult<u64> {
        let rows = self.select(None, true)?;
        rows.first()
            .and_then(|row| row.iter().next())
            .and_then(|(_, value)| value.as_int())
            .map(|n| n.max(0) as u64)
            .ok_or_else(|| {
                CoreError::Driver(strata_driver::DriverError::statement(
                    "count reply carried no numeric column",
                ))
            })
    }

    /// Returns `true` when at least one row matches.
    ///
    /// Does not materialize or track anything.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Query::all`].
    pub fn exists(mut self) -> CoreResult<bool> {
        let rows = self.select(Some(1), false)?;
        Ok(!rows.is_empty())
    }

    /// Applies a bulk update to every matching row.
    ///
    /// Tracked instances are not refreshed; they keep their in-memory state.
    ///
    /// # Errors
    ///
    /// Fails for undeclared fields in filters or assignments.
    pub fn update(self, assignments: &[(&str, Value)]) -> CoreResult<u64> {
        let mut assignment_columns = Vec::with_capacity(assignments.len());
        let mut params = Vec::with_capacity(assignments.len());
        for (attribute, value) in assignments {
            let field = self.descriptor.field(attribute).ok_or_else(|| {
                CoreError::UnknownField {
                    entity: self.descriptor.entity_name().to_string(),
                    field: (*attribute).to_string(),
                }
            })?;
            assignment_columns.push(field.column.clone());
            params.push(value.clone());
        }
        let (filter_columns, filter_params) = self.resolved_filters()?;
        params.extend(filter_params);

        let namespace = self.descriptor.namespace_name().to_string();
        let stmt = statement::update(
            &namespace,
            self.descriptor.entity_name(),
            &assignment_columns,
            &filter_columns,
        );
        self.session.execute(&stmt, &params, &namespace)
    }

    /// Deletes every matching row.
    ///
    /// Tracked instances are not deactivated by a bulk delete.
    ///
    /// # Errors
    ///
    /// Fails for undeclared filter fields.
    pub fn delete(self) -> CoreResult<u64> {
        let (filter_columns, params) = self.resolved_filters()?;
        let namespace = self.descriptor.namespace_name().to_string();
        let stmt = statement::delete(
            &namespace,
            self.descriptor.entity_name(),
            &filter_columns,
        );
        self.session.execute(&stmt, &params, &namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reflection;
    use crate::schema::field::{FieldDef, FieldType};
    use strata_driver::{Driver, MemoryDriver};

    fn users_descriptor() -> Arc<SchemaDescriptor> {
        Arc::new(SchemaDescriptor::new(
            "users",
            vec![
                FieldDef::new("name", FieldType::Text),
                FieldDef::new("last_name", FieldType::Text),
                FieldDef::new("active", FieldType::Boolean),
            ],
        ))
    }

    fn seeded_session() -> (MemoryDriver, Session, Vec<Entity>) {
        let driver = MemoryDriver::new();
        let mut bootstrap = driver.connect().unwrap();
        for stmt in [
            statement::create_namespace("public"),
            statement::create_table(&users_descriptor()),
        ] {
            bootstrap.execute(&stmt, &[], "public").unwrap();
        }

        let mut session = Session::new(
            Arc::new(driver.clone()),
            Some("tester".to_string()),
            Arc::new(reflection::change_log_descriptor()),
        );
        session.begin().unwrap();

        let seed = [
            ("max", "muster", true),
            ("mira", "muster", false),
            ("miraculix", "musterin", false),
            ("maxine", "meier", true),
            ("mia", "mueller", false),
        ];
        let mut users = Vec::new();
        for (name, last_name, active) in seed {
            let user = Entity::new(
                users_descriptor(),
                [
                    ("name", Value::Text(name.into())),
                    ("last_name", Value::Text(last_name.into())),
                    ("active", Value::Bool(active)),
                ],
            )
            .unwrap();
            session.add(&user).unwrap();
            users.push(user);
        }
        (driver, session, users)
    }

    #[test]
    fn all_returns_every_row() {
        let (_driver, mut session, users) = seeded_session();
        let result = session.query(users_descriptor()).all().unwrap();
        assert_eq!(result.len(), users.len());
    }

    #[test]
    fn conjunctive_filters_narrow_the_result() {
        let (_driver, mut session, users) = seeded_session();
        let result = session
            .query(users_descriptor())
            .filter_by("last_name", Value::Text("muster".into()))
            .filter_by("active", Value::Bool(true))
            .all()
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id(), users[0].id());
    }

    #[test]
    fn limit_caps_results() {
        let (_driver, mut session, _users) = seeded_session();
        let result = session
            .query(users_descriptor())
            .limit(3)
            .all()
            .unwrap();
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn count_ignores_prior_limit() {
        let (_driver, mut session, users) = seeded_session();
        let count = session
            .query(users_descriptor())
            .limit(3)
            .count()
            .unwrap();
        assert_eq!(count, users.len() as u64);
    }

    #[test]
    fn count_respects_filters() {
        let (_driver, mut session, _users) = seeded_session();
        let count = session
            .query(users_descriptor())
            .filter_by("active", Value::Bool(true))
            .count()
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn get_finds_by_id() {
        let (_driver, mut session, users) = seeded_session();
        let found = session
            .query(users_descriptor())
            .get(users[2].id())
            .unwrap()
            .unwrap();
        assert_eq!(found.id(), users[2].id());
        assert_eq!(found.get("name"), Some(Value::Text("miraculix".into())));
    }

    #[test]
    fn get_misses_unknown_id() {
        let (_driver, mut session, _users) = seeded_session();
        let found = session
            .query(users_descriptor())
            .get(&EntryId::new())
            .unwrap();
        assert!(found.is_none());
    }

    #[test]
    fn exists_reflects_matches() {
        let (_driver, mut session, _users) = seeded_session();
        assert!(session
            .query(users_descriptor())
            .filter_by("name", Value::Text("max".into()))
            .exists()
            .unwrap());
        assert!(!session
            .query(users_descriptor())
            .filter_by("name", Value::Text("chris".into()))
            .exists()
            .unwrap());
    }

    #[test]
    fn query_results_supersede_tracked_instances() {
        let (_driver, mut session, users) = seeded_session();
        let refreshed = session.query(users_descriptor()).all().unwrap();
        for original in &users {
            assert!(!original.is_active());
        }
        for entity in &refreshed {
            assert!(entity.is_active());
        }
    }

    #[test]
    fn bulk_update_reports_affected_rows() {
        let (_driver, mut session, users) = seeded_session();
        let affected = session
            .query(users_descriptor())
            .filter_by("last_name", Value::Text("musterin".into()))
            .update(&[("active", Value::Bool(true))])
            .unwrap();
        assert_eq!(affected, 1);

        let refreshed = session
            .query(users_descriptor())
            .get(users[2].id())
            .unwrap()
            .unwrap();
        assert_eq!(refreshed.get("active"), Some(Value::Bool(true)));
    }

    #[test]
    fn bulk_delete_reports_affected_rows() {
        let (_driver, mut session, _users) = seeded_session();
        let affected = session
            .query(users_descriptor())
            .filter_by("last_name", Value::Text("muster".into()))
            .delete()
            .unwrap();
        assert_eq!(affected, 2);
        assert_eq!(session.query(users_descriptor()).count().unwrap(), 3);
    }

    #[test]
    fn unknown_filter_field_rejected() {
        let (_driver, mut session, _users) = seeded_session();
        let result = session
            .query(users_descriptor())
            .filter_by("nickname", Value::Text("al".into()))
            .all();
        assert!(matches!(result, Err(CoreError::UnknownField { .. })));
    }
}
