use std::collections::HashMap;
use std::time::{Duration, Instant};

use tabshelf_core::{
    insert_at, remove, reorder, Resource, ResourceDraft, ResourceId, Scoped, Section, SectionId,
    Space, SpaceId, UserId, Workspace, WorkspaceId,
};
use time::OffsetDateTime;

use crate::cache::Mirror;
use crate::config::ClientConfig;
use crate::transport::{Action, Outcome, Transport};
use crate::ClientError;

/// Handle for one in-flight optimistic action.
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "an unsettled ticket leaves its predicted state in the mirror"]
pub struct Ticket(u64);

enum Rollback<E: Scoped> {
    DropPlaceholder { parent: E::ParentId, id: E::Id },
    Reinsert { parent: E::ParentId, item: E },
    Refetch(Vec<E::ParentId>),
}

struct Pending<E: Scoped> {
    action: &'static str,
    source: Option<E::ParentId>,
    rollback: Rollback<E>,
}

impl<E: Scoped> Pending<E> {
    fn untracked(action: &'static str) -> Self {
        Self { action, source: None, rollback: Rollback::Refetch(Vec::new()) }
    }
}

/// Applies actions to the mirror before the server confirms them.
///
/// `begin` stages the predicted lists and returns a [`Ticket`]; `settle` either stores the
/// server's lists or rolls the prediction back. Tickets may settle in any order, and the last
/// settled server list wins for its scope.
pub struct Reconciler<E: Scoped, T> {
    transport: T,
    mirror: Mirror<E>,
    next_ticket: u64,
    pending: HashMap<u64, Pending<E>>,
}

impl<E, T> Reconciler<E, T>
where
    E: Scoped,
    T: Transport<E>,
{
    #[must_use]
    pub fn new(transport: T, config: &ClientConfig) -> Self {
        Self::with_ttl(transport, config.cache_ttl)
    }

    #[must_use]
    pub fn with_ttl(transport: T, ttl: Duration) -> Self {
        Self { transport, mirror: Mirror::new(ttl), next_ticket: 0, pending: HashMap::new() }
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// What the user currently sees for `parent`, including unconfirmed predictions.
    #[must_use]
    pub fn cached(&self, parent: &E::ParentId) -> Option<&[E]> {
        self.mirror.get(parent)
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    /// Siblings under `parent`, served from the mirror while fresh.
    ///
    /// # Errors
    /// Returns [`ClientError`] when a re-fetch is needed and fails.
    pub fn list(&mut self, parent: &E::ParentId) -> Result<Vec<E>, ClientError> {
        if let Some(items) = self.mirror.fresh(parent, Instant::now()) {
            return Ok(items.to_vec());
        }
        let items = self.transport.fetch(parent)?;
        self.mirror.store(parent.clone(), items.clone());
        Ok(items)
    }

    /// Stage the predicted outcome of `action` and return a ticket to settle it with.
    pub fn begin(&mut self, action: &Action<E>) -> Ticket {
        let pending = self.predict(action);
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.pending.insert(ticket, pending);
        Ticket(ticket)
    }

    /// Reconcile the mirror with the server's answer for `ticket`.
    ///
    /// # Errors
    /// Returns the transport's error unchanged after rolling the prediction back.
    pub fn settle(
        &mut self,
        ticket: Ticket,
        result: Result<Outcome<E>, ClientError>,
    ) -> Result<Outcome<E>, ClientError> {
        let Some(pending) = self.pending.remove(&ticket.0) else {
            return result;
        };
        match result {
            Ok(outcome) => {
                self.confirm(pending.source, &outcome);
                Ok(outcome)
            }
            Err(err) => {
                tracing::warn!(
                    action = pending.action,
                    kind = E::KIND.as_str(),
                    error = %err,
                    "optimistic update failed; rolling back"
                );
                self.roll_back(pending.rollback);
                Err(err)
            }
        }
    }

    /// Run `action` end to end: predict, send, reconcile.
    ///
    /// # Errors
    /// Returns [`ClientError`] when the server rejects the action or cannot be reached.
    pub fn dispatch(&mut self, action: &Action<E>) -> Result<Outcome<E>, ClientError> {
        let ticket = self.begin(action);
        let result = self.transport.execute(action);
        self.settle(ticket, result)
    }

    fn predict(&mut self, action: &Action<E>) -> Pending<E> {
        let name = action.name();
        match action {
            Action::Create { parent, item, order } => {
                if let Some(items) = self.mirror.get(parent).map(<[E]>::to_vec) {
                    self.mirror.stage(parent, insert_at(items, item.clone(), *order));
                }
                Pending {
                    action: name,
                    source: Some(parent.clone()),
                    rollback: Rollback::DropPlaceholder { parent: parent.clone(), id: item.id() },
                }
            }
            Action::Rename { id, label } => {
                let Some((parent, items)) = self.mirror.locate(*id) else {
                    return Pending::untracked(name);
                };
                let predicted = items
                    .into_iter()
                    .map(|mut item| {
                        if item.id() == *id {
                            item.set_label(label.clone());
                        }
                        item
                    })
                    .collect();
                self.mirror.stage(&parent, predicted);
                Pending {
                    action: name,
                    source: Some(parent.clone()),
                    rollback: Rollback::Refetch(vec![parent]),
                }
            }
            Action::Reorder { id, order } => {
                let Some((parent, items)) = self.mirror.locate(*id) else {
                    return Pending::untracked(name);
                };
                if let Ok(predicted) = reorder(items, *id, *order) {
                    self.mirror.stage(&parent, predicted);
                }
                Pending {
                    action: name,
                    source: Some(parent.clone()),
                    rollback: Rollback::Refetch(vec![parent]),
                }
            }
            Action::Move { id, parent: target, order } => {
                let Some((source, items)) = self.mirror.locate(*id) else {
                    return Pending {
                        action: name,
                        source: None,
                        rollback: Rollback::Refetch(vec![target.clone()]),
                    };
                };
                if let Ok((mut moved, rest)) = remove(items, *id) {
                    self.mirror.stage(&source, rest);
                    if let Some(target_items) = self.mirror.get(target).map(<[E]>::to_vec) {
                        moved.set_parent_id(target.clone());
                        self.mirror.stage(target, insert_at(target_items, moved, *order));
                    }
                }
                Pending {
                    action: name,
                    source: Some(source.clone()),
                    rollback: Rollback::Refetch(vec![source, target.clone()]),
                }
            }
            Action::Delete { id } => {
                let Some((parent, items)) = self.mirror.locate(*id) else {
                    return Pending::untracked(name);
                };
                match remove(items, *id) {
                    Ok((item, rest)) => {
                        self.mirror.stage(&parent, rest);
                        Pending {
                            action: name,
                            source: Some(parent.clone()),
                            rollback: Rollback::Reinsert { parent, item },
                        }
                    }
                    Err(_) => Pending {
                        action: name,
                        source: Some(parent.clone()),
                        rollback: Rollback::Refetch(vec![parent]),
                    },
                }
            }
        }
    }

    fn confirm(&mut self, source: Option<E::ParentId>, outcome: &Outcome<E>) {
        match outcome {
            Outcome::Created(created) => {
                self.mirror.store(created.created.parent_id(), created.siblings.clone());
            }
            Outcome::Renamed(entity) => {
                let parent = entity.parent_id();
                if let Some(items) = self.mirror.get(&parent).map(<[E]>::to_vec) {
                    let replaced = items
                        .into_iter()
                        .map(|item| if item.id() == entity.id() { entity.clone() } else { item })
                        .collect();
                    self.mirror.stage(&parent, replaced);
                }
            }
            Outcome::Reordered(siblings) | Outcome::Deleted(siblings) => {
                if let Some(parent) = source.or_else(|| siblings.first().map(Scoped::parent_id)) {
                    self.mirror.store(parent, siblings.clone());
                }
            }
            Outcome::Moved(moved) => {
                if let Some(parent) = source.or_else(|| moved.source.first().map(Scoped::parent_id))
                {
                    self.mirror.store(parent, moved.source.clone());
                }
                self.mirror.store(moved.moved.parent_id(), moved.target.clone());
            }
        }
    }

    fn roll_back(&mut self, rollback: Rollback<E>) {
        match rollback {
            Rollback::DropPlaceholder { parent, id } => {
                let Some(items) = self.mirror.get(&parent).map(<[E]>::to_vec) else {
                    return;
                };
                if let Ok((_, rest)) = remove(items, id) {
                    self.mirror.stage(&parent, rest);
                }
            }
            Rollback::Reinsert { parent, item } => {
                if self.mirror.contains(&parent, item.id()) {
                    return;
                }
                let Some(items) = self.mirror.get(&parent).map(<[E]>::to_vec) else {
                    return;
                };
                let order = item.order();
                self.mirror.stage(&parent, insert_at(items, item, Some(order)));
            }
            Rollback::Refetch(parents) => {
                for parent in parents {
                    match self.transport.fetch(&parent) {
                        Ok(items) => self.mirror.store(parent, items),
                        Err(err) => {
                            tracing::warn!(
                                kind = E::KIND.as_str(),
                                scope = %parent,
                                error = %err,
                                "re-fetch after failed update also failed; invalidating scope"
                            );
                            self.mirror.invalidate(&parent);
                        }
                    }
                }
            }
        }
    }
}

/// A resource with a locally generated id, ready for [`Action::Create`].
#[must_use]
pub fn placeholder_resource(section_id: SectionId, user_id: UserId, draft: ResourceDraft) -> Resource {
    let now = OffsetDateTime::now_utc();
    Resource {
        id: ResourceId::new(),
        section_id,
        user_id,
        title: draft.title,
        url: draft.url,
        favicon_url: draft.favicon_url,
        mime_type: draft.mime_type,
        description: draft.description,
        is_google_drive: draft.is_google_drive,
        order: 0,
        created_at: now,
        updated_at: now,
    }
}

/// A section with a locally generated id, ready for [`Action::Create`].
#[must_use]
pub fn placeholder_section(space_id: SpaceId, user_id: UserId, name: impl Into<String>) -> Section {
    let now = OffsetDateTime::now_utc();
    Section {
        id: SectionId::new(),
        space_id,
        user_id,
        name: name.into(),
        order: 0,
        created_at: now,
        updated_at: now,
    }
}

/// A space with a locally generated id, ready for [`Action::Create`].
#[must_use]
pub fn placeholder_space(workspace_id: WorkspaceId, user_id: UserId, name: impl Into<String>) -> Space {
    let now = OffsetDateTime::now_utc();
    Space {
        id: SpaceId::new(),
        workspace_id,
        user_id,
        name: name.into(),
        is_last_active: false,
        order: 0,
        created_at: now,
        updated_at: now,
    }
}

/// A non-default workspace with a locally generated id, ready for [`Action::Create`].
#[must_use]
pub fn placeholder_workspace(user_id: UserId, name: impl Into<String>) -> Workspace {
    let now = OffsetDateTime::now_utc();
    Workspace {
        id: WorkspaceId::new(),
        user_id,
        name: name.into(),
        is_default: false,
        order: 0,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    use tabshelf_api::{Created, MoveOutcome};
    use tabshelf_core::ErrorKind;

    use super::*;

    #[derive(Default)]
    struct Scripted {
        fetches: RefCell<VecDeque<Result<Vec<Resource>, ClientError>>>,
        executions: RefCell<VecDeque<Result<Outcome<Resource>, ClientError>>>,
        fetch_calls: Cell<usize>,
    }

    impl Scripted {
        fn on_fetch(&self, result: Result<Vec<Resource>, ClientError>) {
            self.fetches.borrow_mut().push_back(result);
        }

        fn on_execute(&self, result: Result<Outcome<Resource>, ClientError>) {
            self.executions.borrow_mut().push_back(result);
        }
    }

    impl Transport<Resource> for Scripted {
        fn fetch(&self, _parent: &SectionId) -> Result<Vec<Resource>, ClientError> {
            self.fetch_calls.set(self.fetch_calls.get() + 1);
            self.fetches
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::Transport("no scripted fetch".to_string())))
        }

        fn execute(&self, _action: &Action<Resource>) -> Result<Outcome<Resource>, ClientError> {
            self.executions
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(ClientError::Transport("no scripted execute".to_string())))
        }
    }

    fn user() -> UserId {
        match UserId::parse("ada@example.com") {
            Ok(user) => user,
            Err(err) => panic!("invalid fixture user: {err}"),
        }
    }

    fn draft(title: &str) -> ResourceDraft {
        ResourceDraft {
            title: title.to_string(),
            url: format!("https://example.com/{title}"),
            favicon_url: None,
            mime_type: None,
            description: None,
            is_google_drive: false,
        }
    }

    /// Server-side copies of `titles` under `section_id`, numbered in the given order.
    fn scope(section_id: SectionId, titles: &[&str]) -> Vec<Resource> {
        titles
            .iter()
            .zip(0_u32..)
            .map(|(title, order)| {
                let mut resource = placeholder_resource(section_id, user(), draft(title));
                resource.order = order;
                resource
            })
            .collect()
    }

    fn renumbered(items: &[Resource], titles: &[&str]) -> Vec<Resource> {
        titles
            .iter()
            .zip(0_u32..)
            .filter_map(|(title, order)| {
                items.iter().find(|item| item.title == *title).cloned().map(|mut item| {
                    item.order = order;
                    item
                })
            })
            .collect()
    }

    fn titles(items: Option<&[Resource]>) -> Vec<String> {
        items.unwrap_or_default().iter().map(|item| item.title.clone()).collect()
    }

    fn orders(items: Option<&[Resource]>) -> Vec<u32> {
        items.unwrap_or_default().iter().map(|item| item.order).collect()
    }

    fn seeded(
        section_id: SectionId,
        names: &[&str],
    ) -> Result<(Reconciler<Resource, Scripted>, Vec<Resource>), ClientError> {
        let server = scope(section_id, names);
        let mut reconciler = Reconciler::with_ttl(Scripted::default(), Duration::from_secs(300));
        reconciler.transport().on_fetch(Ok(server.clone()));
        reconciler.list(&section_id)?;
        Ok((reconciler, server))
    }

    // Test IDs: TREC-001
    #[test]
    fn failed_create_removes_placeholder_and_closes_gap() -> Result<(), ClientError> {
        let work = SectionId::new();
        let (mut reconciler, _) = seeded(work, &["A", "B"])?;

        let item = placeholder_resource(work, user(), draft("New"));
        let ticket = reconciler.begin(&Action::Create { parent: work, item, order: Some(0) });
        assert_eq!(titles(reconciler.cached(&work)), vec!["New", "A", "B"]);
        assert_eq!(orders(reconciler.cached(&work)), vec![0, 1, 2]);

        let result =
            reconciler.settle(ticket, Err(ClientError::Transport("connection reset".to_string())));
        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert_eq!(titles(reconciler.cached(&work)), vec!["A", "B"]);
        assert_eq!(orders(reconciler.cached(&work)), vec![0, 1]);
        assert_eq!(reconciler.in_flight(), 0);
        Ok(())
    }

    // Test IDs: TREC-002
    #[test]
    fn failed_delete_reinserts_at_original_order() -> Result<(), ClientError> {
        let work = SectionId::new();
        let (mut reconciler, server) = seeded(work, &["A", "B", "C"])?;

        let ticket = reconciler.begin(&Action::Delete { id: server[1].id });
        assert_eq!(titles(reconciler.cached(&work)), vec!["A", "C"]);

        let rejected = ClientError::Rejected {
            kind: ErrorKind::Unauthorized,
            message: "not yours".to_string(),
        };
        let result = reconciler.settle(ticket, Err(rejected.clone()));
        assert_eq!(result.err(), Some(rejected));
        assert_eq!(reconciler.cached(&work).map(<[Resource]>::to_vec), Some(server));
        Ok(())
    }

    // Test IDs: TREC-003
    #[test]
    fn failed_reorder_adopts_refetched_server_list() -> Result<(), ClientError> {
        let work = SectionId::new();
        let (mut reconciler, server) = seeded(work, &["A", "B", "C"])?;

        let ticket = reconciler.begin(&Action::Reorder { id: server[2].id, order: 0 });
        assert_eq!(titles(reconciler.cached(&work)), vec!["C", "A", "B"]);

        let authoritative = renumbered(&server, &["B", "A", "C"]);
        reconciler.transport().on_fetch(Ok(authoritative.clone()));
        let result = reconciler.settle(
            ticket,
            Err(ClientError::Rejected {
                kind: ErrorKind::TransientFailure,
                message: "database is locked".to_string(),
            }),
        );
        assert!(result.is_err());
        assert_eq!(reconciler.cached(&work).map(<[Resource]>::to_vec), Some(authoritative));
        Ok(())
    }

    // Test IDs: TREC-004
    #[test]
    fn failed_refetch_invalidates_scope() -> Result<(), ClientError> {
        let work = SectionId::new();
        let (mut reconciler, server) = seeded(work, &["A", "B"])?;

        let ticket = reconciler.begin(&Action::Rename { id: server[0].id, label: "Z".to_string() });
        assert_eq!(titles(reconciler.cached(&work)), vec!["Z", "B"]);

        reconciler.transport().on_fetch(Err(ClientError::Transport("offline".to_string())));
        let result =
            reconciler.settle(ticket, Err(ClientError::Transport("offline".to_string())));
        assert!(result.is_err());
        assert!(reconciler.cached(&work).is_none());

        reconciler.transport().on_fetch(Ok(server.clone()));
        assert_eq!(reconciler.list(&work)?, server);
        Ok(())
    }

    // Test IDs: TREC-005
    #[test]
    fn successful_create_replaces_list_wholesale() -> Result<(), ClientError> {
        let work = SectionId::new();
        let (mut reconciler, server) = seeded(work, &["A", "B"])?;

        let placeholder = placeholder_resource(work, user(), draft("New"));
        let placeholder_id = placeholder.id;
        let mut confirmed = placeholder.clone();
        confirmed.id = ResourceId::new();
        confirmed.order = 2;
        let mut siblings = server.clone();
        siblings.push(confirmed.clone());

        reconciler.transport().on_execute(Ok(Outcome::Created(Created {
            created: confirmed.clone(),
            siblings: siblings.clone(),
        })));
        reconciler.dispatch(&Action::Create { parent: work, item: placeholder, order: Some(0) })?;

        let cached = reconciler.cached(&work).map(<[Resource]>::to_vec);
        assert_eq!(cached, Some(siblings));
        assert!(!reconciler.cached(&work).unwrap_or_default().iter().any(|r| r.id == placeholder_id));
        Ok(())
    }

    // Test IDs: TREC-006
    #[test]
    fn tickets_settle_in_any_order_without_duplicates() -> Result<(), ClientError> {
        let work = SectionId::new();
        let (mut reconciler, server) = seeded(work, &["A", "B", "C"])?;

        let delete_a = reconciler.begin(&Action::Delete { id: server[0].id });
        let reorder_c = reconciler.begin(&Action::Reorder { id: server[2].id, order: 0 });
        assert_eq!(titles(reconciler.cached(&work)), vec!["C", "B"]);
        assert_eq!(reconciler.in_flight(), 2);

        let after_reorder = renumbered(&server, &["C", "A", "B"]);
        reconciler.settle(reorder_c, Ok(Outcome::Reordered(after_reorder.clone())))?;
        let result = reconciler.settle(
            delete_a,
            Err(ClientError::Rejected { kind: ErrorKind::InvalidState, message: "busy".into() }),
        );

        assert!(result.is_err());
        assert_eq!(reconciler.cached(&work).map(<[Resource]>::to_vec), Some(after_reorder));
        assert_eq!(reconciler.in_flight(), 0);
        Ok(())
    }

    // Test IDs: TREC-007
    #[test]
    fn stale_lists_are_refetched_after_ttl() -> Result<(), ClientError> {
        let work = SectionId::new();
        let server = scope(work, &["A"]);

        let mut cached: Reconciler<Resource, Scripted> =
            Reconciler::with_ttl(Scripted::default(), Duration::from_secs(300));
        cached.transport().on_fetch(Ok(server.clone()));
        cached.list(&work)?;
        cached.list(&work)?;
        assert_eq!(cached.transport().fetch_calls.get(), 1);

        let mut expiring: Reconciler<Resource, Scripted> =
            Reconciler::with_ttl(Scripted::default(), Duration::ZERO);
        expiring.transport().on_fetch(Ok(server.clone()));
        expiring.transport().on_fetch(Ok(server));
        expiring.list(&work)?;
        expiring.list(&work)?;
        assert_eq!(expiring.transport().fetch_calls.get(), 2);
        Ok(())
    }

    // Test IDs: TREC-008
    #[test]
    fn move_predicts_both_scopes_and_adopts_server_lists() -> Result<(), ClientError> {
        let work = SectionId::new();
        let personal = SectionId::new();
        let (mut reconciler, work_server) = seeded(work, &["C", "B"])?;
        let personal_server = scope(personal, &["D"]);
        reconciler.transport().on_fetch(Ok(personal_server.clone()));
        reconciler.list(&personal)?;

        let moved_id = work_server[1].id;
        let ticket =
            reconciler.begin(&Action::Move { id: moved_id, parent: personal, order: Some(1) });
        assert_eq!(titles(reconciler.cached(&work)), vec!["C"]);
        assert_eq!(titles(reconciler.cached(&personal)), vec!["D", "B"]);
        assert_eq!(orders(reconciler.cached(&personal)), vec![0, 1]);

        let mut moved = work_server[1].clone();
        moved.section_id = personal;
        moved.order = 1;
        let source = renumbered(&work_server, &["C"]);
        let mut target = personal_server;
        target.push(moved.clone());
        reconciler.settle(
            ticket,
            Ok(Outcome::Moved(MoveOutcome {
                moved,
                source: source.clone(),
                target: target.clone(),
            })),
        )?;

        assert_eq!(reconciler.cached(&work).map(<[Resource]>::to_vec), Some(source));
        assert_eq!(reconciler.cached(&personal).map(<[Resource]>::to_vec), Some(target));
        Ok(())
    }

    // Test IDs: TREC-009
    #[test]
    fn failed_move_refetches_source_and_target() -> Result<(), ClientError> {
        let work = SectionId::new();
        let personal = SectionId::new();
        let (mut reconciler, work_server) = seeded(work, &["C", "B"])?;
        let personal_server = scope(personal, &["D"]);
        reconciler.transport().on_fetch(Ok(personal_server.clone()));
        reconciler.list(&personal)?;

        let ticket = reconciler.begin(&Action::Move {
            id: work_server[1].id,
            parent: personal,
            order: Some(0),
        });
        assert_eq!(titles(reconciler.cached(&work)), vec!["C"]);
        assert_eq!(titles(reconciler.cached(&personal)), vec!["B", "D"]);

        reconciler.transport().on_fetch(Ok(work_server.clone()));
        reconciler.transport().on_fetch(Ok(personal_server.clone()));
        let result =
            reconciler.settle(ticket, Err(ClientError::Transport("connection reset".to_string())));

        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert_eq!(reconciler.transport().fetch_calls.get(), 4);
        assert_eq!(reconciler.cached(&work).map(<[Resource]>::to_vec), Some(work_server));
        assert_eq!(reconciler.cached(&personal).map(<[Resource]>::to_vec), Some(personal_server));
        assert_eq!(reconciler.in_flight(), 0);
        Ok(())
    }

    struct NoWorkspaces;

    impl Transport<Workspace> for NoWorkspaces {
        fn fetch(&self, _parent: &UserId) -> Result<Vec<Workspace>, ClientError> {
            Ok(Vec::new())
        }

        fn execute(&self, _action: &Action<Workspace>) -> Result<Outcome<Workspace>, ClientError> {
            Err(ClientError::Transport("offline".to_string()))
        }
    }

    // Test IDs: TREC-010
    #[test]
    fn placeholders_cover_every_kind() -> Result<(), ClientError> {
        let owner = user();
        let workspace = placeholder_workspace(owner.clone(), "Side projects");
        assert!(!workspace.is_default);
        let space = placeholder_space(workspace.id, owner.clone(), "Reading");
        assert_eq!(space.parent_id(), workspace.id);
        assert!(!space.is_last_active);
        let section = placeholder_section(space.id, owner.clone(), "Work");
        assert_eq!(section.parent_id(), space.id);

        let mut reconciler = Reconciler::with_ttl(NoWorkspaces, Duration::from_secs(300));
        reconciler.list(&owner)?;
        let ticket = reconciler.begin(&Action::Create {
            parent: owner.clone(),
            item: workspace,
            order: None,
        });
        assert_eq!(reconciler.cached(&owner).map(<[Workspace]>::len), Some(1));
        let result = reconciler.settle(ticket, Err(ClientError::Transport("offline".to_string())));
        assert!(result.is_err());
        assert_eq!(reconciler.cached(&owner).map(<[Workspace]>::len), Some(0));
        Ok(())
    }
}
