use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tabshelf_api::{Created, MoveOutcome, MoveRequest, Position, USER_HEADER};
use tabshelf_core::{ErrorKind, Resource, Scoped, Section, Space, Workspace};

use crate::config::ClientConfig;
use crate::ClientError;

/// A client-side mutation, applied optimistically before the server confirms it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action<E: Scoped> {
    /// `item` carries a locally generated placeholder id until the server answers.
    Create { parent: E::ParentId, item: E, order: Option<u32> },
    Rename { id: E::Id, label: String },
    Reorder { id: E::Id, order: u32 },
    Move { id: E::Id, parent: E::ParentId, order: Option<u32> },
    Delete { id: E::Id },
}

impl<E: Scoped> Action<E> {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Rename { .. } => "rename",
            Self::Reorder { .. } => "reorder",
            Self::Move { .. } => "move",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Authoritative server answer to an [`Action`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<E> {
    Created(Created<E>),
    Renamed(E),
    Reordered(Vec<E>),
    Moved(MoveOutcome<E>),
    Deleted(Vec<E>),
}

/// Carries actions to the server and fetches sibling lists back.
pub trait Transport<E: Scoped> {
    /// # Errors
    /// Returns [`ClientError`] when the server rejects the read or cannot be reached.
    fn fetch(&self, parent: &E::ParentId) -> Result<Vec<E>, ClientError>;

    /// # Errors
    /// Returns [`ClientError`] when the server rejects the action or cannot be reached.
    fn execute(&self, action: &Action<E>) -> Result<Outcome<E>, ClientError>;
}

/// Route layout of one entity kind on the HTTP service.
pub trait HttpEntity: Scoped + Serialize + DeserializeOwned {
    const COLLECTION: &'static str;

    fn children_path(parent: &Self::ParentId) -> String;

    fn create_body(item: &Self, order: Option<u32>) -> Value {
        json!({ "name": item.label(), "order": order })
    }

    fn rename_body(label: &str) -> Value {
        json!({ "name": label })
    }
}

impl HttpEntity for Workspace {
    const COLLECTION: &'static str = "workspaces";

    fn children_path(_parent: &Self::ParentId) -> String {
        "/v1/workspaces".to_string()
    }
}

impl HttpEntity for Space {
    const COLLECTION: &'static str = "spaces";

    fn children_path(parent: &Self::ParentId) -> String {
        format!("/v1/workspaces/{parent}/spaces")
    }
}

impl HttpEntity for Section {
    const COLLECTION: &'static str = "sections";

    fn children_path(parent: &Self::ParentId) -> String {
        format!("/v1/spaces/{parent}/sections")
    }
}

impl HttpEntity for Resource {
    const COLLECTION: &'static str = "resources";

    fn children_path(parent: &Self::ParentId) -> String {
        format!("/v1/sections/{parent}/resources")
    }

    fn create_body(item: &Self, order: Option<u32>) -> Value {
        json!({
            "title": item.title,
            "url": item.url,
            "favicon_url": item.favicon_url,
            "mime_type": item.mime_type,
            "description": item.description,
            "is_google_drive": item.is_google_drive,
            "order": order,
        })
    }

    fn rename_body(label: &str) -> Value {
        json!({ "title": label })
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    kind: ErrorKind,
    error: String,
}

/// Blocking HTTP transport against `tabshelf-service`.
pub struct HttpTransport {
    agent: ureq::Agent,
    config: ClientConfig,
}

impl HttpTransport {
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(Duration::from_secs(30)).build();
        Self { agent, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn send<T: DeserializeOwned>(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, ClientError> {
        let request =
            self.agent.request(method, &self.url(path)).set(USER_HEADER, self.config.user.as_str());
        let response = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };

        match response {
            Ok(response) => response
                .into_json::<Envelope<T>>()
                .map(|envelope| envelope.data)
                .map_err(|err| ClientError::Transport(format!("malformed response: {err}"))),
            Err(ureq::Error::Status(code, response)) => Err(match response.into_json::<ErrorBody>() {
                Ok(body) => ClientError::Rejected { kind: body.kind, message: body.error },
                Err(_) => ClientError::Rejected {
                    kind: kind_for_status(code),
                    message: format!("{method} {path} failed with HTTP {code}"),
                },
            }),
            Err(ureq::Error::Transport(err)) => Err(ClientError::Transport(err.to_string())),
        }
    }
}

fn kind_for_status(code: u16) -> ErrorKind {
    match code {
        401 | 403 => ErrorKind::Unauthorized,
        404 => ErrorKind::NotFound,
        409 => ErrorKind::InvalidState,
        400 | 422 => ErrorKind::Validation,
        _ => ErrorKind::TransientFailure,
    }
}

impl<E> Transport<E> for HttpTransport
where
    E: HttpEntity,
    E::Id: Serialize,
    E::ParentId: Serialize,
{
    fn fetch(&self, parent: &E::ParentId) -> Result<Vec<E>, ClientError> {
        self.send("GET", &E::children_path(parent), None)
    }

    fn execute(&self, action: &Action<E>) -> Result<Outcome<E>, ClientError> {
        let collection = E::COLLECTION;
        match action {
            Action::Create { parent, item, order } => self
                .send("POST", &E::children_path(parent), Some(E::create_body(item, *order)))
                .map(Outcome::Created),
            Action::Rename { id, label } => self
                .send("PATCH", &format!("/v1/{collection}/{id}"), Some(E::rename_body(label)))
                .map(Outcome::Renamed),
            Action::Reorder { id, order } => self
                .send(
                    "POST",
                    &format!("/v1/{collection}/{id}/reorder"),
                    Some(json!({ "order": order })),
                )
                .map(Outcome::Reordered),
            Action::Move { id, parent, order } => {
                let request = MoveRequest::<&E::ParentId, E::Id> {
                    parent,
                    position: order.map(|order| Position::Explicit { order }),
                };
                let body = serde_json::to_value(&request)
                    .map_err(|err| ClientError::Transport(format!("unencodable move: {err}")))?;
                self.send("POST", &format!("/v1/{collection}/{id}/move"), Some(body))
                    .map(Outcome::Moved)
            }
            Action::Delete { id } => self
                .send("DELETE", &format!("/v1/{collection}/{id}"), None)
                .map(Outcome::Deleted),
        }
    }
}

#[cfg(test)]
mod tests {
    use tabshelf_core::{SectionId, UserId};

    use super::*;

    fn config(base_url: &str) -> ClientConfig {
        match UserId::parse("ada@example.com") {
            Ok(user) => ClientConfig::new(base_url, user),
            Err(err) => panic!("invalid fixture user: {err}"),
        }
    }

    // Test IDs: THTTP-001
    #[test]
    fn urls_join_base_and_route() {
        let transport = HttpTransport::new(config("http://127.0.0.1:4020/"));
        assert_eq!(transport.url("/v1/health"), "http://127.0.0.1:4020/v1/health");

        let section_id = SectionId::new();
        assert_eq!(
            Resource::children_path(&section_id),
            format!("/v1/sections/{section_id}/resources")
        );
        assert_eq!(Resource::rename_body("Docs"), json!({ "title": "Docs" }));
        assert_eq!(Section::rename_body("Work"), json!({ "name": "Work" }));
    }

    // Test IDs: THTTP-002
    #[test]
    fn unreachable_server_is_a_transport_error() {
        let transport = HttpTransport::new(config("http://127.0.0.1:9"));
        let result = Transport::<Section>::fetch(&transport, &tabshelf_core::SpaceId::new());
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }

    // Test IDs: THTTP-003
    #[test]
    fn http_status_codes_fall_back_to_error_kinds() {
        assert_eq!(kind_for_status(404), ErrorKind::NotFound);
        assert_eq!(kind_for_status(409), ErrorKind::InvalidState);
        assert_eq!(kind_for_status(422), ErrorKind::Validation);
        assert_eq!(kind_for_status(503), ErrorKind::TransientFailure);
    }
}
