//! Replica HTTP service
//!
//! Every replica serves the same routes; the gateway forwards client calls
//! to the leader and replays them on the followers. Only the leader turns an
//! accepted post into a gossip wave.

use crate::leadership::LeaderFlag;
use crate::sessions::SessionRegistry;
use crate::storage::{Storage, StorageError};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use groupcast_core::dissemination::plan_root_fanout;
use groupcast_core::types::{Group, MessageId, Post, User};
use groupcast_net::{Disseminator, MAX_GOSSIP_BODY};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// Request-scoped failures
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Storage(e) => {
                error!("Storage failure: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// Shared state of the service handlers
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub sessions: Arc<SessionRegistry>,
    pub leader: Arc<LeaderFlag>,
    pub disseminator: Disseminator,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/groups", get(groups))
        .route("/creategroup", post(create_group))
        .route("/joingroup", post(join_group))
        .route("/writepost", post(write_post))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct MembershipForm {
    pub username: String,
    pub groupname: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PostForm {
    pub username: String,
    pub groupname: String,
    pub post: String,
}

async fn register(State(state): State<AppState>, body: String) -> Result<StatusCode, ServiceError> {
    let username = body.trim();
    if username.is_empty() {
        return Err(ServiceError::BadRequest("Username cannot be empty"));
    }
    if state.storage.count_users(username)? > 0 || !state.storage.insert_user(&User::new(username))? {
        debug!("User {} exists, logging in", username);
        return Err(ServiceError::Conflict("Username already exists".into()));
    }
    info!("Registered new user {}", username);
    Ok(StatusCode::OK)
}

async fn groups(State(state): State<AppState>) -> Result<Json<Vec<Group>>, ServiceError> {
    Ok(Json(state.storage.list_groups()?))
}

async fn create_group(
    State(state): State<AppState>,
    Form(form): Form<MembershipForm>,
) -> Result<StatusCode, ServiceError> {
    if form.username.is_empty() || form.groupname.is_empty() {
        return Err(ServiceError::BadRequest("Username and group name are required"));
    }
    if !state
        .storage
        .insert_group(&Group::new(&form.groupname, &form.username))?
    {
        return Err(ServiceError::Conflict(format!(
            "Group {} already exists",
            form.groupname
        )));
    }
    add_group_to_user(&state.storage, &form.username, &form.groupname)?;
    info!("User {} created group {}", form.username, form.groupname);
    Ok(StatusCode::OK)
}

async fn join_group(
    State(state): State<AppState>,
    Form(form): Form<MembershipForm>,
) -> Result<StatusCode, ServiceError> {
    if form.username.is_empty() || form.groupname.is_empty() {
        return Err(ServiceError::BadRequest("Username and group name are required"));
    }
    let joined = state.storage.update_group(&form.groupname, |group| {
        group.add_member(&form.username);
    })?;
    if joined.is_none() {
        return Err(ServiceError::NotFound(format!(
            "Group {} does not exist",
            form.groupname
        )));
    }
    add_group_to_user(&state.storage, &form.username, &form.groupname)?;
    info!("User {} joined group {}", form.username, form.groupname);
    Ok(StatusCode::OK)
}

/// Record the group on the user document, if the user is known here
fn add_group_to_user(storage: &Storage, username: &str, groupname: &str) -> Result<(), StorageError> {
    let updated = storage.update_user(username, |user| {
        if !user.groups.iter().any(|g| g == groupname) {
            user.groups.push(groupname.to_string());
        }
    })?;
    if updated.is_none() {
        debug!("User {} not stored on this replica", username);
    }
    Ok(())
}

async fn write_post(
    State(state): State<AppState>,
    Form(form): Form<PostForm>,
) -> Result<StatusCode, ServiceError> {
    if form.post.len() > MAX_GOSSIP_BODY {
        return Err(ServiceError::BadRequest("Post is too large to deliver"));
    }
    let post = Post {
        author: form.username,
        group: form.groupname,
        body: form.post,
    };
    let updated = state.storage.update_group(&post.group, |group| {
        group.posts.push(post.clone());
    })?;
    let Some(group) = updated else {
        return Err(ServiceError::NotFound(format!(
            "Group {} does not exist",
            post.group
        )));
    };
    info!("User {} posted in group {}", post.author, post.group);

    if state.leader.is_leader() {
        start_gossip(&state, &group, &post);
    }
    Ok(StatusCode::OK)
}

/// Push a post to the online group mates of its author
fn start_gossip(state: &AppState, group: &Group, post: &Post) {
    let targets = state.sessions.resolve(group.recipients_of(&post.author));
    if targets.is_empty() {
        debug!("No group mates of {} online in {}", post.author, group.name);
        return;
    }

    let id = MessageId::generate();
    let plan = plan_root_fanout(&targets, id, &post.body);
    info!("Gossip {} to {} subscribers of {}", id, targets.len(), group.name);

    let disseminator = state.disseminator.clone();
    tokio::spawn(async move {
        let report = disseminator.dispatch(plan).await;
        debug!(
            "Gossip {} root fan-out: {}/{} delivered",
            id, report.delivered, report.attempted
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use groupcast_core::types::LeaderAnnouncement;
    use groupcast_net::transport;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};
    use tokio::net::TcpListener;
    use tower::ServiceExt;

    fn test_state() -> (AppState, TempDir) {
        let dir = tempdir().unwrap();
        let state = AppState {
            storage: Arc::new(Storage::open(dir.path()).unwrap()),
            sessions: Arc::new(SessionRegistry::new()),
            leader: Arc::new(LeaderFlag::new()),
            disseminator: Disseminator::new(Duration::from_secs(1)),
        };
        (state, dir)
    }

    async fn call(state: &AppState, request: Request<Body>) -> (StatusCode, String) {
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    fn form(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn register_request(username: &str) -> Request<Body> {
        Request::post("/register")
            .body(Body::from(username.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_register() {
        let (state, _dir) = test_state();
        assert_eq!(call(&state, register_request("alice")).await.0, StatusCode::OK);
        assert_eq!(call(&state, register_request("alice")).await.0, StatusCode::CONFLICT);
        assert_eq!(call(&state, register_request("")).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_group_lifecycle() {
        let (state, _dir) = test_state();
        call(&state, register_request("alice")).await;
        call(&state, register_request("bob")).await;

        let create = "username=alice&groupname=cs149";
        assert_eq!(call(&state, form("/creategroup", create)).await.0, StatusCode::OK);
        assert_eq!(call(&state, form("/creategroup", create)).await.0, StatusCode::CONFLICT);
        assert_eq!(
            call(&state, form("/creategroup", "username=alice")).await.0,
            StatusCode::BAD_REQUEST
        );

        let join = "username=bob&groupname=cs149";
        assert_eq!(call(&state, form("/joingroup", join)).await.0, StatusCode::OK);
        assert_eq!(call(&state, form("/joingroup", join)).await.0, StatusCode::OK);
        assert_eq!(
            call(&state, form("/joingroup", "username=bob&groupname=cs999")).await.0,
            StatusCode::NOT_FOUND
        );

        let (status, body) = call(&state, Request::get("/groups").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        let groups: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(groups[0]["groupname"], "cs149");
        assert_eq!(groups[0]["groupmates"], serde_json::json!(["alice", "bob"]));

        let bob = state.storage.find_user("bob").unwrap().unwrap();
        assert_eq!(bob.groups, vec!["cs149".to_string()]);
    }

    #[tokio::test]
    async fn test_oversized_post_is_rejected_before_storing() {
        let (state, _dir) = test_state();
        state.storage.insert_group(&Group::new("cs149", "alice")).unwrap();

        let body = format!(
            "username=alice&groupname=cs149&post={}",
            "a".repeat(MAX_GOSSIP_BODY + 1)
        );
        let (status, _) = call(&state, form("/writepost", &body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(state.storage.find_group("cs149").unwrap().unwrap().posts.is_empty());

        let fits = format!(
            "username=alice&groupname=cs149&post={}",
            "a".repeat(MAX_GOSSIP_BODY)
        );
        assert_eq!(call(&state, form("/writepost", &fits)).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_to_unknown_group() {
        let (state, _dir) = test_state();
        let (status, _) = call(
            &state,
            form("/writepost", "username=alice&groupname=cs149&post=hello"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_leader_gossips_to_online_mates() {
        let (state, _dir) = test_state();
        let own: groupcast_core::types::PeerAddress = "10.0.0.1:8080".parse().unwrap();
        state.leader.apply(LeaderAnnouncement { term: 1, leader: own }, own);

        let mut group = Group::new("cs149", "alice");
        group.add_member("bob");
        state.storage.insert_group(&group).unwrap();

        let subscriber = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let gossip_addr = subscriber.local_addr().unwrap();
        state
            .sessions
            .register("bob", gossip_addr.ip(), gossip_addr.port());
        // the poster is online too but must not receive their own post
        state.sessions.register("alice", gossip_addr.ip(), 1);

        let (status, _) = call(
            &state,
            form("/writepost", "username=alice&groupname=cs149&post=hello"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (stream, _) = tokio::time::timeout(Duration::from_secs(2), subscriber.accept())
            .await
            .unwrap()
            .unwrap();
        let mut framed = transport::framed(stream);
        let message = transport::next_frame(&mut framed)
            .await
            .unwrap()
            .unwrap()
            .into_gossip()
            .unwrap();
        assert_eq!(message.body, "hello");
        assert!(message.is_leaf());

        let stored = state.storage.find_group("cs149").unwrap().unwrap();
        assert_eq!(stored.posts.len(), 1);
        assert_eq!(stored.posts[0].author, "alice");
    }

    #[tokio::test]
    async fn test_follower_stores_without_gossip() {
        let (state, _dir) = test_state();
        state.storage.insert_group(&Group::new("cs149", "alice")).unwrap();

        let (status, _) = call(
            &state,
            form("/writepost", "username=alice&groupname=cs149&post=hi"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            state.storage.find_group("cs149").unwrap().unwrap().posts.len(),
            1
        );
    }
}
