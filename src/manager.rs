use std::{
    collections::HashMap,
    sync::{Arc, LazyLock},
};

use tokio::sync::RwLock;

use crate::error::Error;
use crate::media::session::StreamSession;
use crate::media::types::SessionConfig;
use crate::source::FrameSource;

static SESSION_MANAGER: LazyLock<RwLock<HashMap<String, Arc<StreamSession>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

pub(crate) fn get_session_manager() -> &'static RwLock<HashMap<String, Arc<StreamSession>>> {
    &SESSION_MANAGER
}

pub(crate) async fn add_session(
    id: &str,
    config: SessionConfig,
    source: Box<dyn FrameSource>,
    replace_if_exists: bool,
) -> Result<(), Error> {
    let mut sessions = SESSION_MANAGER.write().await;
    if sessions.contains_key(id) {
        if !replace_if_exists {
            return Err(Error::SessionExists(id.to_string()));
        } else if let Some(session) = sessions.remove(id) {
            session.cancel();
        }
    }
    let session = Arc::new(StreamSession::new(id, config, source));
    sessions.insert(id.to_string(), Arc::clone(&session));

    tokio::spawn(async move {
        session.start().await;
    });
    Ok(())
}

pub(crate) async fn remove_session(id: &str) -> Result<(), Error> {
    let mut sessions = SESSION_MANAGER.write().await;
    if let Some(session) = sessions.remove(id) {
        session.cancel();
    }
    Ok(())
}

pub(crate) async fn get_session(id: &str) -> Option<Arc<StreamSession>> {
    SESSION_MANAGER.read().await.get(id).cloned()
}

/// First session carrying a broadcast sink, for viewers that don't name
/// one explicitly.
pub(crate) async fn first_broadcast_session() -> Option<Arc<StreamSession>> {
    SESSION_MANAGER
        .read()
        .await
        .values()
        .find(|s| s.frame_cache().is_some())
        .cloned()
}

/// Cancel every live session. Teardown itself runs on the session tasks.
pub(crate) async fn shutdown() {
    let sessions = SESSION_MANAGER.write().await;
    for session in sessions.values() {
        session.cancel();
    }
}
