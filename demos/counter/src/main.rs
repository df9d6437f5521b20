//! A visit counter driven through simulated requests.
//!
//! Each "request" is a [`BasicRequest`] carrying the cookie issued by the
//! previous one, so the run shows a session being created, reloaded,
//! regenerated on login, and destroyed on logout. Sessions land in the
//! JSON file given as the first argument (default `sessions.json`).
//!
//! ```text
//! cargo run -p sesskit-counter -- /tmp/sessions.json
//! RUST_LOG=sesskit_session=debug cargo run -p sesskit-counter
//! ```

use sesskit::SessionError;
use sesskit::prelude::*;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), SesskitError> {
    sesskit::init_tracing("info");

    let settings = SessionSettings::default().apply_env()?;
    settings.validate()?;
    let key = settings.key.clone();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| FileStore::DEFAULT_FILE.to_string());
    let sessions = settings.into_builder().build(FileStore::new(&path));
    info!(%path, "counter demo starting");

    let mut cookie: Option<String> = None;
    for target in ["/", "/", "/login", "/", "/logout", "/"] {
        let mut req = match &cookie {
            Some(sid) => BasicRequest::new(target).with_cookie(&key, sid),
            None => BasicRequest::new(target),
        };

        let visits = sessions
            .scope(&mut req, async |handle| handle_request(handle).await)
            .await??;
        info!(path = target, visits, "request handled");

        if let Some(issued) = req.issued(&key) {
            cookie = issued.map(str::to_string);
        }
    }

    Ok(())
}

async fn handle_request<C: StoreClient>(
    handle: &mut SessionHandle<'_, C>,
) -> Result<u64, SesskitError> {
    match handle.request().path() {
        "/login" => {
            handle.regenerate().await?;
            if let Some(session) = handle.session_mut() {
                session.insert("user", "ada").map_err(SessionError::from)?;
            }
            Ok(0)
        }
        "/logout" => {
            handle.clear();
            Ok(0)
        }
        _ => {
            let Some(session) = handle.session_mut() else {
                return Ok(0);
            };
            let visits = session.get::<u64>("visits").unwrap_or(0) + 1;
            session.insert("visits", visits).map_err(SessionError::from)?;
            Ok(visits)
        }
    }
}
