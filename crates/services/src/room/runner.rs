use sandbox::Verdict;
use tracing::warn;

use super::service::SharedSession;
use crate::error::SessionError;

/// Verify the current code stage with the sandbox on a blocking thread.
///
/// The session lock is held only to take the program out and to record the verdict, so the
/// timer driver and the sync worker keep running while learner code executes.
///
/// # Errors
///
/// Same as [`RoomSession::finish_run`](super::RoomSession::finish_run).
pub async fn run_current(session: &SharedSession) -> Result<Verdict, SessionError> {
    let run = session.lock().await.begin_run()?;
    let job = run.clone();
    let verdict = match tokio::task::spawn_blocking(move || job.verify()).await {
        Ok(verdict) => verdict,
        Err(err) => {
            warn!(stage = %run.stage().key(), error = %err, "sandbox run aborted");
            return Ok(Verdict::fail("the program run was interrupted"));
        }
    };
    session.lock().await.finish_run(&run, verdict)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use room_core::model::{StageCatalog, StageKey};
    use sandbox::Verifier;

    use super::*;
    use crate::room::RoomSession;

    fn shared() -> SharedSession {
        RoomSession::new(None, Arc::new(StageCatalog::standard()), Verifier::default(), 1)
            .unwrap()
            .shared()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn passing_run_marks_the_stage_solved() {
        let session = shared();
        session
            .lock()
            .await
            .edit_source("function add(a, b) return a + b end")
            .unwrap();

        assert!(run_current(&session).await.unwrap().passed);
        assert!(session.lock().await.state().is_solved(&StageKey::new("format")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn session_stays_available_while_code_runs() {
        let session = shared();
        session
            .lock()
            .await
            .edit_source(
                "local n = 0\nfor i = 1, 1000000 do n = n + 1 end\nfunction add(a, b) return a + b end",
            )
            .unwrap();

        let running = tokio::spawn({
            let session = Arc::clone(&session);
            async move { run_current(&session).await }
        });
        let view = tokio::time::timeout(Duration::from_millis(200), session.lock())
            .await
            .expect("session lock held during the run");
        drop(view);

        let verdict = running.await.unwrap().unwrap();
        assert!(verdict.passed, "{}", verdict.message);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn edits_during_a_run_supersede_it() {
        let session = shared();
        let run = {
            let mut room = session.lock().await;
            room.edit_source("function add(a, b) return a + b end").unwrap();
            room.begin_run().unwrap()
        };
        let verdict = tokio::task::spawn_blocking({
            let run = run.clone();
            move || run.verify()
        })
        .await
        .unwrap();
        assert!(verdict.passed);

        let mut room = session.lock().await;
        room.edit_source("function add(a, b) return 0 end").unwrap();
        assert_eq!(room.finish_run(&run, verdict), Err(SessionError::Superseded));
        assert!(!room.state().is_solved(&StageKey::new("format")));
    }
}
