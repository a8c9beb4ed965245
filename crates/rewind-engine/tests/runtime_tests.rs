//! End-to-end playback on a paused tokio clock.

use std::sync::Arc;
use std::time::Duration;

use rewind_engine::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const ZOMBIE: RecordedEntityId = RecordedEntityId(1);
const GHOST: RecordedEntityId = RecordedEntityId(2);

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// A 30 second replay: a zombie present from the start walks once at 10s.
fn walk_replay(has_chunks: bool) -> Arc<Replay> {
    let mut builder = ReplayBuilder::new();
    builder
        .duration(secs(30))
        .has_chunks(has_chunks)
        .entity(
            RecordableEntity::new(ZOMBIE, "zombie")
                .with_spawn(RecordablePosition::new(0.0, 64.0, 0.0), RecordableVector::ZERO)
                .spawn_on_start(),
        )
        .record(
            secs(10),
            EntityMove::new(
                ZOMBIE,
                Some(RecordablePosition::new(0.0, 64.0, 0.0)),
                RecordablePosition::new(4.0, 64.0, 2.0),
            ),
        );
    Arc::new(builder.finish().unwrap())
}

struct Setup {
    world: Arc<MemoryWorld>,
    channel: Arc<MemoryViewers>,
    handle: SessionHandle,
}

fn launch(replay: Arc<Replay>, viewers: &[ViewerId]) -> Setup {
    let world = Arc::new(MemoryWorld::new());
    let channel = Arc::new(MemoryViewers::new());
    let lobby = world.create_context().unwrap();
    for &viewer in viewers {
        world.place_viewer(viewer, lobby);
    }
    let session = ReplaySession::new(
        replay,
        viewers.to_vec(),
        Arc::new(ActionRegistry::new()),
        world.clone(),
        channel.clone(),
        SessionConfig::default(),
    )
    .unwrap();
    let handle = SessionHandle::launch(session).unwrap();
    Setup {
        world,
        channel,
        handle,
    }
}

fn spawn_count(world: &MemoryWorld, recorded: RecordedEntityId) -> usize {
    world
        .events()
        .iter()
        .filter(|e| matches!(e, WorldEvent::Spawned { recorded: r, .. } if *r == recorded))
        .count()
}

fn move_count(world: &MemoryWorld) -> usize {
    world
        .events()
        .iter()
        .filter(|e| matches!(e, WorldEvent::Moved { .. }))
        .count()
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn plays_then_seeks_back_over_a_move() {
    let Setup { world, handle, .. } = launch(walk_replay(false), &[ViewerId(1)]);
    handle.set_paused(false).unwrap();
    tokio::time::sleep(ms(10_100)).await;

    assert_eq!(spawn_count(&world, ZOMBIE), 1);
    assert_eq!(move_count(&world), 1);
    let time = handle.status().time;
    assert!(time >= secs(10) && time <= ms(10_200), "time was {time:?}");
    assert_eq!(
        world.entity_for(ZOMBIE).unwrap().position,
        RecordablePosition::new(4.0, 64.0, 2.0)
    );

    let report = handle.seek_to(secs(5)).unwrap();
    assert_eq!(report.outcome, TickOutcome::TimeStep);
    assert_eq!(report.actions_dispatched, 1);
    assert_eq!(handle.status().time, secs(5));
    assert_eq!(
        world.entity_for(ZOMBIE).unwrap().position,
        RecordablePosition::new(0.0, 64.0, 0.0)
    );
    assert_eq!(handle.lock().pending().timestamps(), vec![secs(10)]);
    assert_eq!(world.instances_of(ZOMBIE).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn pausing_freezes_replay_time() {
    let Setup { handle, .. } = launch(walk_replay(false), &[ViewerId(1)]);
    handle.set_paused(false).unwrap();
    tokio::time::sleep(secs(3)).await;

    handle.set_paused(true).unwrap();
    let frozen = handle.status().time;
    tokio::time::sleep(secs(5)).await;
    assert_eq!(handle.status().time, frozen);
    assert!(handle.status().paused);
}

#[tokio::test(start_paused = true)]
async fn speed_scales_replay_time() {
    let Setup { handle, .. } = launch(walk_replay(false), &[ViewerId(1)]);
    handle.set_speed(2.0).unwrap();
    handle.set_paused(false).unwrap();
    tokio::time::sleep(secs(2)).await;

    let time = handle.status().time;
    assert!(time >= ms(3_800) && time <= ms(4_200), "time was {time:?}");
    assert!(matches!(
        handle.set_speed(-1.0),
        Err(PlaybackError::InvalidSpeed { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn replay_pauses_at_end_and_resume_restarts() {
    let Setup { world, handle, .. } = launch(walk_replay(false), &[ViewerId(1)]);
    handle.set_speed(10.0).unwrap();
    handle.set_paused(false).unwrap();
    tokio::time::sleep(secs(4)).await;

    let status = handle.status();
    assert!(status.paused);
    assert_eq!(status.time, secs(30));
    assert!(handle.is_active());

    handle.set_paused(false).unwrap();
    assert_eq!(handle.status().time, Duration::ZERO);
    assert!(!handle.status().paused);
    assert_eq!(
        world.entity_for(ZOMBIE).unwrap().position,
        RecordablePosition::new(0.0, 64.0, 0.0)
    );
}

#[tokio::test(start_paused = true)]
async fn stepping_moves_by_the_step_duration() {
    let Setup { handle, .. } = launch(walk_replay(false), &[ViewerId(1)]);
    tokio::time::sleep(ms(100)).await;

    handle.set_step_duration(secs(7)).unwrap();
    assert_eq!(handle.step_forward().unwrap().time, secs(7));
    assert_eq!(handle.step_forward().unwrap().time, secs(14));
    assert_eq!(handle.step_backward().unwrap().time, secs(7));
    assert_eq!(handle.restart().unwrap().time, Duration::ZERO);
    assert_eq!(handle.step_backward().unwrap().time, Duration::ZERO);
}

// ---------------------------------------------------------------------------
// Failure and teardown
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn dispatch_failure_aborts_once() {
    let mut builder = ReplayBuilder::new();
    builder
        .duration(secs(10))
        .entity(RecordableEntity::new(GHOST, "ghost"))
        .record(
            secs(1),
            EntityMove::new(GHOST, None, RecordablePosition::new(1.0, 1.0, 1.0)),
        );
    let Setup {
        channel, handle, ..
    } = launch(Arc::new(builder.finish().unwrap()), &[ViewerId(1), ViewerId(2)]);

    handle.set_paused(false).unwrap();
    tokio::time::sleep(secs(2)).await;

    let failure = SessionConfig::default().failure_message;
    assert_eq!(channel.messages(ViewerId(1)), vec![failure.clone()]);
    assert_eq!(channel.messages(ViewerId(2)), vec![failure]);
    assert!(!handle.is_active());
    assert_eq!(handle.tasks().active_tasks(), 0);
    assert!(matches!(
        handle.lock().last_failure(),
        Some(PlaybackError::EntityNotLive { .. })
    ));

    tokio::time::sleep(secs(5)).await;
    assert_eq!(channel.messages(ViewerId(1)).len(), 1);
    assert!(handle.seek_to(secs(3)).is_err());
}

#[tokio::test(start_paused = true)]
async fn last_viewer_leaving_releases_everything() {
    let Setup {
        world,
        channel,
        handle,
    } = launch(walk_replay(true), &[ViewerId(1), ViewerId(2)]);
    let context = handle.lock().context();
    assert!(handle.lock().owns_context());

    handle.viewer_ready(ViewerId(1));
    handle.viewer_ready(ViewerId(2));
    tokio::time::sleep(ms(200)).await;
    assert_eq!(world.entity_count(), 1);
    assert!(channel.in_group(ViewerId(1)));

    assert!(handle.remove_viewer(ViewerId(1)));
    tokio::time::sleep(ms(200)).await;
    assert!(handle.is_active());
    assert!(!channel.in_group(ViewerId(1)));
    assert_eq!(world.entity_count(), 1);

    assert!(handle.remove_viewer(ViewerId(2)));
    tokio::time::sleep(ms(200)).await;
    assert!(!handle.is_active());
    assert_eq!(handle.tasks().active_tasks(), 0);
    assert_eq!(world.entity_count(), 0);
    assert!(!world.context_exists(context));
    assert!(channel.group_members().is_empty());
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn manager_runs_independent_sessions() {
    let world = Arc::new(MemoryWorld::new());
    let channel = Arc::new(MemoryViewers::new());
    let lobby = world.create_context().unwrap();
    for viewer in [ViewerId(1), ViewerId(2)] {
        world.place_viewer(viewer, lobby);
    }
    let manager = SessionManager::new(world.clone(), channel.clone(), SessionConfig::default());

    let (first, a) = manager
        .start_session(walk_replay(false), vec![ViewerId(1)])
        .unwrap();
    let (second, b) = manager
        .start_session(walk_replay(false), vec![ViewerId(2)])
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(manager.active_sessions(), 2);

    a.set_paused(false).unwrap();
    tokio::time::sleep(secs(1)).await;
    assert!(a.status().time > Duration::ZERO);
    assert_eq!(b.status().time, Duration::ZERO);

    assert!(manager.stop_session(first));
    assert_eq!(manager.active_sessions(), 1);
    assert!(b.is_active());

    manager.shutdown_all();
    assert_eq!(manager.active_sessions(), 0);
    assert!(!b.is_active());
    assert_eq!(world.entity_count(), 0);
}
