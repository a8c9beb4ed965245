//! Property tests for the tick engine and the time-step resolver.
//!
//! Sessions are driven with explicit instants through `tick_at`/`seek_at`,
//! so wall-clock pacing is fully deterministic.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use rewind_engine::prelude::*;
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const WALKER: RecordedEntityId = RecordedEntityId(1);
const ARROW: RecordedEntityId = RecordedEntityId(2);
const VIEWER: ViewerId = ViewerId(1);
const TICK: Duration = Duration::from_millis(50);

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

fn block(i: usize) -> BlockPosition {
    BlockPosition::new(i as i32 % 3, 64, 0)
}

const MOVE: u8 = 0;
const BLOCK: u8 = 1;
const VELOCITY: u8 = 2;
const STATE: u8 = 3;
const PRESENCE: u8 = 4;

fn at_x(x: f64) -> RecordablePosition {
    RecordablePosition::new(x, 64.0, 0.0)
}

/// Build a replay the time-step resolver can walk both ways.
///
/// The walker moves along x, speeds up, changes pose, and leaves and comes
/// back on `PRESENCE` steps. Removals alternate between carrying the last
/// position and not. While the walker is gone its steps become block
/// changes, so every recorded action targets something live. Three blocks
/// cycle through states and an arrow appears once.
fn reversible_replay(steps: &[(u64, u8)], arrow_at: u64, duration: u64) -> Arc<Replay> {
    let mut stamps: Vec<(u64, u8)> = steps.to_vec();
    stamps.sort_by_key(|&(t, _)| t);

    let mut b = ReplayBuilder::new();
    b.duration(ms(duration));
    b.entity(
        RecordableEntity::new(WALKER, "walker")
            .with_spawn(at_x(0.0), RecordableVector::ZERO)
            .spawn_on_start(),
    );
    b.entity(RecordableEntity::new(ARROW, "arrow"));
    b.record(
        ms(arrow_at),
        EntitySpawn::new(ARROW, Some(RecordablePosition::new(9.0, 70.0, 9.0))),
    );

    let mut live = true;
    let mut x = 0.0;
    let mut speed = 0.0;
    let mut pose: Option<String> = None;
    let mut poses = 0;
    let mut removals = 0;
    let mut blocks = vec![0u32; 3];
    for (i, &(t, kind)) in stamps.iter().enumerate() {
        let kind = match kind {
            MOVE | VELOCITY | STATE if !live => BLOCK,
            other => other,
        };
        match kind {
            MOVE => {
                let from = at_x(x);
                x += 1.0;
                b.record(ms(t), EntityMove::new(WALKER, Some(from), at_x(x)));
            }
            VELOCITY => {
                let previous = RecordableVector::new(speed, 0.0, 0.0);
                speed += 0.5;
                b.record(
                    ms(t),
                    EntityVelocity::new(
                        WALKER,
                        Some(previous),
                        RecordableVector::new(speed, 0.0, 0.0),
                    ),
                );
            }
            STATE => {
                poses += 1;
                let value = format!("pose{poses}");
                let previous = pose.replace(value.clone()).map(serde_json::Value::from);
                b.record(
                    ms(t),
                    EntityState::new(WALKER, "pose", previous, serde_json::Value::from(value)),
                );
            }
            PRESENCE if live => {
                removals += 1;
                let last = (removals % 2 == 0).then(|| at_x(x));
                b.record(ms(t), EntityRemove::new(WALKER, last));
                live = false;
            }
            PRESENCE => {
                // A fresh spawn starts still and without state.
                b.record(ms(t), EntitySpawn::new(WALKER, Some(at_x(x))));
                live = true;
                speed = 0.0;
                pose = None;
            }
            _ => {
                let slot = i % 3;
                let previous = format!("state{}", blocks[slot]);
                blocks[slot] += 1;
                b.record(
                    ms(t),
                    BlockChange::new(block(slot), previous, format!("state{}", blocks[slot])),
                );
            }
        }
    }
    Arc::new(b.finish().unwrap())
}

/// A replay of messages only.
fn message_replay(stamps: &[u64], duration: u64) -> Arc<Replay> {
    let mut b = ReplayBuilder::new();
    b.duration(ms(duration));
    for (i, &t) in stamps.iter().enumerate() {
        b.record(ms(t), ViewerMessage::new(format!("m{i}")));
    }
    Arc::new(b.finish().unwrap())
}

struct Harness {
    world: Arc<MemoryWorld>,
    viewers: Arc<MemoryViewers>,
    session: ReplaySession,
}

fn harness(replay: Arc<Replay>) -> Harness {
    let world = Arc::new(MemoryWorld::new());
    let viewers = Arc::new(MemoryViewers::new());
    world.place_viewer(VIEWER, world.create_context().unwrap());
    let mut session = ReplaySession::new(
        replay,
        vec![VIEWER],
        Arc::new(ActionRegistry::new()),
        world.clone(),
        viewers.clone(),
        SessionConfig::default(),
    )
    .unwrap();
    session.init().unwrap();
    Harness {
        world,
        viewers,
        session,
    }
}

/// Everything a viewer could observe about the world: which entities are
/// live and where, how they move, and their state. Unset blocks read as
/// their initial state.
fn observe(h: &Harness) -> (Vec<(RecordedEntityId, String)>, Vec<String>) {
    let mut entities: Vec<(RecordedEntityId, String)> = h
        .world
        .entities()
        .into_iter()
        .map(|e| {
            let seen = format!("{} {:?} {:?}", e.position, e.velocity, e.state);
            (e.recorded, seen)
        })
        .collect();
    entities.sort();
    let context = h.session.context();
    let blocks = (0..3)
        .map(|i| {
            h.world
                .block_at(context, block(i))
                .unwrap_or_else(|| "state0".to_owned())
        })
        .collect();
    (entities, blocks)
}

fn steps_strategy() -> impl Strategy<Value = Vec<(u64, u8)>> {
    prop::collection::vec((0u64..20_000, 0u8..=PRESENCE), 0..40)
}

/// Steps for a walker that never leaves.
fn staying_steps_strategy() -> impl Strategy<Value = Vec<(u64, u8)>> {
    prop::collection::vec((0u64..20_000, 0u8..PRESENCE), 0..40)
}

// ---------------------------------------------------------------------------
// Tick properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn playback_reaches_end_and_stays(
        stamps in prop::collection::vec(0u64..8_000, 0..30),
        extra in 0u64..2_000,
    ) {
        let duration = stamps.iter().copied().max().unwrap_or(0) + extra + 1;
        let mut h = harness(message_replay(&stamps, duration));
        let base = Instant::now();
        h.session.tick_at(base, false, false);
        h.session.set_paused(false).unwrap();

        let mut previous = Duration::ZERO;
        let mut now = base;
        let mut ended = false;
        for _ in 0..(duration / 50 + 10) {
            now += TICK;
            let report = h.session.tick_at(now, false, false);
            prop_assert!(report.time >= previous);
            prop_assert!(report.time <= ms(duration));
            previous = report.time;
            if report.outcome == TickOutcome::ReachedEnd {
                ended = true;
                break;
            }
        }
        prop_assert!(ended);
        prop_assert!(h.session.is_paused());
        prop_assert_eq!(h.session.time(), ms(duration));
        prop_assert_eq!(h.viewers.messages(VIEWER).len(), stamps.len());

        for _ in 0..5 {
            now += TICK;
            let report = h.session.tick_at(now, false, false);
            prop_assert_eq!(report.outcome, TickOutcome::Paused);
            prop_assert_eq!(report.time, ms(duration));
        }
    }

    #[test]
    fn paused_session_never_moves(ticks in prop::collection::vec(0u64..5_000, 1..20)) {
        let mut h = harness(message_replay(&[100, 2_000], 10_000));
        let mut now = Instant::now();
        for dt in ticks {
            now += ms(dt);
            h.session.tick_at(now, false, false);
        }
        prop_assert_eq!(h.session.time(), Duration::ZERO);
        prop_assert!(h.viewers.messages(VIEWER).is_empty());
    }

    #[test]
    fn zero_speed_never_moves(ticks in prop::collection::vec(0u64..5_000, 1..20)) {
        let mut h = harness(message_replay(&[0, 100, 2_000], 10_000));
        h.session.set_speed(0.0).unwrap();
        h.session.set_paused(false).unwrap();
        let mut now = Instant::now();
        for dt in ticks {
            now += ms(dt);
            let report = h.session.tick_at(now, true, false);
            prop_assert_eq!(report.actions_dispatched, 0);
        }
        prop_assert_eq!(h.session.time(), Duration::ZERO);
    }

    #[test]
    fn start_entities_spawn_exactly_once(
        steps in staying_steps_strategy(),
        seeks in prop::collection::vec(0u64..25_000, 0..8),
    ) {
        let mut h = harness(reversible_replay(&steps, 5_000, 20_000));
        let mut now = Instant::now();
        h.session.tick_at(now, false, false);
        for target in seeks {
            now += TICK;
            h.session.seek_at(now, ms(target)).unwrap();
            now += TICK;
            h.session.tick_at(now, true, false);
        }
        prop_assert_eq!(h.world.instances_of(WALKER).len(), 1);
        prop_assert!(h.world.instances_of(ARROW).len() <= 1);
    }
}

// ---------------------------------------------------------------------------
// Seek properties
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn forward_seek_applies_exactly_the_interval(
        steps in steps_strategy(),
        arrow_at in 0u64..20_000,
        a in 0u64..20_000,
        b in 0u64..20_000,
    ) {
        let (t1, t2) = (a.min(b), a.max(b));
        let replay = reversible_replay(&steps, arrow_at, 20_000);
        let mut h = harness(replay.clone());
        let now = Instant::now();

        h.session.seek_at(now, ms(t1)).unwrap();
        let report = h.session.seek_at(now, ms(t2)).unwrap();

        prop_assert_eq!(report.outcome, TickOutcome::TimeStep);
        prop_assert_eq!(
            report.actions_dispatched,
            replay.actions_between(ms(t1), ms(t2)).len()
        );
        let expected: Vec<Duration> = replay.actions_from(ms(t2)).iter().map(|a| a.timestamp).collect();
        prop_assert_eq!(h.session.pending().timestamps(), expected);
    }

    #[test]
    fn backward_seek_round_trips(
        steps in steps_strategy(),
        arrow_at in 0u64..20_000,
        a in 0u64..20_000,
        b in 0u64..20_000,
    ) {
        let (t1, t2) = (a.min(b), a.max(b));
        let mut h = harness(reversible_replay(&steps, arrow_at, 20_000));
        let now = Instant::now();

        h.session.seek_at(now, ms(t1)).unwrap();
        let before = observe(&h);
        let queue_before = h.session.pending().timestamps();

        h.session.seek_at(now, ms(t2)).unwrap();
        h.session.seek_at(now, ms(t1)).unwrap();

        prop_assert_eq!(observe(&h), before);
        prop_assert_eq!(h.session.pending().timestamps(), queue_before);
        prop_assert_eq!(h.session.time(), ms(t1));
    }

    #[test]
    fn seeking_matches_fresh_seek(
        steps in steps_strategy(),
        arrow_at in 0u64..20_000,
        path in prop::collection::vec(0u64..20_000, 1..6),
    ) {
        let replay = reversible_replay(&steps, arrow_at, 20_000);
        let target = *path.last().unwrap();

        let mut wandering = harness(replay.clone());
        let now = Instant::now();
        for &t in &path {
            wandering.session.seek_at(now, ms(t)).unwrap();
        }

        let mut direct = harness(replay);
        direct.session.seek_at(now, ms(target)).unwrap();

        prop_assert_eq!(observe(&wandering), observe(&direct));
    }
}

// ---------------------------------------------------------------------------
// Playback then seek
// ---------------------------------------------------------------------------

#[test]
fn seek_after_playback_keeps_pending_action_at_current_time() {
    // Playback stops exactly on the move's timestamp without applying it;
    // seeking forward from there must still apply it once.
    let replay = reversible_replay(&[(1_000, MOVE)], 15_000, 20_000);
    let mut h = harness(replay);
    let base = Instant::now();
    h.session.tick_at(base, false, false);
    h.session.set_paused(false).unwrap();
    h.session.tick_at(base + ms(1_000), false, false);
    assert_eq!(h.session.pending().timestamps().first(), Some(&ms(1_000)));

    h.session.seek_at(base + ms(1_000), ms(2_000)).unwrap();
    let walker = h.world.entity_for(WALKER).unwrap();
    assert_eq!(walker.position, RecordablePosition::new(1.0, 64.0, 0.0));
}

#[test]
fn backward_seek_from_unapplied_point_does_not_undo_it() {
    let replay = reversible_replay(&[(1_000, MOVE)], 15_000, 20_000);
    let mut h = harness(replay);
    let base = Instant::now();
    h.session.tick_at(base, false, false);
    h.session.set_paused(false).unwrap();
    h.session.tick_at(base + ms(1_000), false, false);

    let report = h.session.seek_at(base + ms(1_000), ms(500)).unwrap();
    assert_eq!(report.actions_dispatched, 0);
    let walker = h.world.entity_for(WALKER).unwrap();
    assert_eq!(walker.position, RecordablePosition::new(0.0, 64.0, 0.0));
}
