//! Rewind Engine -- Playback core for recorded world sessions.
//!
//! This crate builds on [`rewind_model`] to play a [`Replay`](rewind_model::replay::Replay)
//! back to a group of viewers. A [`ReplaySession`](session::ReplaySession)
//! turns elapsed wall-clock time into replay-time progress, dispatches
//! recorded actions through an [`ActionRegistry`](dispatch::ActionRegistry),
//! and can seek to any replay time in either direction by reconciling the
//! live world through the [time-step resolver](timestep).
//!
//! The world the replay is rendered into and the channel used to talk to
//! viewers are collaborators behind the [`WorldContext`](collab::WorldContext)
//! and [`ViewerChannel`](collab::ViewerChannel) traits. The [`memory`] module
//! provides headless implementations of both.
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rewind_engine::prelude::*;
//!
//! let mut builder = ReplayBuilder::new();
//! builder.entity(
//!     RecordableEntity::new(RecordedEntityId(1), "zombie")
//!         .with_spawn(RecordablePosition::new(0.0, 64.0, 0.0), RecordableVector::ZERO)
//!         .spawn_on_start(),
//! );
//! builder.duration(Duration::from_secs(30));
//! let replay = Arc::new(builder.finish().unwrap());
//!
//! let world = Arc::new(MemoryWorld::new());
//! let viewers = Arc::new(MemoryViewers::new());
//! let viewer = ViewerId(7);
//! world.place_viewer(viewer, world.create_context().unwrap());
//!
//! let mut session = ReplaySession::new(
//!     replay,
//!     vec![viewer],
//!     Arc::new(ActionRegistry::new()),
//!     world.clone(),
//!     viewers.clone(),
//!     SessionConfig::default(),
//! )
//! .unwrap();
//!
//! session.init().unwrap();
//! session.tick(false, false);
//! assert_eq!(world.entity_count(), 1);
//! ```

#![deny(unsafe_code)]

pub mod collab;
pub mod config;
pub mod dispatch;
pub mod entities;
pub mod live;
pub mod manager;
pub mod memory;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod session;
pub mod status;
pub mod timestep;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the model crate for convenience.
pub use rewind_model;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

use rewind_model::entity::RecordedEntityId;

/// Errors produced while driving a replay session.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    /// A spawn had neither an explicit position nor a default spawn position.
    #[error("entity {entity} cannot be spawned: no position recorded")]
    MissingSpawnPosition { entity: RecordedEntityId },

    /// An action refers to an entity the replay does not define.
    #[error("entity {entity} is not defined by this replay")]
    UnknownEntity { entity: RecordedEntityId },

    /// An action targets an entity that has no live counterpart.
    #[error("'{action}' targets entity {entity}, which is not live")]
    EntityNotLive {
        action: &'static str,
        entity: RecordedEntityId,
    },

    /// A session was created without anybody to watch it.
    #[error("a replay session needs at least one viewer")]
    NoViewers,

    /// The viewer is already watching another session.
    #[error("viewer {viewer} is already watching a replay")]
    ViewerBusy { viewer: collab::ViewerId },

    /// Playback speed must be finite and non-negative.
    #[error("invalid playback speed {speed}")]
    InvalidSpeed { speed: f64 },

    /// The session has been torn down.
    #[error("replay session is closed")]
    SessionClosed,

    /// The operation needs an initialized session.
    #[error("replay session has not been initialized")]
    NotInitialized,

    /// The session configuration was rejected.
    #[error(transparent)]
    InvalidConfig(#[from] config::ConfigError),

    /// A world or viewer collaborator failed.
    #[error(transparent)]
    Collaborator(#[from] collab::CollaboratorError),
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install a `tracing` fmt subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. Does nothing if a
/// global subscriber is already installed.
pub fn init_tracing(default_filter: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    // Re-export everything from the model prelude.
    pub use rewind_model::prelude::*;

    pub use crate::collab::{
        CollaboratorError, ContextId, ViewerChannel, ViewerId, WorldContext, VIEWER_GROUP,
        VIEWER_PREFIX,
    };
    pub use crate::config::{ConfigError, SessionConfig};
    pub use crate::dispatch::{ActionHandlers, ActionRegistry, HandlerFn, PlaybackContext};
    pub use crate::entities::EntityManager;
    pub use crate::live::LiveEntityId;
    pub use crate::manager::{SessionId, SessionManager};
    pub use crate::memory::{MemoryEntity, MemoryViewers, MemoryWorld, ViewerEvent, WorldEvent};
    pub use crate::queue::PendingActions;
    pub use crate::runtime::SessionHandle;
    pub use crate::scheduler::{ReadinessLatch, TaskRegistry};
    pub use crate::session::{ReplaySession, SessionState, TickOutcome, TickReport};
    pub use crate::status::StatusSnapshot;
    pub use crate::timestep::{
        apply_time_step, perform_time_step, plan_time_step, plan_time_step_from, Respawn,
        TimeStepEffect,
    };
    pub use crate::{init_tracing, PlaybackError};
}
