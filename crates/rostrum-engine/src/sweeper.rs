//! Background sweep for rooms whose audio buffer went quiet.
//!
//! The inactivity flush trigger has no frame arrival to piggyback on, so a
//! periodic task scans for buffers past the inactivity window and runs the
//! turn pipeline for them. Without it, a user who trails off mid-sentence
//! would wait forever for a rebuttal.

use crate::pipeline::DebateEngine;
use std::time::Duration;

/// How often the sweep looks for inactive buffers.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Spawns the sweep loop. Runs until the process exits.
pub fn spawn_timeout_sweeper(engine: DebateEngine) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            // spawn_turn keeps each room's turn on its own task, so one
            // slow pipeline cannot delay the sweep for every other room.
            for room_id in engine.ingest().rooms_past_timeout().await {
                tracing::info!(room_id = %room_id, "inactivity flush");
                if let Err(e) = engine.spawn_turn(room_id).await {
                    tracing::warn!(room_id = %room_id, "inactivity flush failed: {}", e);
                }
            }
        }
    })
}
