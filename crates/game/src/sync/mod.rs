//! Client and server synchronizers, plus the traits for the collaborators
//! they drive each tick.

mod client;
mod server;

pub use client::{ClientState, ClientSync, ClientSyncStats};
pub use server::{ClientRecord, PeerPhase, ServerSync, TickReport};

use glam::Mat4;

use crate::codec::{CameraState, InputSample, WorldSnapshot};

/// Produces the local input state once per client tick.
pub trait InputSource {
    fn sample(&mut self) -> InputSample;
}

/// Consumes the snapshot applied for a client tick. Transforms are matched
/// to locally registered drawables by position.
pub trait Renderer {
    fn render(&mut self, snapshot: &WorldSnapshot);
}

/// Authoritative world state on the server.
pub trait Simulation {
    fn apply_input(&mut self, sample: &InputSample);

    fn advance(&mut self, dt: f32);

    fn camera(&self) -> CameraState;

    /// One local-to-world transform per registered drawable, in registration
    /// order.
    fn transforms(&self) -> Vec<Mat4>;

    fn client_left(&mut self, _client_id: u32) {}
}
