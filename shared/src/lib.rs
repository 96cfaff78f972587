pub mod codec;
pub mod inventory;
pub mod protocol;
pub mod types;

pub use codec::{decode, encode, read_frame, write_frame, CodecError};
pub use inventory::Inventory;
pub use protocol::{ClientEvent, ServerEvent};
pub use types::*;

pub const WORLD_WIDTH: f32 = 2000.0;
pub const WORLD_HEIGHT: f32 = 2000.0;
pub const PARTY_CAPACITY: usize = 4;
pub const ATTACK_VISUAL_MS: u64 = 300;
pub const PICKUP_RANGE: f32 = 64.0;
pub const MAX_CHAT_LEN: usize = 200;

pub fn distance(x1: f32, y1: f32, x2: f32, y2: f32) -> f32 {
    let dx = x2 - x1;
    let dy = y2 - y1;
    (dx * dx + dy * dy).sqrt()
}

/// Moves `(x, y)` toward `(tx, ty)` by at most `step`, never overshooting.
pub fn step_toward(x: f32, y: f32, tx: f32, ty: f32, step: f32) -> (f32, f32) {
    let dist = distance(x, y, tx, ty);
    if dist <= step || dist < 0.001 {
        return (tx, ty);
    }
    let ratio = step / dist;
    (x + (tx - x) * ratio, y + (ty - y) * ratio)
}

pub fn clamp_to_world(x: f32, y: f32) -> (f32, f32) {
    (x.clamp(0.0, WORLD_WIDTH), y.clamp(0.0, WORLD_HEIGHT))
}
