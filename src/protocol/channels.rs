//! Channel names used by the game pages
//!
//! The connection client treats every channel as an opaque string; these
//! helpers only keep the consumers from spelling them by hand.

/// Look up a game by id
pub const FIND: &str = "game/find";
/// Authenticate against a game (username / password)
pub const CONNECT: &str = "game/connect";
/// Server reply when authentication against a game failed
pub const FAIL_CONNECT: &str = "game/fail-connect";
/// Create a new game
pub const CREATE: &str = "game/create";

/// Channel announcing that a player joined the game
pub fn join(game_id: &str) -> String {
    format!("game/{}/join", game_id)
}

/// Channel announcing that a player left the game
pub fn leave(game_id: &str) -> String {
    format!("game/{}/leave", game_id)
}

/// Chat channel of a game
pub fn chat(game_id: &str) -> String {
    format!("game/{}/chat", game_id)
}

/// Extract the game id from a parametrized channel such as `game/{id}/join`
pub fn game_id(channel: &str) -> Option<&str> {
    let rest = channel.strip_prefix("game/")?;
    let (id, _action) = rest.split_once('/')?;
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}
