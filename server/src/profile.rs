//! Player profile lookup for the advertised server name.

use rand::Rng;
use std::env;

/// Supplies the display name a hosted session is advertised under.
pub trait PlayerProfileProvider: Send + Sync {
    fn player_name(&self) -> String;
}

/// Default provider: the machine name, or a random `Player-NNNN` when no
/// machine name is available.
pub struct LanPlayerProfileProvider {
    name: String,
}

impl LanPlayerProfileProvider {
    pub fn new() -> Self {
        Self {
            name: machine_name().unwrap_or_else(generated_name),
        }
    }

    /// Provider with a fixed, caller-chosen name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LanPlayerProfileProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerProfileProvider for LanPlayerProfileProvider {
    fn player_name(&self) -> String {
        self.name.clone()
    }
}

fn machine_name() -> Option<String> {
    ["HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| env::var(var).ok())
        .find(|name| !name.is_empty())
}

fn generated_name() -> String {
    format!("Player-{}", rand::thread_rng().gen_range(1000..10000))
}
