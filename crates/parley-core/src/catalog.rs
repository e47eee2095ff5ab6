use serde::{Deserialize, Serialize};

/// The mention target that means "hand back to the human user". Directives
/// addressed to it never produce an agent call.
pub const HUMAN_SENTINEL: &str = "铲屎官";

/// Caller tag recorded on calls and chat-log lines that originate from a
/// user message (agent-originated calls carry the agent's name instead).
pub const USER_CALLER: &str = "user";

/// Client-side id of the human user.
pub const USER_ID: &str = "user_001";

/// Display name of the human user on sender descriptors.
pub const USER_NAME: &str = "用户";

/// Static id↔name↔colour table for the stock cats. The avatar comes from the
/// runtime agent config, everything else is fixed client-side vocabulary.
const CATS: &[(&str, &str, &str)] = &[
    ("cat_001", "花花", "#ff9966"),
    ("cat_002", "薇薇", "#d9bf99"),
    ("cat_003", "小乔", "#cccccc"),
];

/// Resolves a client-side cat id (e.g. `cat_001`) to the canonical agent name.
pub fn cat_name_for_id(id: &str) -> Option<&'static str> {
    CATS.iter().find(|(i, _, _)| *i == id).map(|(_, n, _)| *n)
}

/// Resolves an agent name to its client-side cat id.
pub fn cat_id_for_name(name: &str) -> Option<&'static str> {
    CATS.iter().find(|(_, n, _)| *n == name).map(|(i, _, _)| *i)
}

/// Display colour for a cat, by agent name.
pub fn cat_color_for_name(name: &str) -> Option<&'static str> {
    CATS.iter().find(|(_, n, _)| *n == name).map(|(_, _, c)| *c)
}

/// A catalogue entry as served to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cat {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub color: String,
    /// idle, busy or offline.
    pub status: String,
}
