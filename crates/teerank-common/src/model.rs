//! Plain domain structs mirroring the rows of the database schema.
//!
//! Rust strings don't need fixed-size buffers the way the original's C
//! structs did, but values are still truncated to the original
//! `*_STRSIZE` limits at the boundary where they enter the system, so
//! stored data stays within the limits any other reader of this database
//! expects.

pub const NAME_STRSIZE: usize = 16;
pub const CLAN_STRSIZE: usize = 16;
pub const SERVERNAME_STRSIZE: usize = 256;
pub const GAMETYPE_STRSIZE: usize = 32;
pub const MAP_STRSIZE: usize = 64;

pub const MAX_CLIENTS: usize = 64;
pub const MAX_NETCLIENTS: usize = 4096;

pub const DEFAULT_ELO: i32 = 1500;

/// Truncates `s` to at most `max_len` bytes, respecting UTF-8 boundaries.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub name: String,
    pub clan: String,
    pub score: i32,
    pub ingame: bool,
}

impl Client {
    pub fn new(name: &str, clan: &str, score: i32, ingame: bool) -> Self {
        Client {
            name: truncate_str(name, NAME_STRSIZE),
            clan: truncate_str(clan, CLAN_STRSIZE),
            score,
            ingame,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Server {
    pub ip: String,
    pub port: u16,
    pub name: String,
    pub gametype: String,
    pub map: String,
    pub lastseen: i64,
    pub expire: i64,
    pub max_clients: i32,
    pub master_node: Option<String>,
    pub master_service: Option<String>,
    pub clients: Vec<Client>,
}

impl Server {
    pub fn new(ip: &str, port: u16) -> Self {
        Server {
            ip: ip.to_string(),
            port,
            name: String::new(),
            gametype: String::new(),
            map: String::new(),
            lastseen: 0,
            expire: 0,
            max_clients: 0,
            master_node: None,
            master_service: None,
            clients: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Master {
    pub node: String,
    pub service: String,
    pub lastseen: i64,
    pub expire: i64,
}
