//! Decodes the four server-info wire dialects plus their multi-packet
//! continuation, and dispatches on the packet's magic-byte prefix.
//!
//! Legacy-64 servers with more clients than fit one packet send the
//! overflow as a follow-up `iex+` packet that only carries a token and
//! the next slice of the client list. That continuation is modeled here
//! as an explicit received-so-far counter on [`PartialServerInfo`]
//! rather than by re-entering a parser, so there is no hidden global
//! cursor anywhere in this module.

use teerank_common::model::{Client, Server, MAX_CLIENTS};

use crate::error::UnpackError;

const MSG_INFO: &[u8; 4] = b"inf3";
const MSG_INFO_64: &[u8; 4] = b"dtsf";
const MSG_INFO_EXTENDED: &[u8; 4] = b"iext";
const MSG_INFO_EXTENDED_MORE: &[u8; 4] = b"iex+";
const MSG_LIST: &[u8; 4] = b"lis2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Info,
    Info64,
    InfoExtended,
    InfoExtendedMore,
    List,
}

pub fn packet_type(payload: &[u8]) -> Option<PacketType> {
    if payload.len() < 4 {
        return None;
    }
    let magic = &payload[..4];
    if magic == MSG_INFO {
        Some(PacketType::Info)
    } else if magic == MSG_INFO_64 {
        Some(PacketType::Info64)
    } else if magic == MSG_INFO_EXTENDED {
        Some(PacketType::InfoExtended)
    } else if magic == MSG_INFO_EXTENDED_MORE {
        Some(PacketType::InfoExtendedMore)
    } else if magic == MSG_LIST {
        Some(PacketType::List)
    } else {
        None
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    fn can_unpack(&self) -> bool {
        self.pos < self.data.len()
    }

    fn unpack_str(&mut self) -> Result<String, UnpackError> {
        if self.pos >= self.data.len() {
            return Err(UnpackError::TruncatedString);
        }
        let rest = &self.data[self.pos..];
        let nul = rest.iter().position(|&b| b == 0).ok_or(UnpackError::TruncatedString)?;
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }

    fn skip_str(&mut self) -> Result<(), UnpackError> {
        self.unpack_str().map(|_| ())
    }

    fn unpack_int(&mut self) -> Result<i32, UnpackError> {
        let s = self.unpack_str()?;
        s.trim().parse::<i32>().map_err(|_| UnpackError::BadInteger)
    }

    fn skip_byte(&mut self) -> Result<(), UnpackError> {
        if self.pos >= self.data.len() {
            return Err(UnpackError::Eof);
        }
        self.pos += 1;
        Ok(())
    }
}

/// A server-info decode in progress: the fields from the header packet
/// (or defaults, until one arrives) plus however many clients have been
/// accumulated across however many packets.
#[derive(Debug, Clone)]
pub struct PartialServerInfo {
    pub server: Server,
    pub num_clients: i32,
}

impl PartialServerInfo {
    pub fn new(ip: &str, port: u16) -> Self {
        PartialServerInfo {
            server: Server::new(ip, port),
            num_clients: 0,
        }
    }
}

#[derive(Debug)]
pub enum UnpackOutcome {
    Complete(Server),
    Incomplete,
}

pub fn unpack_server_info(
    payload: &[u8],
    state: &mut PartialServerInfo,
) -> Result<UnpackOutcome, UnpackError> {
    let ptype = packet_type(payload).ok_or(UnpackError::UnknownMagic)?;
    if ptype == PacketType::List {
        return Err(UnpackError::UnknownMagic);
    }

    let mut cur = Cursor::new(&payload[4..]);

    if ptype == PacketType::InfoExtendedMore {
        cur.skip_str()?; // token
        cur.skip_byte()?; // pckno
        cur.skip_byte()?; // reserved
    } else {
        cur.skip_str()?; // token
        cur.skip_str()?; // version
        state.server.name = teerank_common::model::truncate_str(
            &cur.unpack_str()?,
            teerank_common::model::SERVERNAME_STRSIZE,
        );
        state.server.map = teerank_common::model::truncate_str(
            &cur.unpack_str()?,
            teerank_common::model::MAP_STRSIZE,
        );
        if ptype == PacketType::InfoExtended {
            cur.skip_str()?; // map_crc
            cur.skip_str()?; // map_size
        }
        state.server.gametype = teerank_common::model::truncate_str(
            &cur.unpack_str()?,
            teerank_common::model::GAMETYPE_STRSIZE,
        );
        cur.skip_str()?; // flags
        cur.skip_str()?; // num_players
        cur.skip_str()?; // max_players

        let num_clients = cur.unpack_int()?;
        let max_clients = cur.unpack_int()?;
        if num_clients > max_clients
            || num_clients as usize > MAX_CLIENTS
            || max_clients as usize > MAX_CLIENTS
            || num_clients < 0
            || max_clients < 0
        {
            return Err(UnpackError::ClientCountOutOfBounds);
        }
        state.server.max_clients = max_clients;
        state.num_clients = num_clients;
        state.server.clients.clear();

        match ptype {
            PacketType::Info64 => cur.skip_byte()?, // client-list offset
            PacketType::InfoExtended => cur.skip_byte()?, // reserved
            _ => {}
        }
    }

    unpack_clients(&mut cur, state, ptype)?;

    if state.server.clients.len() as i32 >= state.num_clients {
        Ok(UnpackOutcome::Complete(state.server.clone()))
    } else {
        Ok(UnpackOutcome::Incomplete)
    }
}

fn unpack_clients(
    cur: &mut Cursor,
    state: &mut PartialServerInfo,
    ptype: PacketType,
) -> Result<(), UnpackError> {
    while cur.can_unpack() && state.server.clients.len() < MAX_CLIENTS {
        let name = cur.unpack_str()?;
        let clan = cur.unpack_str()?;
        cur.skip_str()?; // country
        let score = cur.unpack_int()?;
        let ingame = cur.unpack_int()? != 0;
        if matches!(ptype, PacketType::InfoExtended | PacketType::InfoExtendedMore) {
            cur.skip_byte()?; // reserved
        }
        state.server.clients.push(Client::new(&name, &clan, score, ingame));
    }
    Ok(())
}
