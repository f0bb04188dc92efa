//! Elo ranking engine: turns one server's old/new client snapshots into
//! staged `pending` rows, and periodically flushes `pending` into
//! `ranks` with freshly recomputed rank numbers.
//!
//! Ranking is staged rather than applied directly because recomputing
//! every player's rank is an O(n log n) full-table operation; doing it
//! once per batch of servers rather than once per server reply keeps
//! the update loop's per-packet cost flat.

use std::collections::HashSet;

use log::debug;
use rusqlite::{params, Connection};
use teerank_common::db;
use teerank_common::error::DbError;
use teerank_common::model::{Server, DEFAULT_ELO};

const K: f64 = 25.0;
const MIN_RANKABLE_PLAYERS: usize = 4;
const MIN_ELAPSED_SECS: i64 = 60;
const MAX_ELAPSED_SECS: i64 = 1800;
const NEW_GAME_SCORE_DROP: f64 = 3.0;

#[derive(Debug, Clone)]
struct PlayerInfo {
    name: String,
    old_score: Option<i32>,
    new_score: i32,
    ingame: bool,
    gametype_elo: i32,
    map_elo: i32,
    rankable: bool,
}

fn elo_probability(delta: f64) -> f64 {
    let clamped = delta.clamp(-400.0, 400.0);
    1.0 / (1.0 + 10f64.powf(-clamped / 400.0))
}

/// A missing row just means the player has no elo yet for this bucket
/// (defaults to [`DEFAULT_ELO`]); a genuine read error is propagated so
/// the caller can skip the player for this round instead of silently
/// resetting them to the default.
fn latest_elo(conn: &Connection, name: &str, gametype: &str, map: &str) -> Result<i32, DbError> {
    match conn.query_row(
        "SELECT elo FROM pending WHERE name = ?1 AND gametype = ?2 AND map = ?3",
        params![name, gametype, map],
        |r| r.get(0),
    ) {
        Ok(elo) => return Ok(elo),
        Err(rusqlite::Error::QueryReturnedNoRows) => {}
        Err(e) => return Err(e.into()),
    }

    match conn.query_row(
        "SELECT elo FROM ranks WHERE name = ?1 AND gametype = ?2 AND map = ?3",
        params![name, gametype, map],
        |r| r.get(0),
    ) {
        Ok(elo) => Ok(elo),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(DEFAULT_ELO),
        Err(e) => Err(e.into()),
    }
}

fn load_players(conn: &Connection, old: &Server, new: &Server) -> Result<Vec<PlayerInfo>, DbError> {
    let mut players = Vec::with_capacity(new.clients.len());
    let mut seen = HashSet::new();

    for client in &new.clients {
        if !seen.insert(client.name.clone()) {
            continue;
        }
        let gametype_elo = match latest_elo(conn, &client.name, &new.gametype, "") {
            Ok(elo) => elo,
            Err(e) => {
                debug!("skipping {} this round, elo read failed: {e}", client.name);
                continue;
            }
        };
        let map_elo = match latest_elo(conn, &client.name, &new.gametype, &new.map) {
            Ok(elo) => elo,
            Err(e) => {
                debug!("skipping {} this round, elo read failed: {e}", client.name);
                continue;
            }
        };
        let old_score = old.clients.iter().find(|c| c.name == client.name).map(|c| c.score);

        players.push(PlayerInfo {
            name: client.name.clone(),
            old_score,
            new_score: client.score,
            ingame: client.ingame,
            gametype_elo,
            map_elo,
            rankable: false,
        });
    }

    Ok(players)
}

fn elapsed_time(old: &Server, new: &Server) -> i64 {
    if old.lastseen > new.lastseen {
        0
    } else {
        new.lastseen - old.lastseen
    }
}

fn is_new_game(players: &[PlayerInfo]) -> bool {
    let mut old_sum = 0i64;
    let mut new_sum = 0i64;
    let mut n = 0i64;

    for p in players {
        if let Some(old_score) = p.old_score {
            old_sum += old_score as i64;
            new_sum += p.new_score as i64;
            n += 1;
        }
    }

    if n == 0 {
        return false;
    }

    let old_avg = old_sum as f64 / n as f64;
    let new_avg = new_sum as f64 / n as f64;
    old_avg - new_avg > NEW_GAME_SCORE_DROP
}

/// Marks which players in `players` are rankable, returning how many
/// are. A server that changed game or map since the last poll, polled
/// too soon or too late, with a suspicious average score drop, or with
/// fewer than four rankable players, ranks nobody.
fn mark_rankable_players(old: &Server, new: &Server, players: &mut [PlayerInfo]) -> usize {
    let elapsed = elapsed_time(old, new);

    let disqualified = is_new_game(players)
        || old.gametype != new.gametype
        || old.map != new.map
        || elapsed > MAX_ELAPSED_SECS
        || elapsed < MIN_ELAPSED_SECS;

    if disqualified {
        for p in players.iter_mut() {
            p.rankable = false;
        }
        return 0;
    }

    let mut count = 0;
    for p in players.iter_mut() {
        p.rankable = p.old_score.is_some() && p.ingame;
        if p.rankable {
            count += 1;
        }
    }

    if count < MIN_RANKABLE_PLAYERS {
        for p in players.iter_mut() {
            p.rankable = false;
        }
        return 0;
    }

    count
}

/// Elo delta from one pairwise comparison, truncated to an integer
/// before being returned — the original truncates per pair, then again
/// when averaging, and this preserves that double truncation.
fn pairwise_delta(a: &PlayerInfo, b: &PlayerInfo) -> (i32, i32) {
    let score_delta_a = a.new_score - a.old_score.unwrap_or(a.new_score);
    let score_delta_b = b.new_score - b.old_score.unwrap_or(b.new_score);

    let w = if score_delta_a < score_delta_b {
        0.0
    } else if score_delta_a == score_delta_b {
        0.5
    } else {
        1.0
    };

    let gametype_delta = (K * (w - elo_probability((a.gametype_elo - b.gametype_elo) as f64))) as i32;
    let map_delta = (K * (w - elo_probability((a.map_elo - b.map_elo) as f64))) as i32;

    (gametype_delta, map_delta)
}

fn compute_new_elo(index: usize, players: &[PlayerInfo]) -> (i32, i32) {
    let player = &players[index];
    let mut total_gametype = 0i32;
    let mut total_map = 0i32;
    let mut count = 0i32;

    for (j, other) in players.iter().enumerate() {
        if j == index || !other.rankable {
            continue;
        }
        let (gt, map) = pairwise_delta(player, other);
        total_gametype += gt;
        total_map += map;
        count += 1;
    }

    if count == 0 {
        return (player.gametype_elo, player.map_elo);
    }

    (
        player.gametype_elo + total_gametype / count,
        player.map_elo + total_map / count,
    )
}

fn update_elos(conn: &Connection, players: &[PlayerInfo], gametype: &str, map: &str) -> Result<usize, DbError> {
    let mut ranked = 0;
    for (i, player) in players.iter().enumerate() {
        if !player.rankable {
            continue;
        }
        let (new_gametype_elo, new_map_elo) = compute_new_elo(i, players);

        conn.execute(
            "INSERT OR REPLACE INTO pending (name, gametype, map, elo) VALUES (?1, ?2, '', ?3)",
            params![player.name, gametype, new_gametype_elo],
        )?;
        conn.execute(
            "INSERT OR REPLACE INTO pending (name, gametype, map, elo) VALUES (?1, ?2, ?3, ?4)",
            params![player.name, gametype, map, new_map_elo],
        )?;

        debug!(
            "rank: {} score {} -> {} | gametype elo {} -> {} | map elo {} -> {}",
            player.name,
            player.old_score.unwrap_or(player.new_score),
            player.new_score,
            player.gametype_elo,
            new_gametype_elo,
            player.map_elo,
            new_map_elo
        );
        ranked += 1;
    }
    Ok(ranked)
}

/// Stages Elo updates for every rankable player found by comparing
/// `old` and `new` snapshots of the same server. Returns how many
/// players were actually ranked (0 when the server wasn't rankable at
/// all this round).
pub fn rank_players(conn: &Connection, old: &Server, new: &Server) -> Result<usize, DbError> {
    let mut players = load_players(conn, old, new)?;
    let rankable = mark_rankable_players(old, new, &mut players);
    if rankable == 0 {
        return Ok(0);
    }
    update_elos(conn, &players, &new.gametype, &new.map)
}

fn apply_pending_elo(conn: &Connection, now: i64) -> Result<(), DbError> {
    conn.execute(
        "INSERT OR REPLACE INTO ranks (name, gametype, map, elo, rank, lastseen)
         SELECT name, gametype, map, elo, NULL, ?1 FROM pending",
        params![now],
    )?;
    Ok(())
}

fn distinct_pending_buckets(conn: &Connection) -> Result<Vec<(String, String)>, DbError> {
    let mut stmt = conn.prepare("SELECT DISTINCT gametype, map FROM pending")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn do_recompute_ranks(conn: &Connection, gametype: &str, map: &str) -> Result<(), DbError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM ranks WHERE gametype = ?1 AND map = ?2
         ORDER BY elo DESC, lastseen DESC, name DESC",
    )?;
    let names: Vec<String> = stmt
        .query_map(params![gametype, map], |r| r.get(0))?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    for (i, name) in names.iter().enumerate() {
        let rank = (i + 1) as i32;
        conn.execute(
            "UPDATE ranks SET rank = ?1 WHERE name = ?2 AND gametype = ?3 AND map = ?4",
            params![rank, name, gametype, map],
        )?;
    }
    Ok(())
}

fn record_changes(conn: &Connection, now: i64) -> Result<(), DbError> {
    conn.execute(
        "INSERT INTO ranks_historic (name, gametype, map, elo, rank, ts)
         SELECT r.name, r.gametype, r.map, r.elo, r.rank, ?1
         FROM pending p JOIN ranks r
           ON r.name = p.name AND r.gametype = p.gametype AND r.map = p.map",
        params![now],
    )?;
    conn.execute("DELETE FROM pending", [])?;
    Ok(())
}

/// Flushes every staged `pending` row into `ranks`, recomputes rank
/// numbers per (gametype, map) bucket, and appends to the historic
/// table. Runs in its own transaction with indices dropped and
/// recreated around the bulk rewrite, matching the original's
/// `recompute_ranks`.
pub fn recompute_ranks(conn: &mut Connection, now: i64) -> Result<(), DbError> {
    let tx = conn.transaction()?;

    db::drop_all_indices(&tx)?;
    apply_pending_elo(&tx, now)?;
    for (gametype, map) in distinct_pending_buckets(&tx)? {
        do_recompute_ranks(&tx, &gametype, &map)?;
    }
    record_changes(&tx, now)?;
    db::create_all_indices(&tx)?;

    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use teerank_common::model::Client;

    fn server(gametype: &str, map: &str, lastseen: i64, clients: Vec<Client>) -> Server {
        let mut s = Server::new("1.2.3.4", 8303);
        s.gametype = gametype.to_string();
        s.map = map.to_string();
        s.lastseen = lastseen;
        s.clients = clients;
        s
    }

    fn four_players(old_scores: [i32; 4], new_scores: [i32; 4]) -> (Server, Server) {
        let names = ["a", "b", "c", "d"];
        let old_clients: Vec<Client> = names
            .iter()
            .zip(old_scores)
            .map(|(n, s)| Client::new(n, "", s, true))
            .collect();
        let new_clients: Vec<Client> = names
            .iter()
            .zip(new_scores)
            .map(|(n, s)| Client::new(n, "", s, true))
            .collect();
        (
            server("ctf", "ctf1", 1000, old_clients),
            server("ctf", "ctf1", 1300, new_clients),
        )
    }

    #[test]
    fn elo_probability_is_symmetric_around_half() {
        assert!((elo_probability(0.0) - 0.5).abs() < 1e-9);
        assert!(elo_probability(400.0) > 0.9);
        assert!(elo_probability(-400.0) < 0.1);
    }

    #[test]
    fn elo_probability_clamps_past_400() {
        assert_eq!(elo_probability(1000.0), elo_probability(400.0));
        assert_eq!(elo_probability(-1000.0), elo_probability(-400.0));
    }

    #[test]
    fn too_fast_is_not_rankable() {
        let (old, new) = four_players([0, 0, 0, 0], [1, 1, 1, 1]);
        let mut new = new;
        new.lastseen = old.lastseen + 30; // under MIN_ELAPSED_SECS
        let mut players = load_players_for_test(&old, &new);
        let count = mark_rankable_players(&old, &new, &mut players);
        assert_eq!(count, 0);
    }

    #[test]
    fn too_slow_is_not_rankable() {
        let (old, new) = four_players([0, 0, 0, 0], [5, 5, 5, 5]);
        let mut new = new;
        new.lastseen = old.lastseen + 5000;
        let mut players = load_players_for_test(&old, &new);
        assert_eq!(mark_rankable_players(&old, &new, &mut players), 0);
    }

    #[test]
    fn new_game_detected_by_score_drop() {
        let (old, new) = four_players([50, 50, 50, 50], [0, 0, 0, 0]);
        let mut players = load_players_for_test(&old, &new);
        assert_eq!(mark_rankable_players(&old, &new, &mut players), 0);
    }

    #[test]
    fn fresh_ranking_with_four_players() {
        let (old, new) = four_players([0, 1, 2, 3], [10, 9, 8, 7]);
        let mut players = load_players_for_test(&old, &new);
        assert_eq!(mark_rankable_players(&old, &new, &mut players), 4);
    }

    #[test]
    fn fewer_than_four_rankable_players_disqualifies_all() {
        let old = server(
            "ctf",
            "ctf1",
            1000,
            vec![Client::new("a", "", 0, true), Client::new("b", "", 0, true)],
        );
        let mut new = server(
            "ctf",
            "ctf1",
            1300,
            vec![Client::new("a", "", 5, true), Client::new("b", "", 5, true)],
        );
        new.lastseen = old.lastseen + 300;
        let mut players = load_players_for_test(&old, &new);
        assert_eq!(mark_rankable_players(&old, &new, &mut players), 0);
    }

    #[test]
    fn gametype_change_disqualifies_ranking() {
        let (old, mut new) = four_players([0, 1, 2, 3], [10, 9, 8, 7]);
        new.gametype = "DM".to_string();
        let mut players = load_players_for_test(&old, &new);
        assert_eq!(mark_rankable_players(&old, &new, &mut players), 0);
    }

    // Builds PlayerInfo directly, bypassing the database lookups that
    // `load_players` needs, since these tests only exercise the
    // rankability filter.
    fn load_players_for_test(old: &Server, new: &Server) -> Vec<PlayerInfo> {
        new.clients
            .iter()
            .map(|c| PlayerInfo {
                name: c.name.clone(),
                old_score: old.clients.iter().find(|o| o.name == c.name).map(|o| o.score),
                new_score: c.score,
                ingame: c.ingame,
                gametype_elo: DEFAULT_ELO,
                map_elo: DEFAULT_ELO,
                rankable: false,
            })
            .collect()
    }

    #[test]
    fn winner_gains_elo_loser_loses_it() {
        let mut winner = PlayerInfo {
            name: "winner".into(),
            old_score: Some(0),
            new_score: 10,
            ingame: true,
            gametype_elo: DEFAULT_ELO,
            map_elo: DEFAULT_ELO,
            rankable: true,
        };
        let loser = PlayerInfo {
            name: "loser".into(),
            old_score: Some(0),
            new_score: 1,
            ingame: true,
            gametype_elo: DEFAULT_ELO,
            map_elo: DEFAULT_ELO,
            rankable: true,
        };
        winner.rankable = true;
        let players = vec![winner, loser];
        let (winner_gt, _) = compute_new_elo(0, &players);
        let (loser_gt, _) = compute_new_elo(1, &players);
        assert!(winner_gt > DEFAULT_ELO);
        assert!(loser_gt < DEFAULT_ELO);
    }

    #[test]
    fn recompute_ranks_orders_by_elo_then_lastseen_then_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut conn = db::open(&dir.path().join("t.db")).unwrap();

        conn.execute(
            "INSERT INTO ranks (name, gametype, map, elo, rank, lastseen) VALUES
             ('alice', 'ctf', 'ctf1', 1600, NULL, 100),
             ('bob', 'ctf', 'ctf1', 1600, NULL, 200),
             ('carl', 'ctf', 'ctf1', 1500, NULL, 300)",
            [],
        )
        .unwrap();
        // Only alice is flushed this round, so her lastseen jumps to `now`
        // while bob's stays at its seeded value — the only way the elo
        // tie between alice and bob gets broken is by that lastseen gap.
        conn.execute(
            "INSERT INTO pending (name, gametype, map, elo) VALUES ('alice', 'ctf', 'ctf1', 1600)",
            [],
        )
        .unwrap();

        recompute_ranks(&mut conn, 1000).unwrap();

        let mut stmt = conn
            .prepare("SELECT name, rank FROM ranks ORDER BY rank")
            .unwrap();
        let rows: Vec<(String, i32)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        // alice ties bob on elo but was just flushed to lastseen=1000, so it sorts first.
        assert_eq!(rows, vec![("alice".to_string(), 1), ("bob".to_string(), 2), ("carl".to_string(), 3)]);

        let pending_count: i64 = conn.query_row("SELECT COUNT(*) FROM pending", [], |r| r.get(0)).unwrap();
        assert_eq!(pending_count, 0);

        let historic_count: i64 = conn
            .query_row("SELECT COUNT(*) FROM ranks_historic", [], |r| r.get(0))
            .unwrap();
        assert_eq!(historic_count, 1);
    }
}
