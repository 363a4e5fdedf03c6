//! SQLite-backed [`Store`].
//!
//! Every invariant the engine depends on lives in SQL so that several connections (or
//! processes) sharing one database file stay consistent:
//! - `rounds_single_open` admits at most one round whose status is not `finished`;
//! - `stakes_active_item` admits at most one active stake per item;
//! - stake insertion, settlement and reset run inside `BEGIN IMMEDIATE` transactions.

use anyhow::{anyhow, Context, Result};
use giftwheel_execution::{
    check_admission, AdmissionContext, AdmissionError, AdmissionLimits, BetLedger,
    OwnershipStore, RoundRepository, Settlement, StakeError, Store,
};
use giftwheel_types::{
    display_name, Gift, GiftId, Item, ItemId, Round, RoundId, RoundStatus, Stake, StakeEntry,
    StakeRequest, Transition, User, UserId,
};
use rusqlite::{
    params, types::Type, Connection, ErrorCode, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Catalog entries seeded on first start: name, description, value in nano-TON.
pub const DEMO_GIFTS: [(&str, &str, u64); 3] = [
    ("Latte", "A warming drink", 1_500_000_000),
    ("Celebration Cocktail", "For a special occasion", 5_000_000_000),
    ("Golden Ticket", "A rare collectible", 25_000_000_000),
];

const ROUND_COLUMNS: &str =
    "id, status, created_at_ms, started_at_ms, spinning_at_ms, finished_at_ms, winner_id, draw_value";

const ITEM_COLUMNS: &str = "i.id, i.gift_id, i.owner_id, i.staked, g.name, g.value";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("open database {}", path.display()))?;
        Self::from_connection(conn, busy_timeout)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        Self::from_connection(conn, Duration::from_secs(5))
    }

    fn from_connection(conn: Connection, busy_timeout: Duration) -> Result<Self> {
        conn.busy_timeout(busy_timeout)
            .context("set sqlite busy timeout")?;
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Insert catalog entries, skipping names that already exist. Returns how many were added.
    pub fn seed_gifts(&mut self, gifts: &[(&str, &str, u64)]) -> Result<usize> {
        let mut added = 0;
        for (name, description, value) in gifts {
            added += self
                .conn
                .execute(
                    "INSERT OR IGNORE INTO gifts (name, description, value, active) VALUES (?1, ?2, ?3, 1)",
                    params![name, description, value],
                )
                .context("seed gift")?;
        }
        Ok(added)
    }

    /// Active catalog entries, cheapest first.
    pub fn gifts(&self) -> Result<Vec<Gift>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, description, value, active FROM gifts WHERE active = 1 ORDER BY value ASC, id ASC",
        )?;
        let rows = stmt.query_map([], gift_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("list gifts")
    }

    pub fn gift(&self, gift_id: GiftId) -> Result<Option<Gift>> {
        self.conn
            .query_row(
                "SELECT id, name, description, value, active FROM gifts WHERE id = ?1",
                params![gift_id],
                gift_from_row,
            )
            .optional()
            .context("load gift")
    }

    /// Find or create a user. A non-empty username replaces the stored one.
    pub fn sync_user(&mut self, user_id: UserId, username: Option<&str>, now_ms: u64) -> Result<User> {
        let username = username.map(str::trim).filter(|name| !name.is_empty());
        self.conn
            .execute(
                "INSERT INTO users (id, username, created_at_ms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET username = COALESCE(excluded.username, users.username)",
                params![user_id, username, now_ms],
            )
            .context("sync user")?;
        self.conn
            .query_row(
                "SELECT id, username, created_at_ms FROM users WHERE id = ?1",
                params![user_id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        created_at_ms: row.get(2)?,
                    })
                },
            )
            .context("load user")
    }

    /// Create a new item of `gift_id` owned by `owner_id`.
    pub fn grant_item(&mut self, owner_id: UserId, gift_id: GiftId, now_ms: u64) -> Result<Item> {
        self.conn
            .execute(
                "INSERT INTO items (gift_id, owner_id, staked, created_at_ms) VALUES (?1, ?2, 0, ?3)",
                params![gift_id, owner_id, now_ms],
            )
            .context("grant item")?;
        let item_id = self.conn.last_insert_rowid() as ItemId;
        self.item(item_id)?
            .ok_or_else(|| anyhow!("granted item {item_id} missing"))
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA foreign_keys=ON;
         CREATE TABLE IF NOT EXISTS users (
             id INTEGER PRIMARY KEY,
             username TEXT,
             created_at_ms INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS gifts (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             name TEXT NOT NULL UNIQUE,
             description TEXT,
             value INTEGER NOT NULL,
             active INTEGER NOT NULL DEFAULT 1
         );
         CREATE TABLE IF NOT EXISTS items (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             gift_id INTEGER NOT NULL REFERENCES gifts(id),
             owner_id INTEGER NOT NULL,
             staked INTEGER NOT NULL DEFAULT 0,
             created_at_ms INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS items_owner ON items(owner_id);
         CREATE TABLE IF NOT EXISTS rounds (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             status TEXT NOT NULL,
             created_at_ms INTEGER NOT NULL,
             started_at_ms INTEGER,
             spinning_at_ms INTEGER,
             finished_at_ms INTEGER,
             winner_id INTEGER,
             draw_value REAL
         );
         CREATE UNIQUE INDEX IF NOT EXISTS rounds_single_open
             ON rounds((status <> 'finished')) WHERE status <> 'finished';
         CREATE TABLE IF NOT EXISTS stakes (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             round_id INTEGER NOT NULL REFERENCES rounds(id),
             item_id INTEGER NOT NULL REFERENCES items(id),
             user_id INTEGER NOT NULL,
             placed_at_ms INTEGER NOT NULL,
             active INTEGER NOT NULL DEFAULT 1
         );
         CREATE UNIQUE INDEX IF NOT EXISTS stakes_active_item ON stakes(item_id) WHERE active = 1;
         CREATE INDEX IF NOT EXISTS stakes_round ON stakes(round_id);",
    )
    .context("init giftwheel schema")?;
    Ok(())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::ConstraintViolation
    )
}

fn round_from_row(row: &Row<'_>) -> rusqlite::Result<Round> {
    let status: String = row.get(1)?;
    let status = status
        .parse::<RoundStatus>()
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(err)))?;
    Ok(Round {
        id: row.get(0)?,
        status,
        created_at_ms: row.get(2)?,
        started_at_ms: row.get(3)?,
        spinning_at_ms: row.get(4)?,
        finished_at_ms: row.get(5)?,
        winner_id: row.get(6)?,
        draw_value: row.get(7)?,
    })
}

fn item_from_row(row: &Row<'_>) -> rusqlite::Result<Item> {
    Ok(Item {
        id: row.get(0)?,
        gift_id: row.get(1)?,
        owner_id: row.get(2)?,
        staked: row.get(3)?,
        name: row.get(4)?,
        value: row.get(5)?,
    })
}

fn gift_from_row(row: &Row<'_>) -> rusqlite::Result<Gift> {
    Ok(Gift {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        value: row.get(3)?,
        active: row.get(4)?,
    })
}

fn query_open_round(conn: &Connection) -> Result<Option<Round>> {
    conn.query_row(
        &format!(
            "SELECT {ROUND_COLUMNS} FROM rounds WHERE status <> 'finished' ORDER BY id DESC LIMIT 1"
        ),
        [],
        round_from_row,
    )
    .optional()
    .context("load open round")
}

fn begin_immediate(conn: &mut Connection) -> Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .context("begin immediate transaction")
}

impl RoundRepository for SqliteStore {
    fn open_round(&mut self, now_ms: u64) -> Result<Round> {
        let tx = begin_immediate(&mut self.conn)?;
        if let Some(round) = query_open_round(&tx)? {
            tx.commit().context("commit open round")?;
            return Ok(round);
        }
        match tx.execute(
            "INSERT INTO rounds (status, created_at_ms) VALUES (?1, ?2)",
            params![RoundStatus::Waiting.as_str(), now_ms],
        ) {
            Ok(_) => {}
            Err(err) if is_constraint_violation(&err) => {
                // Another connection opened a round first.
                let round = query_open_round(&tx)?
                    .ok_or_else(|| anyhow!("open round vanished after conflict"))?;
                tx.commit().context("commit open round")?;
                return Ok(round);
            }
            Err(err) => return Err(err).context("insert round"),
        }
        let round_id = tx.last_insert_rowid() as RoundId;
        tx.commit().context("commit new round")?;
        debug!(round_id, "round opened");
        Ok(Round::new(round_id, now_ms))
    }

    fn round(&self, round_id: RoundId) -> Result<Option<Round>> {
        self.conn
            .query_row(
                &format!("SELECT {ROUND_COLUMNS} FROM rounds WHERE id = ?1"),
                params![round_id],
                round_from_row,
            )
            .optional()
            .context("load round")
    }

    fn latest_round(&self) -> Result<Option<Round>> {
        self.conn
            .query_row(
                &format!("SELECT {ROUND_COLUMNS} FROM rounds ORDER BY id DESC LIMIT 1"),
                [],
                round_from_row,
            )
            .optional()
            .context("load latest round")
    }

    fn transition_status(
        &mut self,
        round_id: RoundId,
        from: RoundStatus,
        to: RoundStatus,
        transition: Transition,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE rounds
                 SET status = ?1,
                     started_at_ms = COALESCE(?2, started_at_ms),
                     spinning_at_ms = COALESCE(?3, spinning_at_ms)
                 WHERE id = ?4 AND status = ?5
                   AND (?6 IS NULL
                        OR (SELECT COUNT(DISTINCT user_id) FROM stakes WHERE round_id = ?4) >= ?6)",
                params![
                    to.as_str(),
                    transition.started_at_ms,
                    transition.spinning_at_ms,
                    round_id,
                    from.as_str(),
                    transition.min_participants.map(|min| min as i64)
                ],
            )
            .context("transition round status")?;
        Ok(changed == 1)
    }
}

impl BetLedger for SqliteStore {
    fn insert_stake(
        &mut self,
        request: &StakeRequest,
        limits: &AdmissionLimits,
    ) -> Result<Stake, StakeError> {
        let tx = begin_immediate(&mut self.conn)?;

        let round_status = tx
            .query_row(
                "SELECT status FROM rounds WHERE id = ?1",
                params![request.round_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("load round status")?
            .map(|status| status.parse::<RoundStatus>())
            .transpose()
            .context("parse round status")?;
        let item = tx
            .query_row(
                "SELECT owner_id, staked FROM items WHERE id = ?1",
                params![request.item_id],
                |row| Ok((row.get::<_, UserId>(0)?, row.get::<_, bool>(1)?)),
            )
            .optional()
            .context("load item")?;
        let has_active_stake: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM stakes WHERE item_id = ?1 AND active = 1)",
                params![request.item_id],
                |row| row.get(0),
            )
            .context("check active stake")?;
        let participants = {
            let mut stmt = tx
                .prepare(
                    "SELECT user_id FROM stakes WHERE round_id = ?1 GROUP BY user_id ORDER BY MIN(id)",
                )
                .context("prepare participants")?;
            let rows = stmt
                .query_map(params![request.round_id], |row| row.get::<_, UserId>(0))
                .context("query participants")?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("load participants")?
        };

        let ctx = AdmissionContext {
            request,
            round_status,
            item_owner: item.map(|(owner, _)| owner),
            item_staked: item.is_some_and(|(_, staked)| staked) || has_active_stake,
            participants: &participants,
        };
        check_admission(&ctx, limits)?;

        match tx.execute(
            "INSERT INTO stakes (round_id, item_id, user_id, placed_at_ms, active) VALUES (?1, ?2, ?3, ?4, 1)",
            params![
                request.round_id,
                request.item_id,
                request.user_id,
                request.placed_at_ms
            ],
        ) {
            Ok(_) => {}
            Err(err) if is_constraint_violation(&err) => {
                return Err(AdmissionError::DuplicateStake {
                    item_id: request.item_id,
                }
                .into())
            }
            Err(err) => return Err(anyhow::Error::from(err).context("insert stake").into()),
        }
        let stake_id = tx.last_insert_rowid() as u64;
        tx.execute(
            "UPDATE items SET staked = 1 WHERE id = ?1",
            params![request.item_id],
        )
        .context("mark item staked")?;
        tx.commit().context("commit stake")?;

        Ok(Stake {
            id: stake_id,
            round_id: request.round_id,
            item_id: request.item_id,
            user_id: request.user_id,
            placed_at_ms: request.placed_at_ms,
            active: true,
        })
    }

    fn round_stakes(&self, round_id: RoundId) -> Result<Vec<StakeEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.round_id, s.item_id, s.user_id, s.placed_at_ms, s.active,
                    g.name, g.value, u.username
             FROM stakes s
             JOIN items i ON i.id = s.item_id
             JOIN gifts g ON g.id = i.gift_id
             LEFT JOIN users u ON u.id = s.user_id
             WHERE s.round_id = ?1
             ORDER BY s.id ASC",
        )?;
        let rows = stmt.query_map(params![round_id], |row| {
            let user_id: UserId = row.get(3)?;
            let username: Option<String> = row.get(8)?;
            Ok(StakeEntry {
                stake: Stake {
                    id: row.get(0)?,
                    round_id: row.get(1)?,
                    item_id: row.get(2)?,
                    user_id,
                    placed_at_ms: row.get(4)?,
                    active: row.get(5)?,
                },
                gift_name: row.get(6)?,
                value: row.get(7)?,
                display_name: display_name(user_id, username.as_deref()),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("load round stakes")
    }

    fn participant_count(&self, round_id: RoundId) -> Result<usize> {
        self.conn
            .query_row(
                "SELECT COUNT(DISTINCT user_id) FROM stakes WHERE round_id = ?1",
                params![round_id],
                |row| row.get(0),
            )
            .context("count participants")
    }
}

impl OwnershipStore for SqliteStore {
    fn item(&self, item_id: ItemId) -> Result<Option<Item>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {ITEM_COLUMNS} FROM items i JOIN gifts g ON g.id = i.gift_id WHERE i.id = ?1"
                ),
                params![item_id],
                item_from_row,
            )
            .optional()
            .context("load item")
    }

    fn inventory(&self, user_id: UserId) -> Result<Vec<Item>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM items i JOIN gifts g ON g.id = i.gift_id
             WHERE i.owner_id = ?1 AND i.staked = 0
             ORDER BY i.id ASC"
        ))?;
        let rows = stmt.query_map(params![user_id], item_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("load inventory")
    }
}

impl Store for SqliteStore {
    fn settle_round(&mut self, settlement: &Settlement) -> Result<Option<usize>> {
        let tx = begin_immediate(&mut self.conn)?;
        let finished = tx
            .execute(
                "UPDATE rounds
                 SET status = 'finished', winner_id = ?1, draw_value = ?2, finished_at_ms = ?3
                 WHERE id = ?4 AND status = 'spinning'",
                params![
                    settlement.winner_id,
                    settlement.draw_value,
                    settlement.finished_at_ms,
                    settlement.round_id
                ],
            )
            .context("finish round")?;
        if finished == 0 {
            // Dropping the transaction rolls it back.
            return Ok(None);
        }
        let moved = tx
            .execute(
                "UPDATE items SET owner_id = ?1, staked = 0
                 WHERE id IN (SELECT item_id FROM stakes WHERE round_id = ?2 AND active = 1)",
                params![settlement.winner_id, settlement.round_id],
            )
            .context("transfer items")?;
        tx.execute(
            "UPDATE stakes SET active = 0 WHERE round_id = ?1 AND active = 1",
            params![settlement.round_id],
        )
        .context("close stakes")?;
        tx.commit().context("commit settlement")?;
        Ok(Some(moved))
    }

    fn reset_round(&mut self, round_id: RoundId) -> Result<Option<usize>> {
        let tx = begin_immediate(&mut self.conn)?;
        let reset = tx
            .execute(
                "UPDATE rounds
                 SET status = 'waiting', started_at_ms = NULL, spinning_at_ms = NULL
                 WHERE id = ?1 AND status <> 'finished'",
                params![round_id],
            )
            .context("reset round")?;
        if reset == 0 {
            return Ok(None);
        }
        tx.execute(
            "UPDATE items SET staked = 0
             WHERE id IN (SELECT item_id FROM stakes WHERE round_id = ?1 AND active = 1)",
            params![round_id],
        )
        .context("release items")?;
        let removed = tx
            .execute("DELETE FROM stakes WHERE round_id = ?1", params![round_id])
            .context("delete stakes")?;
        tx.commit().context("commit reset")?;
        Ok(Some(removed))
    }
}
