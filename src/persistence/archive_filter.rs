//! Bloom filter over a sparse `SQLite` bitmap.
//!
//! Each set bit is one row of `archive_filter_bit`. Adding an item writes
//! its `k` bit positions with `INSERT OR IGNORE`, so repeated adds are
//! no-ops and concurrent adds never race on a read-modify-write. An item
//! is a member only when all of its bits are present: false positives are
//! bounded by the configured rate, false negatives cannot happen.

use sha2::{Digest, Sha256};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

use crate::Result;

/// Parameters and naming of one persisted Bloom filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFilter {
    name: String,
    bits: u64,
    hashes: u32,
}

impl ArchiveFilter {
    /// Size a filter for `capacity` items at `error_rate` false positives.
    ///
    /// Uses the standard optimum `m = -n ln p / (ln 2)^2` and
    /// `k = (m / n) ln 2`, each clamped to at least one.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn with_rate(name: impl Into<String>, capacity: u64, error_rate: f64) -> Self {
        let n = capacity.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let m = (-(n * error_rate.ln()) / (ln2 * ln2)).ceil().max(1.0);
        let k = ((m / n) * ln2).round().max(1.0);
        Self {
            name: name.into(),
            bits: m as u64,
            hashes: k as u32,
        }
    }

    /// Filter name, the partition key in `archive_filter_bit`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size of the bit array.
    #[must_use]
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Number of hash functions.
    #[must_use]
    pub fn hashes(&self) -> u32 {
        self.hashes
    }

    /// Distinct bit positions for `item`, derived by double hashing the
    /// two leading 64-bit words of its SHA-256 digest.
    #[must_use]
    pub fn positions(&self, item: &str) -> Vec<i64> {
        let digest = Sha256::digest(item.as_bytes());
        let mut first = [0u8; 8];
        let mut second = [0u8; 8];
        first.copy_from_slice(&digest[0..8]);
        second.copy_from_slice(&digest[8..16]);
        let h1 = u64::from_le_bytes(first);
        // Odd step keeps the index sequence from collapsing onto one bit.
        let h2 = u64::from_le_bytes(second) | 1;

        let mut positions: Vec<i64> = (0..u64::from(self.hashes))
            .map(|i| h1.wrapping_add(i.wrapping_mul(h2)) % self.bits)
            .filter_map(|bit| i64::try_from(bit).ok())
            .collect();
        positions.sort_unstable();
        positions.dedup();
        positions
    }

    /// Set the bits of `item` on the given connection (usually a
    /// transaction). Idempotent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn add(&self, conn: &mut SqliteConnection, item: &str) -> Result<()> {
        let positions = self.positions(item);
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("INSERT OR IGNORE INTO archive_filter_bit (filter, bit) ");
        query.push_values(positions, |mut row, bit| {
            row.push_bind(&self.name).push_bind(bit);
        });
        query.build().execute(conn).await?;
        Ok(())
    }

    /// Test `item` for membership.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn contains(&self, pool: &SqlitePool, item: &str) -> Result<bool> {
        let positions = self.positions(item);
        let expected = i64::try_from(positions.len()).unwrap_or(i64::MAX);

        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM archive_filter_bit WHERE filter = ");
        query.push_bind(&self.name);
        query.push(" AND bit IN (");
        let mut separated = query.separated(", ");
        for bit in positions {
            separated.push_bind(bit);
        }
        separated.push_unseparated(")");

        let (found,): (i64,) = query.build_query_as().fetch_one(pool).await?;
        Ok(found == expected)
    }
}
