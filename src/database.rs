use std::pin::Pin;
use std::time::Duration;

use bb8::Pool;
use bb8_postgres::PostgresConnectionManager;
use bytes::Bytes;
use futures::SinkExt;
use tokio_postgres::{CopyInSink, NoTls};
use tracing::debug;

use crate::encoder::{self, CopyRow};
use crate::error::{is_block_conflict, Error, Result};
use crate::models::{Block, Input, Output, Transaction};

pub type PgPool = Pool<PostgresConnectionManager<NoTls>>;

/// Durable storage for loaded blocks.
pub trait BlockStore {
    /// Highest committed height, read fresh from the store on every call.
    async fn highest_loaded_height(&self) -> Result<Option<u64>>;

    /// Persists the block and its whole entity graph, or nothing at all.
    async fn load_block(&self, block: &Block) -> Result<()>;
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS blocks (
        blockhash CHAR(64) NOT NULL,
        height BIGINT NOT NULL,
        version INT NOT NULL,
        version_hex TEXT NOT NULL,
        merkle_root CHAR(64) NOT NULL,
        time TIMESTAMPTZ NOT NULL,
        median_time TIMESTAMPTZ NOT NULL,
        nonce BIGINT NOT NULL,
        bits TEXT NOT NULL,
        difficulty NUMERIC NOT NULL,
        chainwork TEXT NOT NULL,
        ntx INT NOT NULL,
        previous_block_hash CHAR(64),
        next_block_hash CHAR(64),
        stripped_size INT NOT NULL,
        size INT NOT NULL,
        weight INT NOT NULL,
        CONSTRAINT blocks_pkey PRIMARY KEY (blockhash),
        CONSTRAINT blocks_height_key UNIQUE (height)
    );

    CREATE TABLE IF NOT EXISTS transactions (
        txid CHAR(64) PRIMARY KEY,
        hash CHAR(64) NOT NULL,
        segwit BOOLEAN NOT NULL,
        replace_by_fee BOOLEAN NOT NULL,
        version INT NOT NULL,
        size INT NOT NULL,
        vsize INT NOT NULL,
        weight INT NOT NULL,
        locktime BIGINT NOT NULL,
        fee NUMERIC,
        hex TEXT NOT NULL,
        blockhash CHAR(64) NOT NULL REFERENCES blocks(blockhash),
        blockheight BIGINT NOT NULL,
        time TIMESTAMPTZ NOT NULL
    );

    CREATE TABLE IF NOT EXISTS vins (
        txid CHAR(64) NOT NULL REFERENCES transactions(txid),
        n INT NOT NULL,
        prev_txid CHAR(64),
        prev_vout BIGINT,
        coinbase TEXT,
        scriptsig_asm TEXT,
        scriptsig_hex TEXT,
        witness TEXT[] NOT NULL,
        prev_height BIGINT,
        value NUMERIC,
        script_pubkey_asm TEXT,
        script_pubkey_desc TEXT,
        script_pubkey_hex TEXT,
        script_pubkey_address TEXT,
        script_pubkey_type TEXT,
        sequence BIGINT NOT NULL,
        PRIMARY KEY (txid, n)
    );

    CREATE TABLE IF NOT EXISTS vouts (
        txid CHAR(64) NOT NULL REFERENCES transactions(txid),
        n INT NOT NULL,
        value NUMERIC NOT NULL,
        script_pubkey_asm TEXT NOT NULL,
        script_pubkey_desc TEXT,
        script_pubkey_hex TEXT NOT NULL,
        script_pubkey_address TEXT,
        script_pubkey_type TEXT NOT NULL,
        PRIMARY KEY (txid, n)
    );

    CREATE INDEX IF NOT EXISTS transactions_blockheight_idx ON transactions (blockheight);
    CREATE INDEX IF NOT EXISTS vins_prev_idx ON vins (prev_txid, prev_vout);
    CREATE INDEX IF NOT EXISTS vouts_address_idx ON vouts (script_pubkey_address);
";

/// Coinbase transactions whose txid repeats an earlier coinbase (BIP30). Only the first
/// occurrence fits under the `transactions` primary key.
const BIP30_DUPLICATES: [(u64, &str); 2] = [
    (
        91842,
        "d5d27987d2a3dfc724e359870c6644b40e497bdc0589a033220fe15429d88599",
    ),
    (
        91880,
        "e3bf3d07d4b0375638d5f1db5255fe07ba2c4cb067cd81b84ee974b6585fb468",
    ),
];

fn is_bip30_duplicate(height: u64, txid: &str) -> bool {
    BIP30_DUPLICATES
        .iter()
        .any(|(dup_height, dup_txid)| *dup_height == height && *dup_txid == txid)
}

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PgStore {
    pub async fn connect(
        config: tokio_postgres::Config,
        pool_size: u32,
        statement_timeout: Duration,
    ) -> Result<Self> {
        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(statement_timeout)
            .build(manager)
            .await?;
        Ok(Self {
            pool,
            statement_timeout,
        })
    }

    pub async fn setup_database(&self) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.batch_execute(SCHEMA).await?;
        Ok(())
    }

    async fn insert_block(&self, block: &Block) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let transaction = conn.transaction().await?;

        transaction
            .batch_execute(&format!(
                "SET LOCAL statement_timeout = {}",
                self.statement_timeout.as_millis()
            ))
            .await?;

        let transactions: Vec<&Transaction> = block
            .transactions
            .iter()
            .filter(|tx| !is_bip30_duplicate(block.height, &tx.txid))
            .collect();
        let inputs = transactions.iter().flat_map(|tx| tx.inputs.iter());
        let outputs = transactions.iter().flat_map(|tx| tx.outputs.iter());

        let blocks = copy_rows(&transaction, std::iter::once(block))
            .await
            .map_err(|e| conflict_or(e, block.height))?;
        let txs = copy_rows(&transaction, transactions.iter().copied()).await?;
        let vins = copy_rows::<Input>(&transaction, inputs).await?;
        let vouts = copy_rows::<Output>(&transaction, outputs).await?;

        transaction.commit().await?;

        debug!(
            height = block.height,
            blocks, txs, vins, vouts, "block committed"
        );
        Ok(())
    }
}

impl BlockStore for PgStore {
    async fn highest_loaded_height(&self) -> Result<Option<u64>> {
        let conn = self.pool.get().await?;
        let row = conn.query_one("SELECT MAX(height) FROM blocks", &[]).await?;
        let height: Option<i64> = row.get(0);
        height
            .map(|h| {
                u64::try_from(h)
                    .map_err(|_| Error::integrity(format!("stored height {h} is negative")))
            })
            .transpose()
    }

    async fn load_block(&self, block: &Block) -> Result<()> {
        self.insert_block(block)
            .await
            .map_err(|e| Error::load(block.height, e))
    }
}

fn conflict_or(e: tokio_postgres::Error, height: u64) -> Error {
    if is_block_conflict(&e) {
        Error::Conflict(height)
    } else {
        e.into()
    }
}

/// Streams one relation's rows through a single `COPY`.
async fn copy_rows<'a, T: CopyRow + 'a>(
    transaction: &tokio_postgres::Transaction<'_>,
    rows: impl IntoIterator<Item = &'a T>,
) -> std::result::Result<u64, tokio_postgres::Error> {
    let payload = encoder::encode_rows(rows);
    if payload.is_empty() {
        return Ok(0);
    }

    let statement = encoder::copy_statement::<T>();
    let mut sink: Pin<Box<CopyInSink<Bytes>>> =
        Box::pin(transaction.copy_in(statement.as_str()).await?);
    sink.as_mut().send(Bytes::from(payload)).await?;
    sink.as_mut().finish().await
}

/// These run only against a live PostgreSQL named by `TEST_DATABASE_URL`; each test gets
/// its own schema.
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::block_processor::transform;
    use crate::fixtures;

    static SCHEMA_SEQ: AtomicU32 = AtomicU32::new(0);

    async fn test_store() -> Option<(PgStore, tokio_postgres::Client, String)> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let schema = format!(
            "indexer_test_{}_{}",
            std::process::id(),
            SCHEMA_SEQ.fetch_add(1, Ordering::Relaxed)
        );

        let (client, connection) = tokio_postgres::connect(&url, NoTls).await.unwrap();
        tokio::spawn(connection);
        client
            .batch_execute(&format!("CREATE SCHEMA {schema}; SET search_path TO {schema}"))
            .await
            .unwrap();

        let mut config: tokio_postgres::Config = url.parse().unwrap();
        config.options(&format!("-c search_path={schema}"));
        let store = PgStore::connect(config, 2, Duration::from_secs(30))
            .await
            .unwrap();
        store.setup_database().await.unwrap();
        Some((store, client, schema))
    }

    async fn drop_schema(client: &tokio_postgres::Client, schema: &str) {
        client
            .batch_execute(&format!("DROP SCHEMA {schema} CASCADE"))
            .await
            .unwrap();
    }

    async fn count(client: &tokio_postgres::Client, sql: &str) -> i64 {
        client.query_one(sql, &[]).await.unwrap().get(0)
    }

    async fn rows_for_height(client: &tokio_postgres::Client, height: i64) -> [i64; 4] {
        let blocks = client
            .query_one("SELECT COUNT(*) FROM blocks WHERE height = $1", &[&height])
            .await
            .unwrap()
            .get(0);
        let txs = client
            .query_one("SELECT COUNT(*) FROM transactions WHERE blockheight = $1", &[&height])
            .await
            .unwrap()
            .get(0);
        let vins = client
            .query_one(
                "SELECT COUNT(*) FROM vins v JOIN transactions t USING (txid) WHERE t.blockheight = $1",
                &[&height],
            )
            .await
            .unwrap()
            .get(0);
        let vouts = client
            .query_one(
                "SELECT COUNT(*) FROM vouts v JOIN transactions t USING (txid) WHERE t.blockheight = $1",
                &[&height],
            )
            .await
            .unwrap()
            .get(0);
        [blocks, txs, vins, vouts]
    }

    #[tokio::test]
    async fn test_load_and_checkpoint() {
        let Some((store, client, schema)) = test_store().await else {
            return;
        };

        assert_eq!(store.highest_loaded_height().await.unwrap(), None);

        for height in 1..=3 {
            let block = transform(fixtures::raw_block(height)).unwrap();
            store.load_block(&block).await.unwrap();
            assert_eq!(store.highest_loaded_height().await.unwrap(), Some(height));
        }
        assert_eq!(rows_for_height(&client, 2).await, [1, 2, 2, 3]);

        let heights: Vec<i64> = client
            .query("SELECT height FROM blocks ORDER BY height", &[])
            .await
            .unwrap()
            .iter()
            .map(|row| row.get(0))
            .collect();
        assert_eq!(heights, vec![1, 2, 3]);

        drop_schema(&client, &schema).await;
    }

    #[tokio::test]
    async fn test_decimal_and_null_fidelity() {
        let Some((store, client, schema)) = test_store().await else {
            return;
        };

        let block = transform(fixtures::raw_block(1)).unwrap();
        store.load_block(&block).await.unwrap();
        let coinbase_txid = fixtures::coinbase_txid(1);
        let spend_txid = fixtures::spend_txid(1);

        let row = client
            .query_one("SELECT fee::text FROM transactions WHERE txid = $1", &[&spend_txid])
            .await
            .unwrap();
        assert_eq!(row.get::<_, Option<String>>(0).as_deref(), Some("0.00001234"));

        let row = client
            .query_one("SELECT fee::text FROM transactions WHERE txid = $1", &[&coinbase_txid])
            .await
            .unwrap();
        assert_eq!(row.get::<_, Option<String>>(0), None);

        let row = client
            .query_one(
                "SELECT prev_txid, prev_vout, value::text, script_pubkey_hex, coinbase, witness
                 FROM vins WHERE txid = $1",
                &[&coinbase_txid],
            )
            .await
            .unwrap();
        assert_eq!(row.get::<_, Option<String>>(0), None);
        assert_eq!(row.get::<_, Option<i64>>(1), None);
        assert_eq!(row.get::<_, Option<String>>(2), None);
        assert_eq!(row.get::<_, Option<String>>(3), None);
        assert_eq!(row.get::<_, Option<String>>(4).as_deref(), Some("04ffff001d0104"));
        assert_eq!(row.get::<_, Vec<String>>(5), Vec::<String>::new());

        let row = client
            .query_one(
                "SELECT coinbase, prev_txid, value::text FROM vins WHERE txid = $1",
                &[&spend_txid],
            )
            .await
            .unwrap();
        assert_eq!(row.get::<_, Option<String>>(0), None);
        assert_eq!(row.get::<_, Option<String>>(1), Some(fixtures::hash(0xaa)));
        assert_eq!(row.get::<_, Option<String>>(2).as_deref(), Some("50.00000000"));

        let values: Vec<(i32, String, Option<String>)> = client
            .query(
                "SELECT n, value::text, script_pubkey_address FROM vouts WHERE txid = $1 ORDER BY n",
                &[&spend_txid],
            )
            .await
            .unwrap()
            .iter()
            .map(|row| (row.get(0), row.get(1), row.get(2)))
            .collect();
        assert_eq!(
            values,
            vec![
                (0, "49.99998766".to_string(), Some("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".to_string())),
                (1, "0.00000000".to_string(), None),
            ]
        );

        drop_schema(&client, &schema).await;
    }

    #[tokio::test]
    async fn test_witness_order_survives() {
        let Some((store, client, schema)) = test_store().await else {
            return;
        };

        let mut block = transform(fixtures::raw_block(1)).unwrap();
        block.transactions[1].inputs[0].witness =
            vec!["3044".into(), "".into(), "02\"aa".into()];
        store.load_block(&block).await.unwrap();

        let row = client
            .query_one("SELECT witness FROM vins WHERE txid = $1", &[&fixtures::spend_txid(1)])
            .await
            .unwrap();
        assert_eq!(
            row.get::<_, Vec<String>>(0),
            vec!["3044".to_string(), "".to_string(), "02\"aa".to_string()]
        );

        drop_schema(&client, &schema).await;
    }

    #[tokio::test]
    async fn test_failed_output_write_leaves_nothing() {
        let Some((store, client, schema)) = test_store().await else {
            return;
        };

        store
            .load_block(&transform(fixtures::raw_block(1)).unwrap())
            .await
            .unwrap();

        // Two outputs with the same index violate the vouts primary key.
        let mut block = transform(fixtures::raw_block(2)).unwrap();
        block.transactions[1].outputs[1].output_index = 0;
        let err = store.load_block(&block).await.unwrap_err();
        assert!(matches!(err, Error::Load { height: 2, .. }), "{err:?}");

        assert_eq!(rows_for_height(&client, 2).await, [0, 0, 0, 0]);
        assert_eq!(store.highest_loaded_height().await.unwrap(), Some(1));
        assert_eq!(count(&client, "SELECT COUNT(*) FROM blocks").await, 1);

        drop_schema(&client, &schema).await;
    }

    #[tokio::test]
    async fn test_reloading_a_height_is_a_conflict() {
        let Some((store, client, schema)) = test_store().await else {
            return;
        };

        let block = transform(fixtures::raw_block(1)).unwrap();
        store.load_block(&block).await.unwrap();
        let err = store.load_block(&block).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(1)), "{err:?}");
        assert_eq!(rows_for_height(&client, 1).await, [1, 2, 2, 3]);

        drop_schema(&client, &schema).await;
    }

    #[test]
    fn test_bip30_duplicates() {
        assert!(is_bip30_duplicate(
            91842,
            "d5d27987d2a3dfc724e359870c6644b40e497bdc0589a033220fe15429d88599"
        ));
        assert!(!is_bip30_duplicate(
            91812,
            "d5d27987d2a3dfc724e359870c6644b40e497bdc0589a033220fe15429d88599"
        ));
    }
}
