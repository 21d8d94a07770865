//! Replays a CSV file of lifecycle commands against an in-memory pool and
//! reports where every account ended up.

use std::error::Error;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use csv_async::{AsyncReaderBuilder, Error as CsvError, Trim};
use tokio::fs::File;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::csv_utils::write_csv;
use crate::dto::{AccountRow, Command};
use crate::events::LoggingEventer;
use crate::stores::{table_schemas, AccountStatus, Store};
use crate::table::MemoryTables;
use crate::Engine;

const BUFFER_SIZE: usize = 1024;

type Result<T, E = Box<dyn Error + Send + Sync>> = std::result::Result<T, E>;

/// Runs every command of the input file and writes the final pool to
/// `writer` as `account,status` rows sorted by account id.
///
/// Spawns two tasks:
/// * CSV reader - streams commands from the input file and sends them to the
///   processor via channel.
/// * Processor - applies commands in file order until the channel is closed.
///
/// # Errors
/// Returns an error if:
/// * The input file cannot be read
/// * The CSV is malformed
/// * Writing to the output fails
///
/// Commands the pool rejects are logged and skipped.
pub async fn run<P, W>(input_path: P, writer: W, config: StoreConfig) -> Result<()>
where
    P: AsRef<Path>,
    W: Write,
{
    let (tx, rx) = mpsc::channel(BUFFER_SIZE);
    let input_path = input_path.as_ref().to_owned();

    let tables = Arc::new(MemoryTables::new(table_schemas(&config)));
    let store = Store::new(tables, config.clone());
    let engine = Engine::new(store.clone(), LoggingEventer, config);

    let reader_handle = tokio::spawn(read_commands(input_path, tx));
    let processor_handle = tokio::spawn(process_commands(engine, rx));

    // The reader drops its sender on exit, so the processor always finishes.
    let read = reader_handle.await;
    let processed = processor_handle.await?;
    read??;
    debug!(processed, "all commands processed");

    let mut rows = Vec::new();
    for status in AccountStatus::ALL {
        let accounts = store.find_accounts_by_status(status).await?;
        rows.extend(accounts.into_iter().map(AccountRow::from));
    }
    rows.sort_by(|a, b| a.account.cmp(&b.account));

    write_csv(writer, rows.into_iter())?;
    Ok(())
}

/// Reads and deserializes commands from a CSV file into the channel.
async fn read_commands(
    input_path: impl AsRef<Path> + Send,
    tx: mpsc::Sender<Command>,
) -> Result<(), CsvError> {
    let file = File::open(input_path).await?;
    let mut csv_reader = AsyncReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .create_deserializer(file);

    let mut records = csv_reader.deserialize::<Command>();
    while let Some(result) = records.next().await {
        let command = result?;
        if tx.send(command).await.is_err() {
            // processor is gone
            break;
        }
    }
    Ok(())
}

/// Applies commands until the reader closes the channel. Returns how many
/// were received.
async fn process_commands(
    engine: Engine<Store, LoggingEventer>,
    mut rx: mpsc::Receiver<Command>,
) -> usize {
    let mut processed = 0;
    while let Some(command) = rx.recv().await {
        processed += 1;
        let (cmd_type, account) = (command.cmd_type, command.account.clone());
        if let Err(e) = engine.process(command).await {
            warn!(%cmd_type, account = %account, error = %e, "command skipped");
        }
    }
    processed
}
