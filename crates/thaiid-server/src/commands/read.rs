use std::time::Duration;

use anyhow::Context;
use thaiid_card::{CardPresence, CardReader, CardSession, ReaderService, ThaiIdCard};
use tracing::info;

use crate::config::ReadArgs;

const INSERT_POLL: Duration = Duration::from_secs(1);

/// Wait for a card in the first reader, read it once and print the record
pub fn cmd_read(args: &ReadArgs) -> anyhow::Result<()> {
    let mut reader = CardReader::new().context("Failed to establish PC/SC context")?;

    let name = reader
        .list_readers()
        .context("Failed to list readers")?
        .into_iter()
        .next()
        .context("No card reader attached")?;

    info!(reader = %name, "Waiting for card");
    while !reader.wait_for(&name, CardPresence::Present, INSERT_POLL)? {}

    let mut session = reader.connect(&name).context("Failed to connect to card")?;
    let options = args.read_options();
    let result = ThaiIdCard::new(&session, &options).read_card_data_with_retry();
    session.release();

    let record = result.context("Failed to read card data")?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
