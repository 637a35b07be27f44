use anyhow::Context;
use thaiid_card::{CardReader, ReaderService};

pub fn cmd_readers() -> anyhow::Result<()> {
    let mut reader = CardReader::new().context("Failed to establish PC/SC context")?;
    let readers = reader.list_readers().context("Failed to list readers")?;

    if readers.is_empty() {
        println!("No card readers attached");
        return Ok(());
    }

    for (i, name) in readers.iter().enumerate() {
        println!("{}: {}", i, name);
    }
    Ok(())
}
