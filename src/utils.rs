//! Utility functions for id minting and money formatting

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Render an integer paise amount as a two-decimal rupee string. Amounts
/// stay in minor units everywhere else; this is the output boundary.
pub fn format_amount(paise: u64) -> String {
    format!("{}.{:02}", paise / 100, paise % 100)
}
